use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, warn};
use prometheus::{labels, register_gauge, Gauge};

use certwatcher::RunSummary;

lazy_static! {
    static ref CERTWATCHER_DAYS_BEFORE_EXPIRED: Gauge =
        register_gauge!("certwatcher_days_before_expired", "days before expiration").unwrap();
    static ref CERTWATCHER_OUTCOME: Gauge = register_gauge!(
        "certwatcher_outcome",
        "0 ok, 1 expiring soon, 2 expired, 3 timeout, 4 connection error, 5 handshake error"
    )
    .unwrap();
}

/// Pushes one group of gauges per host to the Push Gateway.
///
/// Hosts whose handshake never completed report NaN days. Push failures are
/// logged and otherwise ignored.
pub fn push_summary(summary: &RunSummary, prometheus_address: &str) {
    let now = Utc::now();
    for result in summary.results.iter() {
        let days = result
            .days_remaining(now)
            .map(|days| days as f64)
            .unwrap_or(f64::NAN);
        CERTWATCHER_DAYS_BEFORE_EXPIRED.set(days);
        CERTWATCHER_OUTCOME.set(result.outcome.code() as f64);

        let metric_families = prometheus::gather();
        let pushed = prometheus::push_metrics(
            "certwatcher",
            labels! {
                "instance".to_owned() => "certwatcher".to_owned(),
                "host".to_owned() => result.record.host.to_owned(),
                "description".to_owned() => result.record.description.to_owned(),
                "outcome".to_owned() => result.outcome.label().to_owned(),
            },
            &format!("{}/metrics/job", prometheus_address),
            metric_families,
            None,
        );

        match pushed {
            Ok(_) => debug!("pushed metrics for {}", result.record.host),
            Err(e) => warn!("failed to push metrics to prometheus: {}", e),
        }
    }
}
