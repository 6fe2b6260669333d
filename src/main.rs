use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use env_logger::Env;
use log::{error, info, warn};
use strum_macros::{Display, EnumString};

use certwatcher::config::{Config, ConfigError};
use certwatcher::dispatcher::DEFAULT_WORKERS;
use certwatcher::notify::{LogNotifier, Notifier, SmtpNotifier};
use certwatcher::{hosts, CertificateOutcome, Dispatcher, HostChecker, RunSummary, DEFAULT_PORT};

mod metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
enum OutputFormat {
    Log,
    Json,
    Table,
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to CSV containing the list of hosts to monitor
    #[arg(long, default_value = "/etc/certwatcher/urls.csv")]
    urls: PathBuf,
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/certwatcher/config.toml")]
    config: PathBuf,
    /// Number of days before triggering alert
    #[arg(long, default_value_t = 30)]
    days: u32,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Port to probe for hosts listed without one
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds allowed for connecting and handshaking with one host
    #[arg(long, default_value_t = 5)]
    timeout: u64,
    /// Maximum number of hosts checked at the same time
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Report printed after the run: log, json or table
    #[arg(short, long, default_value = "log")]
    output: OutputFormat,
    /// Log the alerts instead of sending them
    #[arg(long)]
    dry_run: bool,
    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", Config::example_toml());
        return;
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(log_filter(cli.verbose)))
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => fatal(&config_error_message(&cli.config, &e)),
    };

    let records = match hosts::load_hosts(&cli.urls) {
        Ok(records) => records,
        Err(e) => fatal(&e.to_string()),
    };

    let (notifier, notify_enabled) = build_notifier(&cli, &config);

    let checker = HostChecker {
        port: cli.port,
        timeout: Duration::from_secs(cli.timeout),
        threshold_days: cli.days,
    };
    let dispatcher =
        Dispatcher::new(checker, notifier, notify_enabled, cli.days).with_workers(cli.workers);

    info!(
        "checking {} hosts from {} (alert within {} days)",
        records.len(),
        cli.urls.display(),
        cli.days
    );
    let summary = dispatcher.run(records);

    log_summary(&summary);
    match cli.output {
        OutputFormat::Log => {}
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => print_table(&summary),
    }

    if let Some(address) = config.prometheus_address() {
        metrics::prom::push_summary(&summary, address);
    }
}

/// Verbose mode only adds this crate's debug output.
fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "certwatcher=debug,info"
    } else {
        "info"
    }
}

fn config_error_message(path: &Path, e: &ConfigError) -> String {
    format!("invalid config file {}: {}", path.display(), e)
}

fn fatal(message: &str) -> ! {
    error!("{}", message);
    exit(1);
}

fn build_notifier(cli: &Cli, config: &Config) -> (Arc<dyn Notifier>, bool) {
    let mail = &config.certwatcher;

    if cli.dry_run {
        info!("dry run: alerts are logged, not sent");
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(mail));
        return (notifier, true);
    }

    if !mail.sendmail {
        info!("sendmail is disabled in {}", cli.config.display());
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(mail));
        return (notifier, false);
    }

    let notifier: Arc<dyn Notifier> = match SmtpNotifier::new(mail) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => fatal(&format!("could not set up mail delivery: {}", e)),
    };
    (notifier, true)
}

fn log_summary(summary: &RunSummary) {
    info!(
        "checked {} hosts: {} ok, {} expiring soon, {} expired, {} failed; {} notified, {} suppressed",
        summary.results.len(),
        summary.count(|outcome| *outcome == CertificateOutcome::Ok),
        summary.count(|outcome| *outcome == CertificateOutcome::ExpiringSoon),
        summary.count(|outcome| *outcome == CertificateOutcome::Expired),
        summary.count(CertificateOutcome::is_probe_failure),
        summary.notified,
        summary.suppressed
    );
    for failure in summary.delivery_failures.iter() {
        warn!(
            "notification for {} ({}) was not delivered: {}",
            failure.host, failure.description, failure.error
        );
    }
}

fn print_json(summary: &RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("could not render json report: {}", e),
    }
}

fn print_table(summary: &RunSummary) {
    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Host",
        "Description",
        "Status",
        "Expires",
        "Days left",
    ]);

    for result in summary.results.iter() {
        let host = match result.record.port {
            Some(port) => format!("{}:{}", result.record.host, port),
            None => result.record.host.clone(),
        };
        table.add_row(vec![
            host,
            result.record.description.clone(),
            result.outcome.to_string(),
            result
                .not_after
                .map(|not_after| not_after.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            result
                .days_remaining(now)
                .map(|days| days.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{table}");
}
