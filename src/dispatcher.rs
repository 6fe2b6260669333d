//! Fans host probes out over a worker pool and routes their outcomes.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use crate::checker::Probe;
use crate::notify::{NotificationIntent, Notifier, NotifyError};
use crate::{CertificateOutcome, HostRecord};

/// Upper bound on concurrent probes unless configured otherwise.
pub const DEFAULT_WORKERS: usize = 32;

/// Result for one host at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostResult {
    #[serde(flatten)]
    pub record: HostRecord,
    pub outcome: CertificateOutcome,
    pub not_after: Option<DateTime<Utc>>,
}

impl HostResult {
    /// Whole days left before the earliest leaf certificate expires.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.not_after.map(|not_after| (not_after - now).num_days())
    }
}

/// A notification that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub host: String,
    pub description: String,
    pub error: String,
}

/// Everything a run produced, one result per host in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub results: Vec<HostResult>,
    /// Notifications handed off successfully
    pub notified: usize,
    /// Actionable outcomes not sent because notifications are disabled
    pub suppressed: usize,
    pub delivery_failures: Vec<DeliveryFailure>,
}

impl RunSummary {
    /// Number of hosts whose outcome satisfies `predicate`.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CertificateOutcome) -> bool,
    {
        self.results
            .iter()
            .filter(|result| predicate(&result.outcome))
            .count()
    }
}

#[derive(Debug)]
enum Delivery {
    NotAttempted,
    Suppressed,
    Sent,
    Failed(DeliveryFailure),
}

/// Runs one probe per host record and notifies on actionable outcomes.
pub struct Dispatcher<P> {
    probe: P,
    notifier: Arc<dyn Notifier>,
    notify_enabled: bool,
    threshold_days: u32,
    workers: usize,
}

impl<P> std::fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("notify_enabled", &self.notify_enabled)
            .field("threshold_days", &self.threshold_days)
            .field("workers", &self.workers)
            .finish()
    }
}

impl<P: Probe> Dispatcher<P> {
    /// `notify_enabled` is the configuration gate: while false the notifier
    /// is never called.
    pub fn new(
        probe: P,
        notifier: Arc<dyn Notifier>,
        notify_enabled: bool,
        threshold_days: u32,
    ) -> Self {
        Dispatcher {
            probe,
            notifier,
            notify_enabled,
            threshold_days,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Caps the number of hosts probed at the same time.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Probes every record and returns once all of them have an outcome and
    /// every triggered notification has returned.
    pub fn run(&self, records: Vec<HostRecord>) -> RunSummary {
        let total = records.len();
        if total == 0 {
            return RunSummary::default();
        }

        let queue: Mutex<VecDeque<(usize, HostRecord)>> =
            Mutex::new(records.into_iter().enumerate().collect());
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            for id in 0..self.workers.min(total) {
                let tx = tx.clone();
                let queue = &queue;
                let spawned = thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn_scoped(scope, move || {
                        while let Some((index, record)) = next_job(queue) {
                            if tx.send((index, self.handle(record))).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    warn!("could not spawn worker {}: {}", id, e);
                }
            }
        });

        // whatever no worker picked up runs here
        while let Some((index, record)) = next_job(&queue) {
            let _ = tx.send((index, self.handle(record)));
        }
        drop(tx);

        let mut handled: Vec<(usize, HostResult, Delivery)> = rx
            .iter()
            .map(|(index, (result, delivery))| (index, result, delivery))
            .collect();
        handled.sort_by_key(|(index, _, _)| *index);

        let mut summary = RunSummary::default();
        for (_, result, delivery) in handled {
            match delivery {
                Delivery::NotAttempted => {}
                Delivery::Suppressed => summary.suppressed += 1,
                Delivery::Sent => summary.notified += 1,
                Delivery::Failed(failure) => summary.delivery_failures.push(failure),
            }
            summary.results.push(result);
        }
        summary
    }

    fn handle(&self, record: HostRecord) -> (HostResult, Delivery) {
        // a panicking probe only fails its own host
        let report = match panic::catch_unwind(AssertUnwindSafe(|| self.probe.probe(&record))) {
            Ok(report) => report,
            Err(payload) => CertificateOutcome::HandshakeError(format!(
                "probe panicked: {}",
                panic_message(payload.as_ref())
            ))
            .into(),
        };

        let delivery = match &report.outcome {
            CertificateOutcome::Ok => {
                info!("{} - certificate is ok", record);
                Delivery::NotAttempted
            }
            outcome if outcome.is_actionable() => self.notify(&record, outcome),
            outcome => {
                error!("unexpected error checking host {} - {}", record, outcome);
                Delivery::NotAttempted
            }
        };

        let result = HostResult {
            record,
            outcome: report.outcome,
            not_after: report.not_after,
        };
        (result, delivery)
    }

    fn notify(&self, record: &HostRecord, outcome: &CertificateOutcome) -> Delivery {
        if !self.notify_enabled {
            info!(
                "{} - {}, refusing to send notification due to config",
                record, outcome
            );
            return Delivery::Suppressed;
        }

        let intent = match NotificationIntent::new(record, outcome, self.threshold_days) {
            Some(intent) => intent,
            None => return Delivery::NotAttempted,
        };

        let sent = panic::catch_unwind(AssertUnwindSafe(|| self.notifier.send(&intent)))
            .unwrap_or_else(|payload| {
                Err(NotifyError::Transport {
                    details: format!("notifier panicked: {}", panic_message(payload.as_ref())),
                })
            });

        match sent {
            Ok(()) => {
                info!("sent notification for host {} - {}", record, outcome);
                Delivery::Sent
            }
            Err(e) => {
                error!("could not send notification for host {}: {}", record, e);
                Delivery::Failed(DeliveryFailure {
                    host: record.host.clone(),
                    description: record.description.clone(),
                    error: e.to_string(),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn next_job(queue: &Mutex<VecDeque<(usize, HostRecord)>>) -> Option<(usize, HostRecord)> {
    match queue.lock() {
        Ok(mut queue) => queue.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}
