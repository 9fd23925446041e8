//! Scan engine: fan out enumerators, evaluate rules, fold failures into
//! findings.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::azure::ManagementApi;
use crate::config::ScanConfig;
use crate::enumerator::{self, Enumerator};
use crate::error::{PostureError, Result};
use crate::resource::Service;
use crate::rules::{Finding, RuleEngine};

type WorkQueue<'a> = Mutex<slice::Iter<'a, Box<dyn Enumerator>>>;

pub struct ScanEngine {
    enumerators: Vec<Box<dyn Enumerator>>,
    rules: RuleEngine,
    max_workers: usize,
}

impl ScanEngine {
    pub fn new(
        enumerators: Vec<Box<dyn Enumerator>>,
        rules: RuleEngine,
        max_workers: usize,
    ) -> Result<Self> {
        if max_workers == 0 {
            return Err(PostureError::Config(
                "scan engine needs at least one worker".into(),
            ));
        }
        if max_workers < enumerators.len() {
            return Err(PostureError::Config(format!(
                "scan engine needs one worker per enumerator ({} enumerators, {} workers)",
                enumerators.len(),
                max_workers
            )));
        }
        Ok(Self {
            enumerators,
            rules,
            max_workers,
        })
    }

    /// Storage, VM and NSG enumerators over one shared client, with the
    /// built-in rules.
    pub fn azure(api: Arc<dyn ManagementApi>, config: &ScanConfig) -> Result<Self> {
        Self::new(
            enumerator::azure_enumerators(api),
            RuleEngine::new(),
            config.max_workers,
        )
    }

    pub fn services(&self) -> Vec<Service> {
        self.enumerators.iter().map(|e| e.service()).collect()
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Run every enumerator and return all findings in completion order.
    /// Each enumerator gets its own worker thread.
    ///
    /// Never fails. An enumerator that errors or panics contributes exactly
    /// one `ERROR` finding for its service; the others are unaffected.
    pub fn run_all_checks(&self) -> Vec<Finding> {
        if self.enumerators.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let workers = self.max_workers.min(self.enumerators.len());
        info!(enumerators = self.enumerators.len(), workers, "scan started");

        let queue: WorkQueue<'_> = Mutex::new(self.enumerators.iter());
        let (tx, rx) = mpsc::channel::<Vec<Finding>>();

        let findings: Vec<Finding> = thread::scope(|scope| {
            let mut spawned = 0usize;
            for worker in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let spawn = thread::Builder::new()
                    .name(format!("scan-worker-{worker}"))
                    .spawn_scoped(scope, move || self.drain(queue, &tx));
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!(worker, error = %e, "failed to spawn scan worker"),
                }
            }

            if spawned == 0 {
                warn!("no scan workers available, enumerating on the calling thread");
                self.drain(&queue, &tx);
            }

            drop(tx);
            rx.iter().flatten().collect()
        });

        info!(
            findings = findings.len(),
            errors = findings.iter().filter(|f| f.is_error()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        findings
    }

    fn drain(&self, queue: &WorkQueue<'_>, tx: &Sender<Vec<Finding>>) {
        loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
            let Some(enumerator) = next else {
                break;
            };
            if tx.send(self.check(enumerator.as_ref())).is_err() {
                break;
            }
        }
    }

    /// Enumerate one service and evaluate its rules on the current thread.
    fn check(&self, enumerator: &dyn Enumerator) -> Vec<Finding> {
        let service = enumerator.service();
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            enumerator
                .enumerate()
                .map(|inventory| self.rules.evaluate(&inventory))
        }))
        .unwrap_or_else(|payload| {
            Err(PostureError::Transient(format!(
                "enumerator panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        match outcome {
            Ok(findings) => {
                debug!(
                    %service,
                    findings = findings.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "service checked"
                );
                findings
            }
            Err(e) => {
                warn!(%service, error = %e, "enumeration failed");
                vec![Finding::enumeration_error(service, &e)]
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
