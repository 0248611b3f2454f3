use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, oneshot};

use super::{error::Error, option::HealthOption, probe::Prober};

/// A condition change reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCondition {
    pub uid: String,
    pub address: String,
    pub healthy: bool,
}

/// Hysteresis state of one probe target.
///
/// Every time a streak of outcomes reaches its threshold the worker reports the
/// condition and starts counting again. Only the first report of a streak is logged.
#[derive(Debug)]
pub struct Worker {
    uid: String,
    option: HealthOption,
    success: u32,
    failure: u32,
    condition: bool,
    log_success: bool,
    log_failure: bool,
}

impl Worker {
    pub fn new(uid: &str, option: HealthOption) -> Worker {
        let option = option.normalized();
        Worker {
            uid: uid.to_string(),
            condition: option.initial_condition,
            option,
            success: 0,
            failure: 0,
            log_success: true,
            log_failure: true,
        }
    }

    pub fn condition(&self) -> bool {
        self.condition
    }

    pub fn option(&self) -> &HealthOption {
        &self.option
    }

    /// Feeds one probe outcome and returns the condition to report, if any.
    pub fn observe(&mut self, result: Result<(), Error>) -> Option<HealthCondition> {
        match result {
            Err(e) => {
                self.success = 0;
                self.failure += 1;
                self.log_success = true;
                if self.failure < self.option.failure_threshold {
                    return None;
                }
                if self.log_failure {
                    tracing::info!(uid = %self.uid, address = %self.option.address, timeout = ?self.option.timeout, error = %e, "Probe failed");
                    self.log_failure = false;
                }
                self.failure = 0;
                self.condition = false;
            }
            Ok(()) => {
                self.failure = 0;
                self.success += 1;
                self.log_failure = true;
                if self.success < self.option.success_threshold {
                    return None;
                }
                if self.log_success {
                    tracing::info!(uid = %self.uid, address = %self.option.address, "Probe succeeded");
                    self.log_success = false;
                }
                self.success = 0;
                self.condition = true;
            }
        }
        Some(HealthCondition {
            uid: self.uid.clone(),
            address: self.option.address.clone(),
            healthy: self.condition,
        })
    }

    /// Probes every period until `stop` fires or the receiver of `tx` is gone.
    pub(crate) async fn run(
        mut self,
        prober: Arc<dyn Prober>,
        tx: mpsc::Sender<HealthCondition>,
        mut stop: oneshot::Receiver<()>,
        state: Arc<AtomicBool>,
    ) {
        let mut ticker = tokio::time::interval(self.option.period);
        // the first tick of an interval completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = &mut stop => break,
                r = prober.probe(&self.option.address, self.option.timeout) => r,
            };
            let Some(cond) = self.observe(result) else {
                continue;
            };
            state.store(cond.healthy, Ordering::SeqCst);
            tokio::select! {
                _ = &mut stop => break,
                sent = tx.send(cond) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(uid = %self.uid, address = %self.option.address, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    use rstest::rstest;

    fn fail() -> Result<(), Error> {
        Err(Error::Timeout("10.0.0.1:80".to_string()))
    }

    fn worker(success: u32, failure: u32, initial: bool) -> Worker {
        Worker::new(
            "default/lb",
            HealthOption {
                address: "10.0.0.1:80".to_string(),
                success_threshold: success,
                failure_threshold: failure,
                timeout: Duration::from_millis(10),
                period: Duration::from_millis(10),
                initial_condition: initial,
            },
        )
    }

    #[test]
    fn works_worker_hysteresis() {
        let mut w = worker(2, 3, true);
        assert_eq!(None, w.observe(fail()));
        assert_eq!(None, w.observe(fail()));
        let ev = w.observe(fail()).unwrap();
        assert!(!ev.healthy);
        assert!(!w.condition());

        assert_eq!(None, w.observe(Ok(())));
        let ev = w.observe(Ok(())).unwrap();
        assert!(ev.healthy);
        assert_eq!("default/lb", ev.uid);
        assert_eq!("10.0.0.1:80", ev.address);
    }

    #[test]
    fn works_worker_interrupted_streak() {
        let mut w = worker(2, 3, true);
        assert_eq!(None, w.observe(fail()));
        assert_eq!(None, w.observe(fail()));
        assert_eq!(None, w.observe(Ok(())));
        assert_eq!(None, w.observe(fail()));
        assert_eq!(None, w.observe(fail()));
        assert!(w.condition());
        assert!(w.observe(fail()).is_some());
    }

    #[rstest(
        outcomes,
        expected,
        case(vec![false, false, false, false, false, false], vec![false, false]),
        case(vec![true, true, true], vec![true, true, true]),
        case(vec![false, false, false, true], vec![false, true]),
    )]
    fn works_worker_repeats_on_each_threshold(outcomes: Vec<bool>, expected: Vec<bool>) {
        let mut w = worker(1, 3, true);
        let reported: Vec<bool> = outcomes
            .into_iter()
            .filter_map(|ok| w.observe(if ok { Ok(()) } else { fail() }))
            .map(|c| c.healthy)
            .collect();
        assert_eq!(expected, reported);
    }
}
