use eyre::{Result, WrapErr};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::target::{Target, TargetSource, Targets};

/// Slots in the target queue per worker.
const QUEUE_SLOTS_PER_WORKER: usize = 2;
/// Upper bound on workers; each one may hold a socket open.
pub const MAX_CONCURRENCY: usize = 100_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Targets handed to the queue.
    pub dispatched: u64,
    /// Targets whose work finished.
    pub completed: u64,
    pub cancelled: bool,
}

/// Fixed pool of workers fed from a bounded queue by a single producer.
///
/// The queue holds `2 × concurrency` targets, so a producer walking a huge
/// network blocks instead of racing ahead. Exactly `concurrency` workers
/// exist for the whole run; each runs one unit of work at a time, which
/// caps open sockets at the worker count.
#[derive(Debug, Clone)]
pub struct Scheduler {
    concurrency: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Result<Self> {
        if concurrency == 0 {
            eyre::bail!("Concurrency must be at least 1");
        }
        if concurrency > MAX_CONCURRENCY {
            eyre::bail!("Concurrency {} exceeds the maximum of {}", concurrency, MAX_CONCURRENCY);
        }
        Ok(Self { concurrency, cancel })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn queue_capacity(&self) -> usize {
        self.concurrency * QUEUE_SLOTS_PER_WORKER
    }

    /// Runs `work` once for each of the first `limit` targets of `source`.
    ///
    /// `limit` is the total counted before the run; targets beyond it (a
    /// target file that grew since) are never dispatched. Returns after the
    /// producer is exhausted and every dequeued target has finished, or
    /// after cancellation once in-flight work has drained.
    pub async fn run<F, Fut>(&self, source: &TargetSource, limit: u64, work: F) -> Result<SchedulerReport>
    where
        F: Fn(Target) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        log::debug!("[scheduler] run: concurrency={} queue_capacity={} limit={}",
            self.concurrency, self.queue_capacity(), limit);

        let run_start = Instant::now();
        let (tx, rx) = mpsc::channel::<Target>(self.queue_capacity());
        let queue = Arc::new(Mutex::new(rx));
        let work = Arc::new(work);
        let completed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(self.concurrency);
        for id in 0..self.concurrency {
            workers.push(tokio::spawn(worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&work),
                self.cancel.clone(),
                Arc::clone(&completed),
            )));
        }
        // Workers own the receiver now; once they all exit the channel
        // closes and a blocked producer wakes up.
        drop(queue);

        let targets = source.iter();
        let cancel = self.cancel.clone();
        let dispatched = tokio::task::spawn_blocking(move || produce(targets, limit, tx, cancel))
            .await
            .wrap_err("Target producer panicked")?;

        log::debug!("[scheduler] producer_finished: dispatched={} duration={}ms",
            dispatched, run_start.elapsed().as_millis());

        for (id, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                log::error!("[scheduler] worker_failed: id={} error={}", id, e);
            }
        }

        let report = SchedulerReport {
            dispatched,
            completed: completed.load(Ordering::SeqCst),
            cancelled: self.cancel.is_cancelled(),
        };

        log::debug!("[scheduler] run_completed: dispatched={} completed={} cancelled={} duration={}ms",
            report.dispatched, report.completed, report.cancelled, run_start.elapsed().as_millis());

        Ok(report)
    }
}

fn produce(mut targets: Targets, limit: u64, tx: mpsc::Sender<Target>, cancel: CancellationToken) -> u64 {
    let mut dispatched = 0u64;

    while dispatched < limit {
        let Some(target) = targets.next() else { break };
        if cancel.is_cancelled() {
            log::debug!("[scheduler] producer_cancelled: dispatched={}", dispatched);
            break;
        }
        if tx.blocking_send(target).is_err() {
            log::debug!("[scheduler] queue_closed: dispatched={}", dispatched);
            break;
        }
        dispatched += 1;
    }

    if dispatched == limit && !cancel.is_cancelled() && targets.next().is_some() {
        log::warn!("[scheduler] source_grew: limit={} extra targets ignored", limit);
    }

    dispatched
}

async fn worker<F, Fut>(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Target>>>,
    work: Arc<F>,
    cancel: CancellationToken,
    completed: Arc<AtomicU64>,
) where
    F: Fn(Target) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    log::trace!("[scheduler] worker_started: id={}", id);
    let mut handled = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            target = async { queue.lock().await.recv().await } => target,
        };

        let Some(target) = next else { break };

        work(target).await;
        handled += 1;
        completed.fetch_add(1, Ordering::SeqCst);
    }

    log::trace!("[scheduler] worker_stopped: id={} handled={}", id, handled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetSpec;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn source(spec: &str) -> TargetSource {
        TargetSource::new(TargetSpec::parse(spec))
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(Scheduler::new(0, CancellationToken::new()).is_err());
        assert!(Scheduler::new(MAX_CONCURRENCY + 1, CancellationToken::new()).is_err());
        assert!(Scheduler::new(usize::MAX, CancellationToken::new()).is_err());
        assert_eq!(Scheduler::new(3, CancellationToken::new()).unwrap().queue_capacity(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_target_handled_once() {
        for concurrency in [1, 4, 100] {
            let targets = source("10.0.0.0/24,example.com,10.1.0.0/30");
            let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

            let scheduler = Scheduler::new(concurrency, CancellationToken::new()).unwrap();
            let sink = Arc::clone(&seen);
            let report = scheduler
                .run(&targets, targets.count(), move |target| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(target.to_string());
                    }
                })
                .await
                .unwrap();

            let seen = seen.lock().unwrap();
            let unique: HashSet<_> = seen.iter().collect();
            assert_eq!(seen.len(), 261, "concurrency {}", concurrency);
            assert_eq!(unique.len(), 261, "concurrency {}", concurrency);
            assert_eq!(report.dispatched, targets.count());
            assert_eq!(report.completed, targets.count());
            assert!(!report.cancelled);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_ceiling() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let scheduler = Scheduler::new(8, CancellationToken::new()).unwrap();
        let (flight, high) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let report = scheduler
            .run(&source("192.168.0.0/26"), 64, move |_| {
                let (flight, high) = (Arc::clone(&flight), Arc::clone(&high));
                async move {
                    let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert_eq!(report.completed, 64);
        assert!(peak.load(Ordering::SeqCst) <= 8);
        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_source_completes() {
        let scheduler = Scheduler::new(4, CancellationToken::new()).unwrap();
        let report = scheduler
            .run(&TargetSource::new(TargetSpec::List(Vec::new())), 0, |_| async {})
            .await
            .unwrap();
        assert_eq!(report, SchedulerReport::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_drains_in_flight_work() {
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicU64::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let scheduler = Scheduler::new(4, cancel).unwrap();
        let counter = Arc::clone(&done);
        let start = Instant::now();
        let report = scheduler
            .run(&source("10.0.0.0/16"), 65_536, move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.completed, done.load(Ordering::SeqCst));
        assert!(report.completed > 0);
        assert!(report.completed < 65_536);
        assert!(report.dispatched >= report.completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_producer_is_backpressured() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let scheduler = Scheduler::new(2, cancel).unwrap();
        let report = scheduler
            .run(&source("10.0.0.0/8"), 1 << 24, |_| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
            })
            .await
            .unwrap();

        // Two in flight plus a full queue; nothing more may be pulled.
        assert!(report.dispatched <= 6, "dispatched {}", report.dispatched);
        assert_eq!(report.completed, 2);
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_limit() {
        let handled = Arc::new(AtomicU64::new(0));

        let scheduler = Scheduler::new(4, CancellationToken::new()).unwrap();
        let counter = Arc::clone(&handled);
        let report = scheduler
            .run(&source("10.0.0.0/24"), 100, move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert_eq!(report.dispatched, 100);
        assert_eq!(report.completed, 100);
        assert_eq!(handled.load(Ordering::SeqCst), 100);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scheduler = Scheduler::new(4, cancel).unwrap();
        let report = scheduler.run(&source("10.0.0.0/24"), 256, |_| async {}).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.completed, 0);
    }
}
