use crate::{Job, ScrapeError, ScrapeResult};
use async_trait::async_trait;
use futures::Stream;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Results in completion order.
pub type ScrapeStream = Pin<Box<dyn Stream<Item = ScrapeResult> + Send>>;

/// Runs one admitted job to completion.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: Job) -> Result<ScrapeResult, ScrapeError>;
}

struct PendingJob {
    priority: i32,
    seq: u64,
    start: oneshot::Sender<RunningSlot>,
}

impl PartialEq for PendingJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingJob {}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingJob {
    // BinaryHeap pops the greatest element: lowest priority value first,
    // then earliest submission.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingJob>,
    running: usize,
    next_seq: u64,
    closed: bool,
}

struct Queue {
    concurrency: usize,
    state: Mutex<QueueState>,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, job: Job) -> Ticket {
        let mut state = self.lock();
        if state.closed {
            return Ticket { job, start: None };
        }

        let (tx, rx) = oneshot::channel();
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(
            "Queued job {} for {} (priority {}, seq {})",
            job.id, job.url, job.priority, seq
        );
        state.pending.push(PendingJob {
            priority: job.priority,
            seq,
            start: tx,
        });

        Ticket {
            job,
            start: Some(rx),
        }
    }

    /// Start queued jobs while there is room under the ceiling.
    fn pump(self: &Arc<Self>) {
        let mut undelivered = Vec::new();
        {
            let mut state = self.lock();
            while state.running < self.concurrency {
                let Some(next) = state.pending.pop() else {
                    break;
                };
                state.running += 1;
                let slot = RunningSlot {
                    queue: self.clone(),
                };
                if let Err(slot) = next.start.send(slot) {
                    undelivered.push(slot);
                }
            }
        }
        // Slots whose ticket went away give their room back on drop.
        drop(undelivered);
    }
}

/// Room under the concurrency ceiling, held for the lifetime of one job.
struct RunningSlot {
    queue: Arc<Queue>,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        {
            let mut state = self.queue.lock();
            state.running = state.running.saturating_sub(1);
        }
        self.queue.pump();
    }
}

struct Ticket {
    job: Job,
    start: Option<oneshot::Receiver<RunningSlot>>,
}

impl Ticket {
    async fn run<E: JobExecutor>(self, executor: Arc<E>) -> ScrapeResult {
        let Ticket { job, start } = self;

        let slot = match start {
            Some(start) => match start.await {
                Ok(slot) => slot,
                Err(_) => return ScrapeResult::failed(&job, ScrapeError::PoolShutdown),
            },
            None => return ScrapeResult::failed(&job, ScrapeError::PoolShutdown),
        };

        let settled = job.clone();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            executor.execute(job).await
        });

        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!("Job {} failed: {}", settled.id, e);
                ScrapeResult::failed(&settled, e)
            }
            Err(e) => {
                warn!("Job {} for {} panicked: {}", settled.id, settled.url, e);
                ScrapeResult::failed(&settled, ScrapeError::JobPanicked(e.to_string()))
            }
        }
    }
}

/// Priority queue in front of a [`JobExecutor`] with a fixed concurrency ceiling.
///
/// Every submitted job settles into exactly one [`ScrapeResult`]; executor
/// errors and panics become error-bearing results.
pub struct JobScheduler<E: JobExecutor> {
    executor: Arc<E>,
    queue: Arc<Queue>,
}

impl<E: JobExecutor> Clone for JobScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<E: JobExecutor> JobScheduler<E> {
    pub fn new(executor: Arc<E>, concurrency: usize) -> Self {
        Self {
            executor,
            queue: Arc::new(Queue {
                concurrency: concurrency.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub async fn submit(&self, job: Job) -> ScrapeResult {
        let ticket = self.queue.enqueue(job);
        self.queue.pump();
        ticket.run(self.executor.clone()).await
    }

    /// Results in input order.
    pub async fn submit_many(&self, jobs: Vec<Job>) -> Vec<ScrapeResult> {
        let tickets = self.enqueue_all(jobs);
        futures::future::join_all(
            tickets
                .into_iter()
                .map(|ticket| ticket.run(self.executor.clone())),
        )
        .await
    }

    /// Results in completion order. Ends once every job has settled.
    pub fn stream(&self, jobs: Vec<Job>) -> ScrapeStream {
        let tickets = self.enqueue_all(jobs);
        let (tx, rx) = mpsc::unbounded_channel();

        for ticket in tickets {
            let tx = tx.clone();
            let executor = self.executor.clone();
            tokio::spawn(async move {
                let result = ticket.run(executor).await;
                let _ = tx.send(result);
            });
        }

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Queue the whole batch before dispatching so priorities apply across it.
    fn enqueue_all(&self, jobs: Vec<Job>) -> Vec<Ticket> {
        let tickets: Vec<_> = jobs
            .into_iter()
            .map(|job| self.queue.enqueue(job))
            .collect();
        self.queue.pump();
        tickets
    }

    /// Stop admitting jobs. Already queued jobs still run.
    pub fn close(&self) {
        let mut state = self.queue.lock();
        if !state.closed {
            state.closed = true;
            info!(
                "Job scheduler closed ({} pending, {} running)",
                state.pending.len(),
                state.running
            );
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.queue.lock();
        SchedulerStats {
            pending: state.pending.len(),
            running: state.running,
            concurrency: self.queue.concurrency,
            closed: state.closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub pending: usize,
    pub running: usize,
    pub concurrency: usize,
    pub closed: bool,
}

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(std::sync::atomic::Ordering::Relaxed);
        let errors = self.errors.load(std::sync::atomic::Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            completed as f64 / secs
        } else {
            0.0
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta: if completed > 0 && rate > 0.0 {
                let remaining = self.total.saturating_sub(completed);
                Some(Duration::from_secs_f64(remaining as f64 / rate))
            } else {
                None
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(std::sync::atomic::Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageMetadata, Timing};
    use chrono::Utc;
    use futures::StreamExt;
    use std::collections::HashSet;
    use tokio::time::Instant as TokioInstant;

    /// Sleeps for the number of milliseconds in the URL's last path segment.
    /// URLs containing "fail" error out and "panic" panics.
    #[derive(Default)]
    struct SleepExecutor {
        started: Mutex<Vec<(String, TokioInstant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SleepExecutor {
        fn started(&self) -> Vec<String> {
            self.started
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl JobExecutor for SleepExecutor {
        async fn execute(&self, job: Job) -> Result<ScrapeResult, ScrapeError> {
            use std::sync::atomic::Ordering::SeqCst;

            self.started
                .lock()
                .unwrap()
                .push((job.url.clone(), TokioInstant::now()));
            let now = self.in_flight.fetch_add(1, SeqCst) + 1;
            self.max_in_flight.fetch_max(now, SeqCst);

            let millis: u64 = job
                .url
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.in_flight.fetch_sub(1, SeqCst);

            if job.url.contains("panic") {
                panic!("executor blew up");
            }
            if job.url.contains("fail") {
                return Err(ScrapeError::Navigation("boom".to_string()));
            }

            Ok(ScrapeResult {
                id: job.id,
                url: job.url,
                final_url: None,
                markdown: "# ok".to_string(),
                metadata: PageMetadata::default(),
                timing: Timing {
                    total: millis,
                    ..Default::default()
                },
                path: None,
                scraped_at: Utc::now(),
                error: None,
            })
        }
    }

    fn scheduler(concurrency: usize) -> JobScheduler<SleepExecutor> {
        JobScheduler::new(Arc::new(SleepExecutor::default()), concurrency)
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_many_preserves_input_order() {
        let scheduler = scheduler(3);
        let urls = vec![
            "https://a.example/30",
            "https://b.example/fail/10",
            "https://c.example/5",
            "https://d.example/panic/1",
        ];
        let jobs = urls.iter().map(|u| Job::new(*u)).collect();

        let results = scheduler.submit_many(jobs).await;

        assert_eq!(results.len(), urls.len());
        for (result, url) in results.iter().zip(&urls) {
            assert_eq!(result.url, *url);
        }
        assert!(results[0].is_success());
        assert!(results[1].error.as_deref().unwrap().contains("boom"));
        assert!(results[2].is_success());
        assert!(results[3].error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling() {
        let scheduler = scheduler(2);
        let jobs = (0..6)
            .map(|i| Job::new(format!("https://h{i}.example/50")))
            .collect();

        let start = TokioInstant::now();
        scheduler.submit_many(jobs).await;

        let max = scheduler
            .executor()
            .max_in_flight
            .load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(max, 2);
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(scheduler.stats().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_submission_order() {
        let scheduler = scheduler(1);
        let jobs = vec![
            Job::new("https://x.example/low/1").with_priority(5),
            Job::new("https://x.example/high-a/1").with_priority(-1),
            Job::new("https://x.example/mid/1"),
            Job::new("https://x.example/high-b/1").with_priority(-1),
        ];

        scheduler.submit_many(jobs).await;

        assert_eq!(
            scheduler.executor().started(),
            vec![
                "https://x.example/high-a/1",
                "https://x.example/high-b/1",
                "https://x.example/mid/1",
                "https://x.example/low/1",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_yields_in_completion_order() {
        let scheduler = scheduler(3);
        let jobs = vec![
            Job::new("https://a.example/300"),
            Job::new("https://b.example/100"),
            Job::new("https://c.example/fail/200"),
        ];

        let results: Vec<_> = scheduler.stream(jobs).collect().await;

        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://b.example/100",
                "https://c.example/fail/200",
                "https://a.example/300",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_delivers_every_result_once() {
        let scheduler = scheduler(4);
        let jobs: Vec<_> = (0..20)
            .map(|i| Job::new(format!("https://s.example/{i}/{}", (i % 3) * 10)))
            .collect();
        let expected: HashSet<_> = jobs.iter().map(|j| j.id.clone()).collect();

        let mut stream = scheduler.stream(jobs);
        // Let everything finish before consuming anything.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut seen = HashSet::new();
        while let Some(result) = stream.next().await {
            assert!(seen.insert(result.id));
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_empty_stream_ends() {
        let scheduler = scheduler(2);
        let results: Vec<_> = scheduler.stream(Vec::new()).collect().await;
        assert!(results.is_empty());
        assert!(scheduler.submit_many(Vec::new()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_scheduler_rejects_new_jobs() {
        let scheduler = scheduler(2);
        scheduler.close();

        let result = scheduler.submit(Job::new("https://a.example/1")).await;
        assert!(!result.is_success());
        assert!(scheduler.executor().started().is_empty());
        assert!(scheduler.stats().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_frees_its_slot() {
        let scheduler = scheduler(1);
        let blocker = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.submit(Job::new("https://a.example/100")).await })
        };
        tokio::task::yield_now().await;

        // Queued behind the blocker, then abandoned while still waiting.
        let waiting = scheduler.submit(Job::new("https://b.example/1"));
        let abandoned = tokio::time::timeout(Duration::from_millis(10), waiting).await;
        assert!(abandoned.is_err());

        blocker.await.unwrap();
        let result = scheduler.submit(Job::new("https://c.example/1")).await;
        assert!(result.is_success());
        assert_eq!(scheduler.stats().running, 0);
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(4);
        tracker.record_completion(true);
        tracker.record_completion(false);

        let progress = tracker.get_progress();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.errors, 1);
        assert_eq!(progress.success, 1);
        assert!(!tracker.is_complete());

        tracker.record_completion(true);
        tracker.record_completion(true);
        assert!(tracker.is_complete());
    }
}
