use magpie_core::{MagpieError, MagpieResult};
use rand::Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type QueueTask = Box<dyn FnOnce() -> MagpieResult<Value> + Send>;

/// Pacing between queued requests. The cadence deliberately imitates a
/// person browsing rather than a poller: a short base delay with jitter, and
/// an occasional much longer "reading" pause.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub base: Duration,
    pub jitter: Duration,
    pub long_pause_odds: u32,
    pub long_pause_min: Duration,
    pub long_pause_max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(800),
            jitter: Duration::from_millis(700),
            long_pause_odds: 12,
            long_pause_min: Duration::from_secs(2),
            long_pause_max: Duration::from_secs(6),
        }
    }
}

impl Pacing {
    fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = self.jitter.as_millis() as u64;
        let mut delay = self.base;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rng.gen_range(0..=jitter_ms));
        }

        if self.long_pause_odds > 0 && rng.gen_range(0..self.long_pause_odds) == 0 {
            let min_ms = self.long_pause_min.as_millis() as u64;
            let max_ms = self.long_pause_max.as_millis().max(self.long_pause_min.as_millis()) as u64;
            delay += Duration::from_millis(rng.gen_range(min_ms..=max_ms));
        }

        delay
    }
}

struct Job {
    task: QueueTask,
    reply: Sender<MagpieResult<Value>>,
}

struct QueueInner {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    aborted: AtomicBool,
    shutdown: AtomicBool,
}

/// Serializes outbound bulk API calls: strict FIFO, a single in-flight task,
/// and a pacing delay between tasks.
pub struct FetchQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
pub struct TaskHandle {
    receiver: Receiver<MagpieResult<Value>>,
}

impl TaskHandle {
    pub fn wait(self) -> MagpieResult<Value> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(MagpieError::aborted("fetch queue shut down before the task completed")))
    }
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::with_pacing(Pacing::default())
    }

    pub fn with_pacing(pacing: Pacing) -> Self {
        let inner = Arc::new(QueueInner {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            aborted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let worker_inner = inner.clone();
        let worker = thread::spawn(move || worker_loop(worker_inner, pacing));

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue(&self, task: QueueTask) -> MagpieResult<TaskHandle> {
        if self.is_aborted() {
            return Err(MagpieError::aborted("fetch queue is aborted; no new tasks accepted"));
        }

        let (reply, receiver) = channel();
        {
            let mut jobs = lock_jobs(&self.inner.jobs);
            jobs.push_back(Job { task, reply });
        }
        self.inner.available.notify_one();

        Ok(TaskHandle { receiver })
    }

    /// Fails every queued task immediately and refuses new work. A task that
    /// is already executing runs to completion; callers observing
    /// `is_aborted` afterwards discard its result.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);

        let drained: Vec<Job> = {
            let mut jobs = lock_jobs(&self.inner.jobs);
            jobs.drain(..).collect()
        };
        for job in drained {
            let _ = job
                .reply
                .send(Err(MagpieError::aborted("fetch queue aborted before the task started")));
        }

        self.inner.available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        lock_jobs(&self.inner.jobs).len()
    }
}

impl Drop for FetchQueue {
    fn drop(&mut self) {
        self.abort();
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();

        let handle = lock_worker(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<QueueInner>, pacing: Pacing) {
    loop {
        let job = {
            let mut jobs = lock_jobs(&inner.jobs);
            loop {
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                if inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                jobs = match inner.available.wait(jobs) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        if inner.aborted.load(Ordering::SeqCst) {
            let _ = job
                .reply
                .send(Err(MagpieError::aborted("fetch queue aborted before the task started")));
            continue;
        }

        // Sleep in slices so an abort during the pacing delay still cancels
        // the task before it starts.
        let deadline = Instant::now() + pacing.next_delay();
        let mut cancelled = false;
        while Instant::now() < deadline {
            if inner.aborted.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(Duration::from_millis(25).min(remaining));
        }

        if cancelled || inner.aborted.load(Ordering::SeqCst) {
            let _ = job
                .reply
                .send(Err(MagpieError::aborted("fetch queue aborted before the task started")));
            continue;
        }

        let result = (job.task)();
        let _ = job.reply.send(result);
    }
}

fn lock_jobs(jobs: &Mutex<VecDeque<Job>>) -> MutexGuard<'_, VecDeque<Job>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_worker<'a>(
    worker: &'a Mutex<Option<JoinHandle<()>>>,
) -> MutexGuard<'a, Option<JoinHandle<()>>> {
    worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
