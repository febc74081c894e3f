//! Bounded parser worker pool.
//!
//! A fixed set of worker threads drains a FIFO channel of parse jobs. Each
//! job carries its own reply channel; the returned ticket is consumed by
//! exactly one caller. Workers keep per-language adapter instances warm but
//! no task state. A parse failure (or panic) is delivered as an error reply
//! and never takes a worker down.

use crate::error::{EngineError, EngineResult};
use crate::parsing::adapter::{LanguageAdapter, ParsedFile};
use crate::parsing::registry::AdapterRegistry;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One parse request.
#[derive(Debug, Clone)]
pub struct ParseJob {
    pub path: String,
    pub content: String,
    pub ext: String,
    /// Maximum time the job may wait in the queue before being rejected.
    pub queue_timeout_ms: Option<u64>,
    /// Maximum time the caller will wait for execution to finish.
    pub task_timeout_ms: Option<u64>,
}

impl ParseJob {
    pub fn new(path: impl Into<String>, content: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            ext: ext.into(),
            queue_timeout_ms: None,
            task_timeout_ms: None,
        }
    }
}

struct QueuedJob {
    job: ParseJob,
    enqueued_at: Instant,
    reply: Sender<EngineResult<ParsedFile>>,
}

/// Handle to one dispatched job; `wait` consumes it.
pub struct ParseTicket {
    receiver: Receiver<EngineResult<ParsedFile>>,
    task_timeout_ms: Option<u64>,
}

impl ParseTicket {
    /// Block until the job replies or its task deadline elapses.
    ///
    /// A deadline hit fails the ticket only; the worker finishes the parse
    /// and its reply is discarded.
    pub fn wait(self) -> EngineResult<ParsedFile> {
        match self.task_timeout_ms {
            Some(timeout_ms) => self
                .receiver
                .recv_timeout(Duration::from_millis(timeout_ms))
                .unwrap_or(Err(EngineError::TaskTimeout { timeout_ms })),
            None => self
                .receiver
                .recv()
                .unwrap_or_else(|_| Err(EngineError::General("parser pool dropped job".into()))),
        }
    }
}

/// Bounded pool of parser workers.
pub struct ParserPool {
    sender: Option<Sender<QueuedJob>>,
    queue_receiver: Receiver<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    accepting: Arc<AtomicBool>,
}

impl ParserPool {
    /// Pool with `max(1, cores - 1)` workers.
    pub fn with_default_size(registry: Arc<AdapterRegistry>) -> Self {
        Self::new(num_cpus::get().saturating_sub(1).max(1), registry)
    }

    pub fn new(size: usize, registry: Arc<AdapterRegistry>) -> Self {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<QueuedJob>();
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let accepting = Arc::new(AtomicBool::new(true));

        let workers = (0..size)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let registry = Arc::clone(&registry);
                let queued = Arc::clone(&queued);
                let active = Arc::clone(&active);
                std::thread::Builder::new()
                    .name(format!("parse-worker-{worker_id}"))
                    .spawn(move || worker_loop(receiver, registry, queued, active))
                    .expect("spawning parser worker")
            })
            .collect();

        Self {
            sender: Some(sender),
            queue_receiver: receiver,
            workers,
            queued,
            active,
            accepting,
        }
    }

    /// Enqueue a job; FIFO with respect to other `parse` calls.
    pub fn parse(&self, job: ParseJob) -> EngineResult<ParseTicket> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::General("parser pool is shut down".into()));
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::General("parser pool is shut down".into()))?;

        let (reply_tx, reply_rx) = unbounded();
        let task_timeout_ms = job.task_timeout_ms;
        self.queued.fetch_add(1, Ordering::SeqCst);
        sender
            .send(QueuedJob {
                job,
                enqueued_at: Instant::now(),
                reply: reply_tx,
            })
            .map_err(|_| {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                EngineError::General("parser pool is shut down".into())
            })?;

        Ok(ParseTicket {
            receiver: reply_rx,
            task_timeout_ms,
        })
    }

    /// Reject every queued-but-not-started job with `reason`.
    pub fn clear_queue(&self, reason: &str) {
        while let Ok(queued_job) = self.queue_receiver.try_recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            let _ = queued_job
                .reply
                .send(Err(EngineError::General(reason.to_string())));
        }
    }

    /// Block until no job is queued or executing.
    pub fn drain(&self) {
        while self.queued.load(Ordering::SeqCst) > 0 || self.active.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Refuse new work, finish in-flight jobs, join workers.
    pub fn shutdown(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ParserPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    receiver: Receiver<QueuedJob>,
    registry: Arc<AdapterRegistry>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
) {
    // Adapter instances are reused across jobs; this is language state, not
    // task state.
    let mut adapters: HashMap<String, Box<dyn LanguageAdapter>> = HashMap::new();

    while let Ok(queued_job) = receiver.recv() {
        active.fetch_add(1, Ordering::SeqCst);
        queued.fetch_sub(1, Ordering::SeqCst);

        let QueuedJob {
            job,
            enqueued_at,
            reply,
        } = queued_job;

        if let Some(limit_ms) = job.queue_timeout_ms {
            let waited = enqueued_at.elapsed();
            if waited > Duration::from_millis(limit_ms) {
                let _ = reply.send(Err(EngineError::QueueTimeout {
                    waited_ms: waited.as_millis() as u64,
                }));
                active.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
        }

        let result = run_job(&registry, &mut adapters, &job);
        let _ = reply.send(result);
        active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_job(
    registry: &AdapterRegistry,
    adapters: &mut HashMap<String, Box<dyn LanguageAdapter>>,
    job: &ParseJob,
) -> EngineResult<ParsedFile> {
    #[cfg(test)]
    if job.ext == "sleep" {
        let ms: u64 = job.content.trim().parse().unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms));
        return Ok(ParsedFile::default());
    }

    let key = job.ext.to_ascii_lowercase();
    if !adapters.contains_key(&key) {
        adapters.insert(key.clone(), registry.create(&key)?);
    }
    let adapter = adapters.get_mut(&key).expect("adapter inserted above");

    let outcome = catch_unwind(AssertUnwindSafe(|| adapter.parse(&job.content, &job.path)));
    match outcome {
        Ok(result) => result,
        Err(_) => {
            // The adapter may be mid-parse; rebuild it next time.
            adapters.remove(&key);
            Err(EngineError::Plugin {
                language: key,
                reason: format!("parser panicked on '{}'", job.path),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::registry::AdapterRegistry;

    fn pool(size: usize) -> ParserPool {
        ParserPool::new(size, Arc::new(AdapterRegistry::with_builtin_languages()))
    }

    #[test]
    fn parses_typescript_job() {
        let pool = pool(2);
        let ticket = pool
            .parse(ParseJob::new(
                "src/a.ts",
                "export function f() { return g(); }",
                "ts",
            ))
            .unwrap();
        let parsed = ticket.wait().unwrap();
        assert_eq!(parsed.symbols.len(), 1);
        assert_eq!(parsed.symbols[0].name, "f");
    }

    #[test]
    fn unknown_extension_is_an_error_reply() {
        let pool = pool(1);
        let ticket = pool
            .parse(ParseJob::new("x.zig", "fn main() void {}", "zig"))
            .unwrap();
        assert!(ticket.wait().is_err());

        // Pool still works afterwards.
        let ticket = pool
            .parse(ParseJob::new("a.py", "def f():\n    pass\n", "py"))
            .unwrap();
        assert!(ticket.wait().is_ok());
    }

    #[test]
    fn task_timeout_fails_ticket_not_worker() {
        let pool = pool(1);
        let mut slow = ParseJob::new("slow", "200", "sleep");
        slow.task_timeout_ms = Some(20);
        let ticket = pool.parse(slow).unwrap();
        match ticket.wait() {
            Err(EngineError::TaskTimeout { timeout_ms }) => assert_eq!(timeout_ms, 20),
            other => panic!("expected TaskTimeout, got {other:?}"),
        }

        // The worker survives and serves the next job.
        let ticket = pool
            .parse(ParseJob::new("a.ts", "const x = 1;", "ts"))
            .unwrap();
        assert!(ticket.wait().is_ok());
    }

    #[test]
    fn queue_timeout_rejects_stale_jobs() {
        let pool = pool(1);
        // Occupy the single worker.
        let busy = pool.parse(ParseJob::new("busy", "100", "sleep")).unwrap();

        let mut stale = ParseJob::new("stale.ts", "const x = 1;", "ts");
        stale.queue_timeout_ms = Some(10);
        let ticket = pool.parse(stale).unwrap();

        match ticket.wait() {
            Err(EngineError::QueueTimeout { waited_ms }) => assert!(waited_ms >= 10),
            other => panic!("expected QueueTimeout, got {other:?}"),
        }
        busy.wait().unwrap();
    }

    #[test]
    fn clear_queue_rejects_pending_jobs() {
        let pool = pool(1);
        let busy = pool.parse(ParseJob::new("busy", "100", "sleep")).unwrap();
        let pending = pool
            .parse(ParseJob::new("p.ts", "const x = 1;", "ts"))
            .unwrap();

        pool.clear_queue("queue cleared for shutdown");

        match pending.wait() {
            Err(EngineError::General(reason)) => {
                assert!(reason.contains("queue cleared"))
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        busy.wait().unwrap();
    }

    #[test]
    fn drain_waits_for_idle() {
        let pool = pool(2);
        let tickets: Vec<_> = (0..4)
            .map(|i| {
                pool.parse(ParseJob::new(format!("f{i}"), "20", "sleep"))
                    .unwrap()
            })
            .collect();
        pool.drain();
        assert_eq!(pool.queued_count(), 0);
        assert_eq!(pool.active_count(), 0);
        for ticket in tickets {
            ticket.wait().unwrap();
        }
    }

    #[test]
    fn shutdown_refuses_new_work() {
        let mut pool = pool(1);
        pool.shutdown();
        assert!(pool.parse(ParseJob::new("a.ts", "const x = 1;", "ts")).is_err());
    }

    #[test]
    fn fifo_order_within_one_worker() {
        let pool = pool(1);
        let tickets: Vec<_> = (0..3)
            .map(|i| {
                pool.parse(ParseJob::new(
                    format!("f{i}.ts"),
                    format!("export const v{i} = {i};"),
                    "ts",
                ))
                .unwrap()
            })
            .collect();
        for (i, ticket) in tickets.into_iter().enumerate() {
            let parsed = ticket.wait().unwrap();
            assert_eq!(parsed.symbols[0].name, format!("v{i}"));
        }
    }
}
