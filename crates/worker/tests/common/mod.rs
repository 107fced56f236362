//! Shared harness for worker integration tests: in-memory backends, a
//! heartbeat-counting queue wrapper, and a scripted task function.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use simjob_core::job::Job;
use simjob_core::schema::{Field, ParamSchema};
use simjob_core::types::JobId;
use simjob_db::{JobStore, MemoryJobStore};
use simjob_events::ProgressPublisher;
use simjob_pipeline::{JobService, TaskContext, TaskError, TaskFunction};
use simjob_queue::{MemoryQueue, Message, MessageId, Queue, QueueDepth, QueueError};
use simjob_storage::MemoryObjectStore;
use simjob_worker::{Worker, WorkerConfig};

// ---------------------------------------------------------------------------
// Queue wrapper
// ---------------------------------------------------------------------------

/// [`MemoryQueue`] that counts successful heartbeats.
pub struct CountingQueue {
    inner: MemoryQueue,
    heartbeats: AtomicU32,
}

impl CountingQueue {
    pub fn heartbeats(&self) -> u32 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub async fn dead_letters(&self) -> Vec<String> {
        self.inner.dead_letters().await
    }
}

#[async_trait]
impl Queue for CountingQueue {
    async fn enqueue(&self, body: &str) -> Result<MessageId, QueueError> {
        self.inner.enqueue(body).await
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<Message>, QueueError> {
        self.inner.receive(max_wait).await
    }

    async fn heartbeat(&self, message: &Message) -> Result<(), QueueError> {
        self.inner.heartbeat(message).await?;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        self.inner.ack(message).await
    }

    async fn release(&self, message: &Message) -> Result<(), QueueError> {
        self.inner.release(message).await
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        self.inner.depth().await
    }
}

// ---------------------------------------------------------------------------
// Scripted task
// ---------------------------------------------------------------------------

/// Task whose behaviour is chosen by its params:
///
/// - `runs`: number of steps (required).
/// - `step_ms`: sleep per step (default 1).
/// - `mode`: `quarters` (progress at each quarter), `steady` (progress every
///   step), `fatal`, `transient`, or `panic`.
pub struct ScriptedTask {
    schema: ParamSchema,
}

impl ScriptedTask {
    pub fn new() -> Self {
        Self {
            schema: ParamSchema::new()
                .field(Field::integer("runs").required().min(1.0))
                .field(Field::integer("step_ms").min(0.0))
                .field(Field::string("mode").one_of([
                    json!("quarters"),
                    json!("steady"),
                    json!("fatal"),
                    json!("transient"),
                    json!("panic"),
                ])),
        }
    }
}

impl TaskFunction for ScriptedTask {
    fn name(&self) -> &str {
        "scripted"
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    fn run(&self, params: &Value, ctx: &mut TaskContext) -> Result<Value, TaskError> {
        let runs = params["runs"].as_u64().unwrap_or(1);
        let step = Duration::from_millis(params["step_ms"].as_u64().unwrap_or(1));
        let mode = params["mode"].as_str().unwrap_or("quarters");

        match mode {
            "fatal" => return Err(TaskError::Fatal("diverged".into())),
            "transient" => return Err(TaskError::Transient("scratch disk full".into())),
            "panic" => panic!("numerical blow-up"),
            _ => {}
        }

        let mut next_mark = 1;
        for run in 1..=runs {
            std::thread::sleep(step);
            if mode == "steady" {
                ctx.report_progress(run as f64 / runs as f64)?;
            } else {
                while next_mark <= 4 && run * 4 >= next_mark * runs {
                    ctx.report_progress(next_mark as f64 / 4.0)?;
                    next_mark += 1;
                }
            }
        }

        Ok(json!({ "runs": runs, "attempt": ctx.attempt() }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<CountingQueue>,
    pub objects: Arc<MemoryObjectStore>,
    pub publisher: ProgressPublisher,
    pub service: JobService,
    pub worker: Arc<Worker>,
}

impl Harness {
    /// Backends with a `visibility_ms` window, heartbeats every
    /// `heartbeat_ms`, and at most `max_attempts` claims per job.
    pub fn new(visibility_ms: u64, heartbeat_ms: u64, max_attempts: i32) -> Self {
        Self::from_config(&WorkerConfig {
            max_attempts,
            visibility_timeout: Duration::from_millis(visibility_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            max_receive_count: 10,
            ..Default::default()
        })
    }

    /// Backends wired the way the binaries wire them from a [`WorkerConfig`].
    pub fn from_config(config: &WorkerConfig) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(CountingQueue {
            inner: MemoryQueue::new(config.queue_config()),
            heartbeats: AtomicU32::new(0),
        });
        let objects = Arc::new(MemoryObjectStore::new());
        let publisher = ProgressPublisher::default();
        let task = Arc::new(ScriptedTask::new());

        let service = JobService::new(
            store.clone(),
            queue.clone(),
            publisher.clone(),
            task.schema().clone(),
        );
        let worker = Arc::new(Worker::new(
            store.clone(),
            queue.clone(),
            objects.clone(),
            publisher.clone(),
            task,
            config.settings(),
        ));

        Self {
            store,
            queue,
            objects,
            publisher,
            service,
            worker,
        }
    }

    pub async fn submit(&self, params: Value) -> JobId {
        self.service.submit(params).await.expect("submit should succeed")
    }

    /// Wait up to one second for the next delivery.
    pub async fn receive(&self) -> Message {
        self.queue
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("a message should be delivered")
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.store.get(id).await.unwrap().expect("job should exist")
    }
}
