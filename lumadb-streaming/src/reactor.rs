//! Thread-per-core reactor that dispatches produce/fetch work to the
//! `TopicManager`, keeping CPU-bound record encode/decode off the async
//! runtime (spec §5: "CPU-bound work...may run on a worker pool").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Sender};
use lumadb_common::{Header, Offset, PartitionId, Timestamp};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::topic_manager::TopicManager;

/// Work item dispatched to one core's worker thread.
pub enum Task {
    Produce {
        topic: String,
        partition: PartitionId,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
        timestamp: Option<Timestamp>,
        response_tx: Sender<lumadb_common::Result<Offset>>,
    },
    Fetch {
        topic: String,
        partition: PartitionId,
        offset: Offset,
        max_bytes: u64,
        response_tx: Sender<lumadb_common::Result<Vec<u8>>>,
    },
    Shutdown,
}

struct Worker {
    task_tx: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

/// Thread-per-core reactor. Each worker thread owns a channel; partitions
/// are pinned to a core by `partition % num_cores` so one partition's work
/// is always handled by the same thread (spec §9 per-partition ownership).
pub struct Reactor {
    num_cores: usize,
    workers: RwLock<Vec<Worker>>,
    running: Arc<AtomicBool>,
}

impl Reactor {
    #[must_use]
    pub fn new() -> Self {
        let num_cores = num_cpus::get().max(1);
        info!(num_cores, "initializing reactor");
        Self {
            num_cores,
            workers: RwLock::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self, topic_manager: Arc<TopicManager>) {
        self.running.store(true, Ordering::SeqCst);

        let mut workers = self.workers.write();
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        for (i, core_id) in core_ids.into_iter().enumerate().take(self.num_cores) {
            let (task_tx, task_rx): (Sender<Task>, Receiver<Task>) = bounded(10_000);
            let running = Arc::clone(&self.running);
            let topic_manager = Arc::clone(&topic_manager);

            let handle = std::thread::spawn(move || {
                core_affinity::set_for_current(core_id);
                debug!(worker = i, core = ?core_id, "worker pinned");

                while running.load(Ordering::SeqCst) {
                    match task_rx.recv_timeout(std::time::Duration::from_millis(100)) {
                        Ok(Task::Shutdown) => break,
                        Ok(task) => Self::handle_task(&topic_manager, task),
                        Err(_) => continue,
                    }
                }
                debug!(worker = i, "worker shutting down");
            });

            workers.push(Worker {
                task_tx,
                handle: Some(handle),
            });
        }
    }

    fn handle_task(topic_manager: &TopicManager, task: Task) {
        match task {
            Task::Produce {
                topic,
                partition,
                key,
                value,
                headers,
                timestamp,
                response_tx,
            } => {
                let result = topic_manager
                    .get_log(&topic, partition)
                    .and_then(|log| log.lock().append(key, value, headers, timestamp));
                let _ = response_tx.send(result);
            }
            Task::Fetch {
                topic,
                partition,
                offset,
                max_bytes,
                response_tx,
            } => {
                let result = topic_manager.get_log(&topic, partition).and_then(|log| {
                    let log = log.lock();
                    let region = log.read_range(offset, max_bytes)?;
                    if region.length == 0 {
                        return Ok(Vec::new());
                    }
                    std::fs::read(&region.path).map(|bytes| {
                        bytes[region.position as usize..(region.position + region.length) as usize].to_vec()
                    }).map_err(lumadb_common::Error::from)
                });
                let _ = response_tx.send(result);
            }
            Task::Shutdown => {}
        }
    }

    pub fn submit(&self, task: Task) -> Result<(), String> {
        let workers = self.workers.read();
        if workers.is_empty() {
            return Err("reactor not started".into());
        }
        let core = self.core_for(&task);
        workers[core].task_tx.send(task).map_err(|e| e.to_string())
    }

    fn core_for(&self, task: &Task) -> usize {
        let partition = match task {
            Task::Produce { partition, .. } | Task::Fetch { partition, .. } => *partition,
            Task::Shutdown => 0,
        };
        self.core_for_partition(partition)
    }

    #[must_use]
    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    #[must_use]
    pub fn core_for_partition(&self, partition: PartitionId) -> usize {
        let workers = self.num_cores.max(1);
        (partition as usize) % workers
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut workers = self.workers.write();
        for worker in workers.iter() {
            let _ = worker.task_tx.send(Task::Shutdown);
        }
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        workers.clear();
        info!("reactor stopped");
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}
