//! Construction pipeline: a bounded queue feeding one writer thread
//!
//! The tree has a single mutator. Producers hand finished intervals to
//! `HistoryPipeline`, which queues them on a bounded channel; one worker
//! thread drains the queue and performs every insert. Queries go straight
//! to the tree and may run while the build is in flight.
//!
//! Commands are an explicit enum. There are no in-band sentinel values:
//! drain and shutdown are their own variants, each carrying an ack channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::interval::Interval;
use crate::history::tree::HistoryTree;
use crate::history::value::StateValue;

/// What producers can ask of the writer thread
enum Command {
    Insert(Interval),
    /// Reply once every command queued before this one has been applied
    Drain(Sender<()>),
    /// Close the tree at `end_time`, reply, and stop
    Close { end_time: i64, ack: Sender<()> },
}

/// Handle over the build of one history tree
pub struct HistoryPipeline {
    queue_capacity: usize,
    inner: Mutex<Option<Worker>>,
}

struct Worker {
    tx: Sender<Command>,
    handle: JoinHandle<HistoryResult<()>>,
    tree: Arc<HistoryTree>,
}

impl HistoryPipeline {
    /// A detached pipeline. Events are dropped with a warning until a tree
    /// is attached.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            inner: Mutex::new(None),
        }
    }

    /// Attach the tree to build and start the writer thread
    pub fn attach(&self, tree: Arc<HistoryTree>) -> HistoryResult<()> {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(HistoryError::Pipeline(
                "a tree is already attached".into(),
            ));
        }

        let (tx, rx) = bounded(self.queue_capacity);
        let worker_tree = Arc::clone(&tree);
        let handle = thread::Builder::new()
            .name("history-writer".into())
            .spawn(move || writer_loop(rx, worker_tree))
            .map_err(|e| HistoryError::Pipeline(format!("failed to spawn writer: {}", e)))?;

        info!(capacity = self.queue_capacity, "history pipeline started");
        *inner = Some(Worker { tx, handle, tree });
        Ok(())
    }

    /// The tree being built, if one is attached
    pub fn tree(&self) -> Option<Arc<HistoryTree>> {
        self.inner.lock().as_ref().map(|w| Arc::clone(&w.tree))
    }

    /// Queue one state interval for insertion. Blocks when the queue is
    /// full, which is the backpressure mechanism.
    ///
    /// Without an attached tree this is a local no-op: the event is logged
    /// and dropped.
    pub fn insert_past_state(
        &self,
        start: i64,
        end: i64,
        quark: u32,
        value: StateValue,
    ) -> HistoryResult<()> {
        let interval = Interval::new(start, end, quark, value)?;

        let inner = self.inner.lock();
        let Some(worker) = inner.as_ref() else {
            warn!(quark, start, end, "no tree attached, dropping state interval");
            return Ok(());
        };
        worker
            .tx
            .send(Command::Insert(interval))
            .map_err(|_| HistoryError::Pipeline("writer thread is gone".into()))
    }

    /// Block until every previously queued event has been applied to the
    /// tree
    pub fn drain(&self) -> HistoryResult<()> {
        let inner = self.inner.lock();
        let Some(worker) = inner.as_ref() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = bounded(1);
        worker
            .tx
            .send(Command::Drain(ack_tx))
            .map_err(|_| HistoryError::Pipeline("writer thread is gone".into()))?;
        ack_rx
            .recv()
            .map_err(|_| HistoryError::Pipeline("writer stopped before draining".into()))
    }

    /// Flush the queue, close the tree at `end_time` and stop the writer.
    ///
    /// A writer that died early is reported as a pipeline error; whatever
    /// it managed to write stays on disk, detectably incomplete.
    pub fn close(&self, end_time: i64) -> HistoryResult<()> {
        let worker = self
            .inner
            .lock()
            .take()
            .ok_or_else(|| HistoryError::Pipeline("no tree attached".into()))?;

        let (ack_tx, ack_rx) = bounded(1);
        let send_failed = worker
            .tx
            .send(Command::Close {
                end_time,
                ack: ack_tx,
            })
            .is_err();
        if !send_failed {
            // The ack only tells us the worker got there; the join result
            // carries its actual outcome
            let _ = ack_rx.recv();
        }

        match worker.handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("history writer thread panicked");
                Err(HistoryError::Pipeline("writer thread panicked".into()))
            }
        }
    }
}

/// The writer thread: sole mutator of the tree
fn writer_loop(rx: Receiver<Command>, tree: Arc<HistoryTree>) -> HistoryResult<()> {
    let mut inserted: u64 = 0;
    for command in rx {
        match command {
            Command::Insert(interval) => {
                if let Err(e) = tree.insert(interval) {
                    error!(error = %e, "history insert failed, stopping build");
                    return Err(e);
                }
                inserted += 1;
            }
            Command::Drain(ack) => {
                // Channel order guarantees everything before this point has
                // been applied
                let _ = ack.send(());
            }
            Command::Close { end_time, ack } => {
                let result = tree.close(end_time);
                let _ = ack.send(());
                info!(inserted, end_time, "history writer finished");
                return result;
            }
        }
    }
    warn!(inserted, "pipeline dropped without close, tree left incomplete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tree::TreeParams;
    use tempfile::tempdir;

    fn params() -> TreeParams {
        TreeParams {
            block_size: 512,
            max_children: 4,
            provider_version: 1,
            cache_slots: 16,
        }
    }

    #[test]
    fn test_detached_pipeline_drops_events() {
        let pipeline = HistoryPipeline::new(8);
        pipeline
            .insert_past_state(0, 10, 1, StateValue::Null)
            .unwrap();
        pipeline.drain().unwrap();
        assert!(pipeline.tree().is_none());
    }

    #[test]
    fn test_build_through_pipeline() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(HistoryTree::create(dir.path().join("t.ht"), 0, params()).unwrap());

        let pipeline = HistoryPipeline::new(64);
        pipeline.attach(Arc::clone(&tree)).unwrap();

        for i in 0..400i64 {
            pipeline
                .insert_past_state(i * 10, i * 10 + 9, (i % 3) as u32, StateValue::Long(i))
                .unwrap();
        }
        pipeline.close(4000).unwrap();

        assert!(tree.is_complete());
        assert_eq!(tree.interval_count(), 400);
        let hit = tree.query_state(0, 5).unwrap().unwrap();
        assert_eq!(hit.value, StateValue::Long(0));
    }

    #[test]
    fn test_drain_makes_inserts_visible() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(HistoryTree::create(dir.path().join("t.ht"), 0, params()).unwrap());

        // Tiny queue so the producer actually blocks on backpressure
        let pipeline = HistoryPipeline::new(10);
        pipeline.attach(Arc::clone(&tree)).unwrap();

        for i in 0..1000i64 {
            pipeline
                .insert_past_state(i, i, 1, StateValue::Int(i as i32))
                .unwrap();
        }
        pipeline.drain().unwrap();

        // Queries against the in-flight tree see everything drained
        assert_eq!(tree.interval_count(), 1000);
        let hit = tree.query_state(1, 999).unwrap().unwrap();
        assert_eq!(hit.value, StateValue::Int(999));

        pipeline.close(1000).unwrap();
    }

    #[test]
    fn test_concurrent_readers_see_only_whole_intervals() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let dir = tempdir().unwrap();
        let tree = Arc::new(HistoryTree::create(dir.path().join("t.ht"), 0, params()).unwrap());

        let pipeline = HistoryPipeline::new(64);
        pipeline.attach(Arc::clone(&tree)).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..3 {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            readers.push(thread::spawn(move || {
                let mut hits = 0usize;
                while !done.load(Ordering::Relaxed) {
                    let upper = tree.end_time();
                    for t in (0..=upper).step_by(37) {
                        if let Some(hit) = tree.query_state(1, t).unwrap() {
                            assert!(hit.start <= hit.end);
                            assert!(hit.contains(t));
                            assert_eq!(hit.quark, 1);
                            assert_eq!(hit.value, StateValue::Long(hit.start));
                            hits += 1;
                        }
                    }
                    let mut previous_end = i64::MIN;
                    for item in tree.query_range(1, 0, upper).unwrap() {
                        let interval = item.unwrap();
                        assert!(interval.start <= interval.end);
                        assert!(interval.start > previous_end);
                        previous_end = interval.end;
                    }
                }
                hits
            }));
        }

        // Small block size, so splits and node writes happen while the
        // readers are descending
        for i in 0..2000i64 {
            pipeline
                .insert_past_state(i, i, 1, StateValue::Long(i))
                .unwrap();
        }
        pipeline.close(2000).unwrap();
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(tree.interval_count(), 2000);
        assert!(tree.is_complete());
    }

    #[test]
    fn test_double_attach_rejected() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(HistoryTree::create(dir.path().join("t.ht"), 0, params()).unwrap());

        let pipeline = HistoryPipeline::new(8);
        pipeline.attach(Arc::clone(&tree)).unwrap();
        assert!(matches!(
            pipeline.attach(tree).unwrap_err(),
            HistoryError::Pipeline(_)
        ));
        pipeline.close(0).unwrap();
    }

    #[test]
    fn test_close_without_attach_fails() {
        let pipeline = HistoryPipeline::new(8);
        assert!(matches!(
            pipeline.close(0).unwrap_err(),
            HistoryError::Pipeline(_)
        ));
    }

    #[test]
    fn test_invalid_interval_rejected_at_submit() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(HistoryTree::create(dir.path().join("t.ht"), 0, params()).unwrap());

        let pipeline = HistoryPipeline::new(8);
        pipeline.attach(tree).unwrap();
        assert!(matches!(
            pipeline
                .insert_past_state(10, 5, 1, StateValue::Null)
                .unwrap_err(),
            HistoryError::InvalidInterval(_)
        ));
        pipeline.close(0).unwrap();
    }
}
