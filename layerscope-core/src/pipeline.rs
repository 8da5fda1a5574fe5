//! Worker threads feeding captured frames through an [`Engine`].
//!
//! Frames go through one bounded queue shared by all workers, so a slow
//! consumer pushes back on the reader instead of buffering without limit.
//! Workers take frames in arrival order but finish them in any order; stream
//! decoders that care about segment order need a single worker.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info};

use crate::dispatch::{Frame, ParseOutcome};
use crate::engine::Engine;
use crate::error::PipelineError;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker threads (0 = one per available core)
    pub workers: usize,
    /// Frames queued before `submit` blocks
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 4096,
        }
    }
}

impl PipelineConfig {
    fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// A frame as handed over by a capture source.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Captured bytes
    pub data: Bytes,
    /// Length on the wire, at least `data.len()`
    pub wire_len: usize,
    /// Capture time in microseconds
    pub timestamp: i64,
    pub link_type: u32,
    /// Direction hint passed to decoders
    pub way: u8,
}

impl CapturedFrame {
    /// A fully captured frame.
    pub fn new(link_type: u32, timestamp: i64, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            wire_len: data.len(),
            data,
            timestamp,
            link_type,
            way: 0,
        }
    }

    pub fn with_wire_len(mut self, wire_len: usize) -> Self {
        self.wire_len = wire_len;
        self
    }

    pub fn with_way(mut self, way: u8) -> Self {
        self.way = way;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    parsed: AtomicU64,
    truncated: AtomicU64,
    malformed: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &ParseOutcome<'_>, captured: usize) {
        let counter = match outcome {
            ParseOutcome::Parsed(_) => &self.parsed,
            ParseOutcome::Truncated { .. } => &self.truncated,
            ParseOutcome::Malformed { .. } => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(captured as u64, Ordering::Relaxed);
    }
}

/// Pipeline counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub parsed: u64,
    pub truncated: u64,
    pub malformed: u64,
    /// Captured bytes decoded
    pub bytes: u64,
}

impl PipelineStats {
    /// Frames the workers finished.
    pub fn processed(&self) -> u64 {
        self.parsed + self.truncated + self.malformed
    }
}

/// A pool of workers decoding frames on a shared engine.
pub struct Pipeline {
    engine: Arc<Engine>,
    tx: Option<Sender<CapturedFrame>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Pipeline {
    pub fn new(engine: Arc<Engine>, config: PipelineConfig) -> Result<Self, PipelineError> {
        let count = config.worker_count();
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        info!(
            workers = count,
            queue_capacity = config.queue_capacity,
            "starting pipeline"
        );

        let mut pipeline = Self {
            engine,
            tx: Some(tx),
            workers: Vec::with_capacity(count),
            counters: Arc::new(Counters::default()),
        };
        for id in 0..count {
            match pipeline.spawn_worker(id, rx.clone()) {
                Ok(handle) => pipeline.workers.push(handle),
                Err(e) => {
                    pipeline.close();
                    return Err(PipelineError::Spawn(e));
                }
            }
        }
        Ok(pipeline)
    }

    pub fn with_defaults(engine: Arc<Engine>) -> Result<Self, PipelineError> {
        Self::new(engine, PipelineConfig::default())
    }

    fn spawn_worker(
        &self,
        id: usize,
        rx: Receiver<CapturedFrame>,
    ) -> std::io::Result<JoinHandle<()>> {
        let engine = self.engine.clone();
        let counters = self.counters.clone();
        thread::Builder::new()
            .name(format!("layerscope-worker-{id}"))
            .spawn(move || {
                debug!(worker = id, "worker starting");
                let mut frames = 0u64;
                // Ends once the sender is gone and the queue is drained.
                for captured in rx.iter() {
                    let frame = Frame::new(&captured.data, captured.wire_len);
                    let outcome =
                        engine.dissect(captured.link_type, captured.way, frame, captured.timestamp);
                    counters.record(&outcome, captured.data.len());
                    frames += 1;
                }
                debug!(worker = id, frames, "worker finished");
            })
    }

    /// Queue a frame, waiting while the queue is full.
    pub fn submit(&self, frame: CapturedFrame) -> Result<(), PipelineError> {
        let tx = self.tx.as_ref().ok_or(PipelineError::Closed)?;
        tx.send(frame).map_err(|_| PipelineError::Closed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue a frame if there is room right now.
    pub fn try_submit(&self, frame: CapturedFrame) -> Result<(), PipelineError> {
        let tx = self.tx.as_ref().ok_or(PipelineError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PipelineError::Full,
            TrySendError::Disconnected(_) => PipelineError::Closed,
        })?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Frames waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            parsed: c.parsed.load(Ordering::Relaxed),
            truncated: c.truncated.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting frames, let the workers drain the queue and wait for
    /// them.
    pub fn shutdown(mut self) -> PipelineStats {
        self.close();
        let stats = self.stats();
        info!(
            processed = stats.processed(),
            truncated = stats.truncated,
            malformed = stats.malformed,
            "pipeline shut down"
        );
        stats
    }

    fn close(&mut self) {
        self.tx = None;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                error!(worker = ?name, "worker panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workers", &self.workers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::protocol::test_utils::udp_frame;
    use crate::protocol::LINKTYPE_ETHERNET;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::with_default_decoders(EngineConfig::default()).unwrap())
    }

    fn dns_frame(id: u16) -> Vec<u8> {
        let mut query = id.to_be_bytes().to_vec();
        query.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        query.extend_from_slice(b"\x01a\x00\x00\x01\x00\x01");
        udp_frame(([10, 0, 0, 1], 1024 + id), ([10, 0, 0, 2], 53), &query)
    }

    #[test]
    fn test_pipeline_processes_everything() {
        let engine = engine();
        let pipeline = Pipeline::new(
            engine.clone(),
            PipelineConfig {
                workers: 4,
                queue_capacity: 8,
            },
        )
        .unwrap();
        assert_eq!(pipeline.workers(), 4);

        for i in 0..200u16 {
            let bytes = dns_frame(i);
            let mut frame = CapturedFrame::new(LINKTYPE_ETHERNET, i64::from(i), bytes.clone());
            if i % 10 == 0 {
                // Cut inside the IPv4 header.
                frame = CapturedFrame::new(LINKTYPE_ETHERNET, i64::from(i), bytes[..20].to_vec())
                    .with_wire_len(bytes.len());
            }
            pipeline.submit(frame).unwrap();
        }

        let stats = pipeline.shutdown();
        assert_eq!(stats.submitted, 200);
        assert_eq!(stats.processed(), 200);
        assert_eq!(stats.truncated, 20);
        assert_eq!(stats.parsed, 180);
        assert_eq!(engine.stats().packets(), 200);
        assert_eq!(engine.stats().flows, 180);
    }

    #[test]
    fn test_submit_after_close_fails() {
        let mut pipeline = Pipeline::new(
            engine(),
            PipelineConfig {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();
        pipeline.close();
        let frame = CapturedFrame::new(LINKTYPE_ETHERNET, 0, vec![0u8; 14]);
        assert!(matches!(
            pipeline.submit(frame.clone()),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(
            pipeline.try_submit(frame),
            Err(PipelineError::Closed)
        ));
    }

    #[test]
    fn test_default_worker_count() {
        assert!(PipelineConfig::default().worker_count() >= 1);
        let config = PipelineConfig {
            workers: 3,
            ..PipelineConfig::default()
        };
        assert_eq!(config.worker_count(), 3);
    }
}
