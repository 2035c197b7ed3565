//! In-process runtime that feeds tuples to a pool of percolate bolts.
//!
//! Each worker thread owns one [`PercolateBolt`] and processes its tuples one at a
//! time; all workers share a single client handle. Tuples enter through a bounded
//! queue, so [`Topology::submit`] blocks once every worker is busy and the queue is
//! full. Everything the bolts produce comes back as [`Signal`]s on one channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::bolt::{Outcome, PercolateBolt};
use crate::client::SearchClient;
use crate::collector::{ChannelCollector, Signal};
use crate::tuple::Tuple;

/// Default number of tuples buffered per worker.
pub const DEFAULT_QUEUE_PER_WORKER: usize = 2;

/// Counters gathered across all workers.
#[derive(Debug, Default)]
struct Counters {
    acked: AtomicUsize,
    failed: AtomicUsize,
    emitted: AtomicUsize,
}

/// Totals reported once a topology has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyStats {
    /// Tuples acknowledged.
    pub acked: usize,
    /// Tuples failed.
    pub failed: usize,
    /// Output records emitted.
    pub emitted: usize,
}

/// Running pool of percolate workers.
pub struct Topology {
    input: Option<Sender<Tuple>>,
    signals: Receiver<Signal>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Topology {
    /// Starts `workers` threads dispatching through `client`.
    pub fn spawn<C>(client: Arc<C>, workers: usize, queue_depth: usize) -> Result<Self>
    where
        C: SearchClient + ?Sized + 'static,
    {
        let workers = workers.max(1);
        let (input_tx, input_rx) = bounded::<Tuple>(queue_depth.max(1));
        let (signal_tx, signal_rx) = unbounded::<Signal>();
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let bolt = PercolateBolt::new(Arc::clone(&client));
            let rx = input_rx.clone();
            let collector = ChannelCollector::new(signal_tx.clone());
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("percolate-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, bolt, rx, collector, counters))
                .with_context(|| format!("failed to spawn percolate worker {worker_id}"))?;
            handles.push(handle);
        }
        info!(workers, queue_depth, "percolate topology started");

        Ok(Self {
            input: Some(input_tx),
            signals: signal_rx,
            workers: handles,
            counters,
        })
    }

    /// Enqueues a tuple, blocking while the queue is full.
    pub fn submit(&self, tuple: Tuple) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| anyhow!("topology input already closed"))?;
        input
            .send(tuple)
            .map_err(|_| anyhow!("percolate workers stopped accepting tuples"))
    }

    /// Receiver for everything the bolts emit, ack, fail, or report.
    ///
    /// Iterating it ends once the input is closed and every worker has exited.
    pub fn signals(&self) -> &Receiver<Signal> {
        &self.signals
    }

    /// Stops accepting tuples; workers exit after draining the queue.
    pub fn close_input(&mut self) {
        drop(self.input.take());
    }

    /// Closes the input, waits for workers to drain, and returns the totals.
    ///
    /// Signals not yet received stay buffered; read them via [`Topology::signals`] first.
    pub fn finish(mut self) -> Result<TopologyStats> {
        self.close_input();
        for handle in self.workers.drain(..) {
            handle
                .join()
                .map_err(|_| anyhow!("percolate worker panicked"))?;
        }
        let stats = TopologyStats {
            acked: self.counters.acked.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            emitted: self.counters.emitted.load(Ordering::Acquire),
        };
        info!(
            acked = stats.acked,
            failed = stats.failed,
            emitted = stats.emitted,
            "percolate topology drained"
        );
        Ok(stats)
    }
}

fn worker_loop<C: SearchClient + ?Sized>(
    worker_id: usize,
    bolt: PercolateBolt<Arc<C>>,
    receiver: Receiver<Tuple>,
    mut collector: ChannelCollector,
    counters: Arc<Counters>,
) {
    for tuple in receiver.iter() {
        match bolt.execute(&tuple, &mut collector) {
            Outcome::Acked { emitted } => {
                counters.acked.fetch_add(1, Ordering::AcqRel);
                counters.emitted.fetch_add(emitted, Ordering::AcqRel);
            }
            Outcome::Failed => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    debug!(worker_id, "percolate worker exiting");
}
