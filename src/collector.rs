//! Runtime-facing output side of the stage: emissions plus ack/fail bookkeeping.

use crossbeam_channel::Sender;

use crate::tuple::{MessageId, OutputRecord, Tuple};

/// Receives everything a bolt produces for one input tuple.
pub trait OutputCollector {
    /// Emits `record` downstream, anchored to the input tuple `anchor`.
    fn emit(&mut self, anchor: &Tuple, record: OutputRecord);
    /// Marks `tuple` as fully processed.
    fn ack(&mut self, tuple: &Tuple);
    /// Marks `tuple` as failed so the runtime can replay or route it.
    fn fail(&mut self, tuple: &Tuple);
    /// Best-effort diagnostic for the runtime's error channel.
    fn report_error(&mut self, error: &dyn std::error::Error);
}

/// Everything a collector can observe, flattened into messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// One output record anchored to an input message.
    Emit {
        /// Anchor message id.
        anchor: MessageId,
        /// Emitted record.
        record: OutputRecord,
    },
    /// The input message completed.
    Ack(MessageId),
    /// The input message failed.
    Fail(MessageId),
    /// Rendered error report.
    ReportError(String),
}

/// Collector that records signals in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct VecCollector {
    signals: Vec<Signal>,
}

impl VecCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals observed so far.
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Consumes the collector, yielding its signals.
    pub fn into_signals(self) -> Vec<Signal> {
        self.signals
    }
}

impl OutputCollector for VecCollector {
    fn emit(&mut self, anchor: &Tuple, record: OutputRecord) {
        self.signals.push(Signal::Emit {
            anchor: anchor.id(),
            record,
        });
    }

    fn ack(&mut self, tuple: &Tuple) {
        self.signals.push(Signal::Ack(tuple.id()));
    }

    fn fail(&mut self, tuple: &Tuple) {
        self.signals.push(Signal::Fail(tuple.id()));
    }

    fn report_error(&mut self, error: &dyn std::error::Error) {
        self.signals.push(Signal::ReportError(error.to_string()));
    }
}

/// Collector forwarding every signal over a channel to the host runtime.
///
/// A closed channel means the runtime is gone; signals are dropped in that case.
#[derive(Debug, Clone)]
pub struct ChannelCollector {
    tx: Sender<Signal>,
}

impl ChannelCollector {
    /// Wraps the runtime's signal sender.
    pub fn new(tx: Sender<Signal>) -> Self {
        Self { tx }
    }

    fn send(&self, signal: Signal) {
        if self.tx.send(signal).is_err() {
            tracing::debug!("signal receiver dropped; discarding signal");
        }
    }
}

impl OutputCollector for ChannelCollector {
    fn emit(&mut self, anchor: &Tuple, record: OutputRecord) {
        self.send(Signal::Emit {
            anchor: anchor.id(),
            record,
        });
    }

    fn ack(&mut self, tuple: &Tuple) {
        self.send(Signal::Ack(tuple.id()));
    }

    fn fail(&mut self, tuple: &Tuple) {
        self.send(Signal::Fail(tuple.id()));
    }

    fn report_error(&mut self, error: &dyn std::error::Error) {
        self.send(Signal::ReportError(error.to_string()));
    }
}
