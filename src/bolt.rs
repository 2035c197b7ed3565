//! The percolate bolt: one input tuple in, one output tuple per matching stored query out.

use tracing::{debug, warn};

use crate::client::SearchClient;
use crate::collector::OutputCollector;
use crate::error::DispatchError;
use crate::tuple::{Fields, OutputRecord, PercolateRequest, Tuple, ID_FIELD};

/// Terminal state of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The tuple was acknowledged after emitting `emitted` records.
    Acked {
        /// Number of output records emitted before the ack.
        emitted: usize,
    },
    /// The tuple was failed; nothing was emitted.
    Failed,
}

/// Stream stage that percolates each tuple's `source` against `index`/`type`.
///
/// The search client is injected and may be shared across many bolt instances.
#[derive(Debug, Clone)]
pub struct PercolateBolt<C> {
    client: C,
}

impl<C: SearchClient> PercolateBolt<C> {
    /// Builds a bolt dispatching through `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Output schema: a single `id` field.
    pub fn declare_output_fields(&self) -> Fields {
        Fields::new([ID_FIELD])
    }

    /// Extracts the request, runs the query, and maps matches to output records.
    ///
    /// Performs no signalling; see [`PercolateBolt::execute`] for the runtime boundary.
    pub fn dispatch(&self, tuple: &Tuple) -> Result<Vec<OutputRecord>, DispatchError> {
        let request = PercolateRequest::try_from(tuple)?;
        debug!(
            message_id = tuple.id(),
            index = request.index,
            doc_type = request.doc_type,
            "dispatching percolate query"
        );
        let matches =
            self.client
                .execute_percolate(request.index, request.doc_type, request.source)?;
        Ok(matches.into_iter().map(OutputRecord::from).collect())
    }

    /// Processes one tuple to completion, emitting matches and exactly one ack or fail.
    pub fn execute<O: OutputCollector + ?Sized>(
        &self,
        tuple: &Tuple,
        collector: &mut O,
    ) -> Outcome {
        match self.dispatch(tuple) {
            Ok(records) => {
                let emitted = records.len();
                for record in records {
                    collector.emit(tuple, record);
                }
                collector.ack(tuple);
                debug!(message_id = tuple.id(), emitted, "tuple acked");
                Outcome::Acked { emitted }
            }
            Err(err) => {
                warn!(
                    message_id = tuple.id(),
                    kind = err.kind(),
                    error = %err,
                    "percolate dispatch failed"
                );
                collector.report_error(&err);
                collector.fail(tuple);
                Outcome::Failed
            }
        }
    }
}
