//! The search-client seam the percolate stage dispatches through.

use std::sync::Arc;

use crate::error::QueryError;
use crate::tuple::MatchId;

/// Anything able to run a percolate query and report which stored queries matched.
///
/// Implementations own their connection lifecycle; the stage only borrows the handle.
pub trait SearchClient: Send + Sync {
    /// Percolates `document` against the stored queries of `index`/`doc_type`.
    ///
    /// Blocks until the cluster answers. Match order is whatever the backend returns.
    fn execute_percolate(
        &self,
        index: &str,
        doc_type: &str,
        document: &str,
    ) -> Result<Vec<MatchId>, QueryError>;
}

impl<C: SearchClient + ?Sized> SearchClient for Arc<C> {
    fn execute_percolate(
        &self,
        index: &str,
        doc_type: &str,
        document: &str,
    ) -> Result<Vec<MatchId>, QueryError> {
        (**self).execute_percolate(index, doc_type, document)
    }
}

impl<C: SearchClient + ?Sized> SearchClient for &C {
    fn execute_percolate(
        &self,
        index: &str,
        doc_type: &str,
        document: &str,
    ) -> Result<Vec<MatchId>, QueryError> {
        (**self).execute_percolate(index, doc_type, document)
    }
}
