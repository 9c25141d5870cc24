//! Search request building and result shaping.
//!
//! A [`Search`] pairs a [`SearchQuery`] with an optional index list and turns
//! into one backend request per [`Search::execute`] call:
//!
//! - no index list searches `_all`; an empty list is an error,
//! - `size` defaults to [`DEFAULT_SIZE`],
//! - pages are zero-based and negative pages clamp to zero,
//! - free text is escaped before it reaches `query_string`.

pub mod query;
pub mod results;

use thiserror::Error;
use tracing::debug;

use crate::backend::{Backend, BackendError, SearchRequest};

pub use query::{SearchQuery, escape};
pub use results::{Hit, Pagination, ResultEnvelope};

pub const DEFAULT_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("No indexes to search")]
    NoIndexes,

    #[error("search failed: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    query: SearchQuery,
    indexes: Option<Vec<String>>,
}

impl Search {
    pub fn new(query: SearchQuery, indexes: Option<Vec<String>>) -> Self {
        Self { query, indexes }
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    fn target(&self) -> Result<String, SearchError> {
        match &self.indexes {
            None => Ok("_all".to_string()),
            Some(list) if list.is_empty() => Err(SearchError::NoIndexes),
            Some(list) => Ok(list.join(",")),
        }
    }

    /// The request [`execute`](Self::execute) would send.
    pub fn compile(&self, size: Option<usize>, page: i64) -> Result<(SearchRequest, Pagination), SearchError> {
        let size = size.unwrap_or(DEFAULT_SIZE);
        let page = usize::try_from(page.max(0)).unwrap_or(usize::MAX);
        let from = size.saturating_mul(page);
        let request = SearchRequest {
            index: self.target()?,
            body: self.query.to_body(size, from),
        };
        Ok((request, Pagination { size, page }))
    }

    pub fn execute(
        &self,
        backend: &dyn Backend,
        size: Option<usize>,
        page: i64,
    ) -> Result<ResultEnvelope, SearchError> {
        let (request, pagination) = self.compile(size, page)?;
        debug!(index = %request.index, size = pagination.size, page = pagination.page, "search");
        let response = backend.search(&request)?;
        Ok(ResultEnvelope::from_response(pagination, &response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    #[test]
    fn missing_index_list_targets_all() {
        let (req, _) = Search::new(SearchQuery::MatchAll, None).compile(None, 0).unwrap();
        assert_eq!(req.index, "_all");
        assert_eq!(req.body["size"], DEFAULT_SIZE);
    }

    #[test]
    fn empty_index_list_is_rejected() {
        let err = Search::new(SearchQuery::MatchAll, Some(vec![]))
            .compile(None, 0)
            .unwrap_err();
        assert_eq!(err.to_string(), "No indexes to search");
    }

    #[test]
    fn negative_page_clamps_to_zero() {
        let search = Search::new(SearchQuery::text("x"), Some(vec!["a".into(), "b".into()]));
        let (neg, neg_page) = search.compile(Some(5), -5).unwrap();
        let (zero, zero_page) = search.compile(Some(5), 0).unwrap();
        assert_eq!(neg, zero);
        assert_eq!(neg_page, zero_page);
        assert_eq!(neg.index, "a,b");
        let (third, _) = search.compile(Some(5), 2).unwrap();
        assert_eq!(third.body["from"], 10);
    }

    #[test]
    fn execute_wraps_backend_response() {
        let backend = MemoryBackend::new();
        backend
            .index_document("listing", "1", &json!({"title": "red bike"}))
            .unwrap();
        backend
            .index_document("listing", "2", &json!({"title": "blue car"}))
            .unwrap();
        let env = Search::new(SearchQuery::text("bike"), Some(vec!["listing".into()]))
            .execute(&backend, None, 0)
            .unwrap();
        assert_eq!(env.total, 1);
        assert_eq!(env.hits[0].id, "1");
        assert_eq!(env.pagination, Pagination { size: 10, page: 0 });
    }
}
