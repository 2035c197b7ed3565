//! Blocking Elasticsearch client that answers percolate queries over HTTP.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::client::SearchClient;
use crate::config::{EsConfig, PercolateApi};
use crate::error::QueryError;
use crate::tuple::MatchId;

/// Percolate client that talks to one or more Elasticsearch nodes.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct EsPercolateClient {
    client: Client,
    nodes: Vec<Url>,
    credentials: Option<(String, String)>,
    api: PercolateApi,
    max_matches: usize,
    max_retries: usize,
}

impl EsPercolateClient {
    /// Builds an HTTP client from validated configuration.
    pub fn new(config: &EsConfig) -> Result<Self> {
        anyhow::ensure!(!config.nodes().is_empty(), "at least one node is required");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .context("failed to build Elasticsearch HTTP client")?;
        Ok(Self {
            client,
            nodes: config.nodes().to_vec(),
            credentials: config.credentials().cloned(),
            api: config.api().clone(),
            max_matches: config.max_matches(),
            max_retries: config.max_retries().max(1),
        })
    }

    /// Nodes tried, in order, for every request.
    pub fn nodes(&self) -> &[Url] {
        &self.nodes
    }

    fn send_to_nodes(
        &self,
        index: &str,
        doc_type: &str,
        body: &serde_json::Value,
    ) -> Result<String, Attempt> {
        let mut last_error = None;
        for node in &self.nodes {
            let url = endpoint(node, &self.api, index, doc_type).map_err(Attempt::Fatal)?;
            let mut request = self.client.post(url).json(body);
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, Some(password));
            }
            match request.send() {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if status.is_success() {
                        return Ok(text);
                    }
                    let err = QueryError::Status {
                        status: status.as_u16(),
                        body: text,
                    };
                    return Err(if should_retry(status) {
                        Attempt::Retryable(err)
                    } else {
                        Attempt::Fatal(err)
                    });
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    debug!(
                        node = %node,
                        error = %err,
                        "node unreachable or timed out, trying next"
                    );
                    last_error = Some(QueryError::Transport(err.to_string()));
                }
                Err(err) => {
                    let retryable = err.is_request() || err.is_body();
                    let err = QueryError::Transport(err.to_string());
                    return Err(if retryable {
                        Attempt::Retryable(err)
                    } else {
                        Attempt::Fatal(err)
                    });
                }
            }
        }
        Err(Attempt::Retryable(last_error.unwrap_or(QueryError::NoNodes)))
    }
}

impl SearchClient for EsPercolateClient {
    fn execute_percolate(
        &self,
        index: &str,
        doc_type: &str,
        document: &str,
    ) -> Result<Vec<MatchId>, QueryError> {
        let doc: serde_json::Value =
            serde_json::from_str(document).map_err(QueryError::InvalidDocument)?;
        let body = request_body(&self.api, doc, self.max_matches);

        let mut attempt = 0usize;
        loop {
            match self.send_to_nodes(index, doc_type, &body) {
                Ok(text) => return parse_matches(&self.api, &text),
                Err(Attempt::Retryable(err)) if attempt + 1 < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "retrying percolate request");
                    thread::sleep(retry_backoff(attempt));
                }
                Err(Attempt::Retryable(err)) | Err(Attempt::Fatal(err)) => return Err(err),
            }
        }
    }
}

enum Attempt {
    Retryable(QueryError),
    Fatal(QueryError),
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Builds the request URL for `index`/`doc_type` on `node`, escaping each path segment.
fn endpoint(
    node: &Url,
    api: &PercolateApi,
    index: &str,
    doc_type: &str,
) -> Result<Url, QueryError> {
    let mut url = node.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| QueryError::Transport(format!("node url {node} cannot be a base")))?;
        segments.pop_if_empty();
        match api {
            PercolateApi::Legacy => {
                segments.extend([index, doc_type, "_percolate"]);
            }
            PercolateApi::Query { .. } => {
                segments.extend([index, "_search"]);
            }
        }
    }
    Ok(url)
}

fn request_body(
    api: &PercolateApi,
    doc: serde_json::Value,
    max_matches: usize,
) -> serde_json::Value {
    match api {
        PercolateApi::Legacy => json!({ "doc": doc }),
        PercolateApi::Query { field } => json!({
            "size": max_matches,
            "_source": false,
            "query": {
                "percolate": {
                    "field": field,
                    "document": doc,
                }
            }
        }),
    }
}

fn parse_matches(api: &PercolateApi, body: &str) -> Result<Vec<MatchId>, QueryError> {
    let hits = match api {
        PercolateApi::Legacy => {
            serde_json::from_str::<LegacyResponse>(body)
                .map_err(|err| QueryError::Decode(err.to_string()))?
                .matches
        }
        PercolateApi::Query { .. } => {
            let hits = serde_json::from_str::<SearchResponse>(body)
                .map_err(|err| QueryError::Decode(err.to_string()))?
                .hits;
            if let Some(total) = truncated_total(&hits) {
                warn!(
                    total,
                    returned = hits.hits.len(),
                    "percolate matches truncated; raise max_matches to see all"
                );
            }
            hits.hits
        }
    };
    Ok(hits.into_iter().map(|hit| MatchId(hit.id)).collect())
}

#[derive(Debug, Deserialize)]
struct LegacyResponse {
    #[serde(default)]
    matches: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<HitsTotal>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is a bare number before 7.x and `{"value": n, "relation": ..}` after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Count(u64),
    Tracked { value: u64 },
}

impl HitsTotal {
    fn value(&self) -> u64 {
        match self {
            Self::Count(value) | Self::Tracked { value } => *value,
        }
    }
}

/// Total match count when the cluster found more matches than it returned.
fn truncated_total(hits: &Hits) -> Option<u64> {
    let total = hits.total.as_ref()?.value();
    (total > hits.hits.len() as u64).then_some(total)
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}
