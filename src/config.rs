//! Cluster connection settings and the command-line surface that produces them.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use url::Url;

/// Default Elasticsearch node when nothing else is configured.
pub const DEFAULT_NODE: &str = "http://127.0.0.1:9200";
/// Default percolator field used by the query-style API.
pub const DEFAULT_PERCOLATOR_FIELD: &str = "query";
/// Default cap on matches returned by the query-style API.
pub const DEFAULT_MAX_MATCHES: usize = 1000;

/// Which percolate endpoint the cluster exposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PercolateApi {
    /// `/{index}/{type}/_percolate` endpoint of 1.x/2.x clusters.
    Legacy,
    /// `percolate` query sent to `/{index}/_search` (5.x and later).
    Query {
        /// Mapping field of type `percolator` holding the stored queries.
        field: String,
    },
}

/// Validated settings for [`EsPercolateClient`](crate::EsPercolateClient).
#[derive(Clone, Debug)]
pub struct EsConfig {
    nodes: Vec<Url>,
    timeout: Duration,
    max_retries: usize,
    credentials: Option<(String, String)>,
    api: PercolateApi,
    max_matches: usize,
}

impl EsConfig {
    /// Starts a builder with default timeout, retries, and API flavour, and no nodes.
    pub fn builder() -> EsConfigBuilder {
        EsConfigBuilder::default()
    }

    /// Node base URLs, tried in order.
    pub fn nodes(&self) -> &[Url] {
        &self.nodes
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempts per query for transient failures (1 = no retry).
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Basic-auth user and password.
    pub fn credentials(&self) -> Option<&(String, String)> {
        self.credentials.as_ref()
    }

    /// Percolate API flavour.
    pub fn api(&self) -> &PercolateApi {
        &self.api
    }

    /// Maximum matches requested per query (query-style API only).
    pub fn max_matches(&self) -> usize {
        self.max_matches
    }
}

/// Incremental construction of an [`EsConfig`].
#[derive(Clone, Debug)]
pub struct EsConfigBuilder {
    nodes: Vec<Url>,
    timeout: Duration,
    max_retries: usize,
    credentials: Option<(String, String)>,
    api: PercolateApi,
    max_matches: usize,
}

impl Default for EsConfigBuilder {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            timeout: Duration::from_secs(30),
            max_retries: 1,
            credentials: None,
            api: PercolateApi::Legacy,
            max_matches: DEFAULT_MAX_MATCHES,
        }
    }
}

impl EsConfigBuilder {
    /// Adds one node; must be an http(s) URL.
    pub fn node(mut self, node: &str) -> Result<Self> {
        let node = node.trim();
        let url = Url::parse(node).with_context(|| format!("invalid node url `{node}`"))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "node url `{node}` must use http or https"
        );
        self.nodes.push(url);
        Ok(self)
    }

    /// Adds every node in a comma separated list, skipping blanks.
    pub fn nodes_csv(mut self, nodes: &str) -> Result<Self> {
        for node in nodes.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            self = self.node(node)?;
        }
        Ok(self)
    }

    /// Per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attempts per query; clamped to at least one.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Basic-auth credentials.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Percolate API flavour.
    pub fn api(mut self, api: PercolateApi) -> Self {
        self.api = api;
        self
    }

    /// Maximum matches requested per query; clamped to at least one.
    pub fn max_matches(mut self, max_matches: usize) -> Self {
        self.max_matches = max_matches.max(1);
        self
    }

    /// Finishes the config; at least one node is required.
    pub fn build(self) -> Result<EsConfig> {
        anyhow::ensure!(!self.nodes.is_empty(), "at least one Elasticsearch node is required");
        if let PercolateApi::Query { field } = &self.api {
            anyhow::ensure!(!field.trim().is_empty(), "percolator field must not be empty");
        }
        Ok(EsConfig {
            nodes: self.nodes,
            timeout: self.timeout,
            max_retries: self.max_retries,
            credentials: self.credentials,
            api: self.api,
            max_matches: self.max_matches,
        })
    }
}

/// Command-line selector for [`PercolateApi`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PercolateApiArg {
    /// Use the `_percolate` endpoint with document types.
    Legacy,
    /// Use a `percolate` query against `_search`.
    Query,
}

/// Cluster options shared by binaries that talk to Elasticsearch.
#[derive(Args, Debug, Clone)]
pub struct EsArgs {
    /// Elasticsearch node URLs, comma separated
    #[arg(long, env = "ES_NODES", default_value = DEFAULT_NODE)]
    pub nodes: String,

    /// Seconds to wait for each percolate request
    #[arg(long, env = "PERCOLATE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts per query for rate limits, 5xx, and unreachable clusters
    #[arg(long, env = "PERCOLATE_MAX_RETRIES", default_value_t = 1)]
    pub max_retries: usize,

    /// Basic-auth user
    #[arg(long, env = "ES_USERNAME", requires = "password")]
    pub username: Option<String>,

    /// Basic-auth password
    #[arg(long, env = "ES_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,

    /// Percolate API flavour exposed by the cluster
    #[arg(long, env = "PERCOLATE_API", value_enum, default_value = "legacy")]
    pub api: PercolateApiArg,

    /// Percolator field name (query API only)
    #[arg(long, env = "PERCOLATE_FIELD", default_value = DEFAULT_PERCOLATOR_FIELD)]
    pub percolator_field: String,

    /// Maximum matches requested per document (query API only)
    #[arg(long, env = "PERCOLATE_MAX_MATCHES", default_value_t = DEFAULT_MAX_MATCHES)]
    pub max_matches: usize,
}

impl EsArgs {
    /// Converts parsed arguments into a validated [`EsConfig`].
    pub fn build_config(&self) -> Result<EsConfig> {
        let api = match self.api {
            PercolateApiArg::Legacy => PercolateApi::Legacy,
            PercolateApiArg::Query => PercolateApi::Query {
                field: self.percolator_field.trim().to_string(),
            },
        };
        let mut builder = EsConfig::builder()
            .nodes_csv(&self.nodes)?
            .timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .max_retries(self.max_retries)
            .api(api)
            .max_matches(self.max_matches);
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            builder = builder.credentials(user, password);
        }
        builder.build()
    }
}
