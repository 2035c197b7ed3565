#![warn(missing_docs)]
//! Stream-processing stage that percolates incoming documents against an Elasticsearch
//! cluster and emits the ids of the stored queries they match.

pub mod bolt;
pub mod client;
pub mod collector;
pub mod config;
pub mod elasticsearch;
pub mod error;
pub mod topology;
pub mod tuple;

pub use bolt::{Outcome, PercolateBolt};
pub use client::SearchClient;
pub use collector::{ChannelCollector, OutputCollector, Signal, VecCollector};
pub use config::{EsArgs, EsConfig, EsConfigBuilder, PercolateApi, PercolateApiArg};
pub use elasticsearch::EsPercolateClient;
pub use error::{DispatchError, FieldError, QueryError};
pub use topology::{Topology, TopologyStats};
pub use tuple::{Fields, MatchId, MessageId, OutputRecord, PercolateRequest, Tuple, Value};
