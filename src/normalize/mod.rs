pub mod cloudflare;

pub use cloudflare::CloudflareNormalizer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Raw record as parsed from one line of a downloaded unit
pub type RawRecord = Map<String, Value>;

/// One canonical log record handed to the sink.
///
/// `timestamp` and `record_type` are always present; `fields` holds the
/// provider fields the normalizer kept, already converted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub record_type: String,

    /// Name of the ready unit the record was read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NormalizedEvent {
    pub fn with_log_file(mut self, name: impl Into<String>) -> Self {
        self.log_file = Some(name.into());
        self
    }
}

/// Maps a provider record onto [`NormalizedEvent`].
///
/// Must be total: unknown or malformed fields are dropped, never reported.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &RawRecord) -> NormalizedEvent;
}
