use serde::{Deserialize, Serialize};

/// A single log observed for a subscribed address.
///
/// Numeric fields stay in their wire-native hex form. Nothing is parsed at
/// ingestion time, so the record is exactly what the node delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub address: String,
    pub block_hash: String,
    pub block_number: String,
    pub data: String,
    pub log_index: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub transaction_index: String,
}
