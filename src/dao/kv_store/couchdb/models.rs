use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator substituted for `/` so hierarchical keys stay valid document IDs.
const KEY_SEPARATOR: &str = "::";

/// Envelope stored for every key: CouchDB metadata plus the record body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRecordDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub value: Value,
}

/// Body returned by CouchDB after a successful PUT or DELETE.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// Minimal projection used when only the current revision is needed.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}

pub fn doc_id(key: &str) -> String {
    key.replace('/', KEY_SEPARATOR)
}
