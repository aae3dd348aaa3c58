// src/connectors/messages.rs
use serde::Deserialize;
use std::collections::HashMap;

/// Response of https://open.er-api.com/v6/latest/<BASE>.
/// Only the fields the feed checks are mapped.
#[derive(Debug, Deserialize)]
pub struct ErApiLatest {
    pub result: String, // "success" | "error"

    #[serde(default)]
    pub base_code: Option<String>,

    #[serde(default, rename = "error-type")]
    pub error_type: Option<String>,

    #[serde(default)]
    pub time_last_update_unix: Option<i64>,

    #[serde(default)]
    pub rates: HashMap<String, f64>,
}
