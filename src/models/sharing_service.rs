//! # Sharing Service Model
//!
//! Configuration for one publishing destination. Immutable during a
//! submission's processing; the dispatch loop reads it once per item.

use crate::models::Author;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SharingService {
    pub id: i64,
    pub name: String,
    /// Testing mode: submissions are validated but never actually sent
    pub testing: bool,
    /// Acknowledgment text appended to reporter strings
    pub acknowledgments: Option<String>,
    /// Identifiers required by the report system
    pub source_group_id: Option<i64>,
    pub bot_id: Option<i64>,
    pub bot_name: Option<String>,
    /// JSON array of co-author entries always included in reporter strings
    pub coauthors: Option<serde_json::Value>,
    /// Service-level photometry option defaults (request-level wins)
    pub photometry_options: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

impl SharingService {
    /// Decode the co-author JSON column; malformed entries are dropped
    pub fn coauthor_list(&self) -> Vec<Author> {
        self.coauthors
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<Author>>(v.clone()).ok())
            .unwrap_or_default()
    }
}
