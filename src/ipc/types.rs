use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::report::NameIndex;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Established anonymous identity. The id is purely the tenant-partition
/// suffix; it carries no role or permission semantics.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub id: String,
    pub token: String,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub installation_id: Option<String>,
    pub session: Option<SessionIdentity>,
    /// Student-name cache for the report view. Live (write-through on
    /// registration) while `roster.watch` is active.
    pub roster: NameIndex,
    pub roster_watching: bool,
    /// Monotonic recency token handed out by `report.open`; the shell
    /// discards any report result older than the newest generation it has
    /// seen.
    pub report_generation: u64,
}

impl AppState {
    /// `{installation_id}/{session_id}`, the partition key scoping every
    /// student and attendance row.
    pub fn tenant_id(&self) -> Option<String> {
        match (&self.installation_id, &self.session) {
            (Some(installation), Some(session)) => {
                Some(format!("{}/{}", installation, session.id))
            }
            _ => None,
        }
    }
}
