use crate::ipc::error::err;

/// Handler-internal failure carried up to the wire error shape.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn db_insert(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        }
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Required string that must be non-empty after trimming.
pub fn get_required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = get_required_str(params, key)?;
    let t = v.trim().to_string();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t)
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}
