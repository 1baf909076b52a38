use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request, SessionIdentity};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct StartOutcome {
    identity: SessionIdentity,
    resumed: bool,
}

fn resume_by_token(conn: &Connection, token: &str) -> Result<Option<SessionIdentity>, HandlerErr> {
    let id: Option<String> = conn
        .query_row("SELECT id FROM sessions WHERE token = ?", [token], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(id) = id else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE sessions SET last_seen_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        [&id],
    )
    .map_err(|e| HandlerErr::db_update(e, "sessions"))?;
    Ok(Some(SessionIdentity {
        id,
        token: token.to_string(),
    }))
}

fn create_anonymous(conn: &Connection) -> Result<SessionIdentity, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(id, token, created_at, last_seen_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &token),
    )
    .map_err(|e| HandlerErr::db_insert(e, "sessions"))?;
    Ok(SessionIdentity { id, token })
}

fn session_start(conn: &Connection, params: &serde_json::Value) -> Result<StartOutcome, HandlerErr> {
    let token = params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(token) = token {
        if let Some(identity) = resume_by_token(conn, &token)? {
            return Ok(StartOutcome {
                identity,
                resumed: true,
            });
        }
        // Stale or foreign token: fall through to a fresh anonymous identity.
    }
    Ok(StartOutcome {
        identity: create_anonymous(conn)?,
        resumed: false,
    })
}

fn handle_session_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(installation_id) = state.installation_id.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match session_start(conn, &req.params) {
        Ok(outcome) => {
            let tenant_id = format!("{}/{}", installation_id, outcome.identity.id);
            log::info!(
                "session {} ({})",
                outcome.identity.id,
                if outcome.resumed { "resumed" } else { "created" }
            );
            let result = json!({
                "sessionId": outcome.identity.id.clone(),
                "token": outcome.identity.token.clone(),
                "tenantId": tenant_id,
                "resumed": outcome.resumed
            });
            // A new identity means a new tenant; the old roster is stale.
            state.roster.clear();
            state.roster_watching = false;
            state.session = Some(outcome.identity);
            ok(&req.id, result)
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "start a session first", None);
    };
    let tenant_id = state.tenant_id();
    ok(
        &req.id,
        json!({
            "sessionId": session.id,
            "tenantId": tenant_id
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.start" => Some(handle_session_start(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        _ => None,
    }
}
