use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, get_required_text, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::qr::decode_qr_url;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

struct AppendedEvent {
    event_id: String,
    numero_control: String,
    materia: String,
    hora_clase: String,
    timestamp: String,
}

impl AppendedEvent {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "eventId": self.event_id,
            "numeroControl": self.numero_control,
            "materia": self.materia,
            "horaClase": self.hora_clase,
            "timestamp": self.timestamp
        })
    }
}

/// Appends one event. Deliberately no dedup and no student-existence
/// check: the log records every scan, and the report layer owns
/// uniqueness-per-student.
fn append_event(
    conn: &Connection,
    tenant_id: &str,
    numero_control: &str,
    materia: &str,
    hora_clase: &str,
) -> Result<AppendedEvent, HandlerErr> {
    let event_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, tenant_id, numero_control, materia, hora_clase, timestamp)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&event_id, tenant_id, numero_control, materia, hora_clase),
    )
    .map_err(|e| HandlerErr::db_insert(e, "attendance"))?;
    let timestamp: String = conn
        .query_row(
            "SELECT timestamp FROM attendance WHERE id = ?",
            [&event_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    Ok(AppendedEvent {
        event_id,
        numero_control: numero_control.to_string(),
        materia: materia.to_string(),
        hora_clase: hora_clase.to_string(),
        timestamp,
    })
}

fn attendance_check_in(
    conn: &Connection,
    tenant_id: &str,
    params: &serde_json::Value,
) -> Result<AppendedEvent, HandlerErr> {
    let numero_control = get_required_text(params, "numeroControl")?;
    let materia = get_required_text(params, "materia")?;
    let hora_clase = get_required_text(params, "horaClase")?;
    append_event(conn, tenant_id, &numero_control, &materia, &hora_clase)
}

fn attendance_scan(
    conn: &Connection,
    tenant_id: &str,
    params: &serde_json::Value,
) -> Result<AppendedEvent, HandlerErr> {
    let qr_url = get_required_str(params, "qrUrl")?;
    let payload = decode_qr_url(&qr_url).map_err(|e| HandlerErr {
        code: "malformed_payload",
        message: e.to_string(),
        details: None,
    })?;
    append_event(
        conn,
        tenant_id,
        &payload.control,
        &payload.materia,
        &payload.hora,
    )
}

fn attendance_list(
    conn: &Connection,
    tenant_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let materia = get_required_text(params, "materia")?;
    let hora_clase = get_required_text(params, "horaClase")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, numero_control, materia, hora_clase, timestamp
             FROM attendance
             WHERE tenant_id = ? AND materia = ? AND hora_clase = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let events = stmt
        .query_map((tenant_id, &materia, &hora_clase), |r| {
            Ok(json!({
                "eventId": r.get::<_, String>(0)?,
                "numeroControl": r.get::<_, String>(1)?,
                "materia": r.get::<_, String>(2)?,
                "horaClase": r.get::<_, String>(3)?,
                "timestamp": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "events": events }))
}

fn require_tenant(state: &AppState, req: &Request) -> Result<String, serde_json::Value> {
    if state.db.is_none() {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    }
    state
        .tenant_id()
        .ok_or_else(|| err(&req.id, "no_session", "start a session first", None))
}

fn handle_attendance_check_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match require_tenant(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_check_in(conn, &tenant_id, &req.params) {
        Ok(event) => {
            log::info!(
                "check-in {} for {} ({} {})",
                event.event_id,
                event.numero_control,
                event.materia,
                event.hora_clase
            );
            ok(&req.id, event.to_json())
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_scan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match require_tenant(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_scan(conn, &tenant_id, &req.params) {
        Ok(event) => ok(&req.id, event.to_json()),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match require_tenant(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_list(conn, &tenant_id, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.checkIn" => Some(handle_attendance_check_in(state, req)),
        "attendance.scan" => Some(handle_attendance_scan(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        _ => None,
    }
}
