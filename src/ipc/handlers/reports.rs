use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_text, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{derive_report, CheckIn, NameIndex};
use rusqlite::Connection;
use serde_json::json;

pub fn load_name_entries(
    conn: &Connection,
    tenant_id: &str,
) -> Result<Vec<(String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT numero_control, nombre FROM students WHERE tenant_id = ?")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([tenant_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn load_events(
    conn: &Connection,
    tenant_id: &str,
    materia: &str,
    hora_clase: &str,
) -> Result<Vec<CheckIn>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT numero_control, timestamp
             FROM attendance
             WHERE tenant_id = ? AND materia = ? AND hora_clase = ?",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map((tenant_id, materia, hora_clase), |r| {
        Ok(CheckIn {
            numero_control: r.get(0)?,
            timestamp: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn require_tenant(state: &AppState, req: &Request) -> Result<String, serde_json::Value> {
    if state.db.is_none() {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    }
    state
        .tenant_id()
        .ok_or_else(|| err(&req.id, "no_session", "start a session first", None))
}

/// Activates the report view's name cache: one full snapshot now, then
/// write-through refreshes from the registry until `roster.unwatch`.
fn handle_roster_watch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match require_tenant(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match load_name_entries(conn, &tenant_id) {
        Ok(entries) => {
            state.roster.replace(entries);
            state.roster_watching = true;
            ok(
                &req.id,
                json!({
                    "students": state.roster.len(),
                    "generation": state.roster.generation()
                }),
            )
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_roster_unwatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.roster.clear();
    state.roster_watching = false;
    ok(&req.id, json!({ "ok": true }))
}

fn handle_report_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match require_tenant(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let materia = match get_required_text(&req.params, "materia") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let hora_clase = match get_required_text(&req.params, "horaClase") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Assign the recency token up front: whatever this request returns is
    // newer than every previously issued generation, and the shell keeps
    // only the highest it has seen.
    state.report_generation += 1;
    let generation = state.report_generation;

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let events = match load_events(conn, &tenant_id, &materia, &hora_clase) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // One-shot snapshot when the report view is not holding the cache open.
    let one_shot;
    let names: &NameIndex = if state.roster_watching {
        &state.roster
    } else {
        let mut idx = NameIndex::default();
        match load_name_entries(conn, &tenant_id) {
            Ok(entries) => idx.replace(entries),
            Err(e) => return e.response(&req.id),
        }
        one_shot = idx;
        &one_shot
    };

    let rows: Vec<serde_json::Value> = derive_report(&events, names)
        .into_iter()
        .map(|row| {
            json!({
                "numeroControl": row.numero_control,
                "nombre": row.nombre,
                "checkinTime": row.checkin_time
            })
        })
        .collect();
    log::info!(
        "report {} {} -> {} rows (generation {})",
        materia,
        hora_clase,
        rows.len(),
        generation
    );

    ok(
        &req.id,
        json!({
            "generation": generation,
            "materia": materia,
            "horaClase": hora_clase,
            "rows": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.watch" => Some(handle_roster_watch(state, req)),
        "roster.unwatch" => Some(handle_roster_unwatch(state, req)),
        "report.open" => Some(handle_report_open(state, req)),
        _ => None,
    }
}
