use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_i64, get_required_text, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::qr::{encode_qr_url, QrPayload};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// The nine scheduled class start times, one per hour.
pub const CLASS_TIME_SLOTS: [&str; 9] = [
    "07:00", "08:00", "09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00",
];

pub fn is_class_time_slot(hora: &str) -> bool {
    CLASS_TIME_SLOTS.contains(&hora)
}

struct Registered {
    student_id: String,
    created_at: String,
    qr_url: String,
}

fn control_number_taken(
    conn: &Connection,
    tenant_id: &str,
    numero_control: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE tenant_id = ? AND numero_control = ?",
        (tenant_id, numero_control),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn students_register(
    conn: &Connection,
    tenant_id: &str,
    params: &serde_json::Value,
) -> Result<Registered, HandlerErr> {
    let nombre = get_required_text(params, "nombre")?;
    let grupo = get_required_text(params, "grupo")?;
    let numero_control = get_required_text(params, "numeroControl")?;
    let materia = get_required_text(params, "materia")?;
    let hora_clase = get_required_text(params, "horaClase")?;
    let semestre = get_required_i64(params, "semestre")?;

    if !(1..=6).contains(&semestre) {
        return Err(HandlerErr::bad_params("semestre must be between 1 and 6"));
    }
    if !is_class_time_slot(&hora_clase) {
        return Err(HandlerErr::bad_params(
            "horaClase must be one of the hourly slots 07:00 through 15:00",
        ));
    }

    if control_number_taken(conn, tenant_id, &numero_control)? {
        return Err(HandlerErr {
            code: "duplicate_control_number",
            message: format!("numeroControl {} is already registered", numero_control),
            details: Some(json!({ "numeroControl": numero_control })),
        });
    }

    let student_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO students(id, tenant_id, numero_control, nombre, grupo, semestre, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            tenant_id,
            &numero_control,
            &nombre,
            &grupo,
            semestre,
        ),
    );
    if let Err(e) = inserted {
        // A concurrent writer can land between the check and the insert;
        // the UNIQUE(tenant_id, numero_control) constraint is the backstop.
        if is_unique_violation(&e) {
            return Err(HandlerErr {
                code: "duplicate_control_number",
                message: format!("numeroControl {} is already registered", numero_control),
                details: Some(json!({ "numeroControl": numero_control })),
            });
        }
        return Err(HandlerErr::db_insert(e, "students"));
    }

    let created_at: String = conn
        .query_row(
            "SELECT created_at FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let qr_url = encode_qr_url(&QrPayload {
        control: numero_control,
        materia,
        hora: hora_clase,
    });

    Ok(Registered {
        student_id,
        created_at,
        qr_url,
    })
}

fn students_list(conn: &Connection, tenant_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, numero_control, nombre, grupo, semestre, created_at
             FROM students
             WHERE tenant_id = ?
             ORDER BY created_at, rowid",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([tenant_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "numeroControl": r.get::<_, String>(1)?,
                "nombre": r.get::<_, String>(2)?,
                "grupo": r.get::<_, String>(3)?,
                "semestre": r.get::<_, i64>(4)?,
                "createdAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

fn handle_students_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(tenant_id) = state.tenant_id() else {
        if state.db.is_none() {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        }
        return err(&req.id, "no_session", "start a session first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match students_register(conn, &tenant_id, &req.params) {
        Ok(registered) => {
            log::info!("registered student {} in {}", registered.student_id, tenant_id);
            // Write-through: the report view's name cache sees the new
            // student without waiting for its next snapshot load.
            if state.roster_watching {
                match super::reports::load_name_entries(conn, &tenant_id) {
                    Ok(entries) => state.roster.replace(entries),
                    Err(e) => log::warn!("roster refresh failed: {}", e.message),
                }
            }
            ok(
                &req.id,
                json!({
                    "studentId": registered.student_id,
                    "createdAt": registered.created_at,
                    "qrUrl": registered.qr_url
                }),
            )
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(tenant_id) = state.tenant_id() else {
        if state.db.is_none() {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        }
        return err(&req.id, "no_session", "start a session first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_list(conn, &tenant_id) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(handle_students_register(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
