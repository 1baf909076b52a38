use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_asistenciad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn asistenciad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn rows(report: &serde_json::Value) -> Vec<serde_json::Value> {
    report
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

#[test]
fn unregistered_control_number_reports_as_desconocido() {
    let workspace = temp_dir("asistencia-report-unknown");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.start", json!({}));

    // No such student was ever registered; the event is still legal.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.checkIn",
        json!({ "numeroControl": "GHOST-1", "materia": "Historia", "horaClase": "09:00" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "report.open",
        json!({ "materia": "Historia", "horaClase": "09:00" }),
    );
    let rows = rows(&report);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("nombre").and_then(|v| v.as_str()),
        Some("Desconocido")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_filter_yields_empty_report() {
    let workspace = temp_dir("asistencia-report-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.start", json!({}));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "report.open",
        json!({ "materia": "Filosofía", "horaClase": "11:00" }),
    );
    assert!(rows(&report).is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn report_generations_increase_monotonically() {
    let workspace = temp_dir("asistencia-report-generation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.start", json!({}));

    let mut last = 0u64;
    for (i, (materia, hora)) in [
        ("Física", "08:00"),
        ("Física", "09:00"),
        ("Química", "08:00"),
        ("Física", "08:00"),
    ]
    .into_iter()
    .enumerate()
    {
        let report = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "report.open",
            json!({ "materia": materia, "horaClase": hora }),
        );
        let generation = report
            .get("generation")
            .and_then(|v| v.as_u64())
            .expect("generation");
        assert!(
            generation > last,
            "generation {} did not advance past {}",
            generation,
            last
        );
        last = generation;
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn watched_roster_resolves_students_registered_after_watch() {
    let workspace = temp_dir("asistencia-report-roster");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.start", json!({}));

    // Report view mounts first, then a registration happens elsewhere; the
    // write-through refresh must make the name visible without re-watching.
    let watch = request_ok(&mut stdin, &mut reader, "3", "roster.watch", json!({}));
    assert_eq!(watch.get("students").and_then(|v| v.as_u64()), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.register",
        json!({
            "nombre": "Luisa Ramos",
            "grupo": "5A",
            "semestre": 5,
            "materia": "Programación",
            "horaClase": "13:00",
            "numeroControl": "L-55"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.checkIn",
        json!({ "numeroControl": "L-55", "materia": "Programación", "horaClase": "13:00" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "report.open",
        json!({ "materia": "Programación", "horaClase": "13:00" }),
    );
    let rows = rows(&report);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("nombre").and_then(|v| v.as_str()),
        Some("Luisa Ramos")
    );

    let _ = request_ok(&mut stdin, &mut reader, "7", "roster.unwatch", json!({}));

    let _ = std::fs::remove_dir_all(workspace);
}
