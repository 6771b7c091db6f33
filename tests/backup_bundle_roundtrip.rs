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
    let exe = env!("CARGO_BIN_EXE_tutord");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutord");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn exported_bundle_restores_into_a_fresh_workspace() {
    let source = temp_dir("tutord-backup-src");
    let target = temp_dir("tutord-backup-dst");
    let bundle = source.join("export.tutorbackup.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Bundle Student", "group": "Group C", "password": "pw123456" }),
    );
    let code = created
        .get("code")
        .and_then(|v| v.as_str())
        .expect("code")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.scan",
        json!({ "code": code, "date": "2026-04-01", "time": "18:00:00" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": source.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("tutor-workspace-v1")
    );
    assert_eq!(
        exported
            .get("dbSha256")
            .and_then(|v| v.as_str())
            .map(|s| s.len()),
        Some(64)
    );

    // Restore into an empty workspace and check the data travelled.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": target.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("tutor-workspace-v1")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let rows = students
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("name").and_then(|v| v.as_str()),
        Some("Bundle Student")
    );
    assert_eq!(rows[0].get("code").and_then(|v| v.as_str()), Some(code.as_str()));

    let lookup = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.lookupByCode",
        json!({ "code": code }),
    );
    assert_eq!(lookup.get("found").and_then(|v| v.as_bool()), Some(true));

    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(target);
}
