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
fn repeated_absences_in_a_month_block_video_access() {
    let workspace = temp_dir("tutord-video-access");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Absent Student", "password": "pw123456" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let allowed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "videos.checkAccess",
        json!({ "studentId": student_id, "month": "2026-03" }),
    );
    assert_eq!(allowed.get("allowed").and_then(|v| v.as_bool()), Some(true));

    // Two absences five days apart: inside the seven-day window.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkAbsent",
        json!({ "studentIds": [student_id], "date": "2026-03-02" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.bulkAbsent",
        json!({ "studentIds": [student_id], "date": "2026-03-07" }),
    );

    let blocked = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "videos.checkAccess",
        json!({ "studentId": student_id, "month": "2026-03" }),
    );
    assert_eq!(blocked.get("allowed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        blocked.get("reason").and_then(|v| v.as_str()),
        Some("repeatedWithinWindow")
    );

    // The same absences say nothing about another month.
    let other_month = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "videos.checkAccess",
        json!({ "studentId": student_id, "month": "2026-04" }),
    );
    assert_eq!(
        other_month.get("allowed").and_then(|v| v.as_bool()),
        Some(true)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn monthly_absence_limit_blocks_and_policy_is_configurable() {
    let workspace = temp_dir("tutord-video-policy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Limit Student", "password": "pw123456" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // Three absences spread out: clears the window rule, trips the monthly
    // limit.
    for (i, date) in [(3, "2026-05-01"), (4, "2026-05-12"), (5, "2026-05-25")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &i.to_string(),
            "attendance.bulkAbsent",
            json!({ "studentIds": [student_id], "date": date }),
        );
    }
    let blocked = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "videos.checkAccess",
        json!({ "studentId": student_id, "month": "2026-05" }),
    );
    assert_eq!(blocked.get("allowed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        blocked.get("reason").and_then(|v| v.as_str()),
        Some("monthlyLimit")
    );

    // Raising the limit unblocks the same history.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "videoAccess", "patch": { "maxAbsencesPerMonth": 5 } }),
    );
    let relaxed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "videos.checkAccess",
        json!({ "studentId": student_id, "month": "2026-05" }),
    );
    assert_eq!(relaxed.get("allowed").and_then(|v| v.as_bool()), Some(true));

    let _ = std::fs::remove_dir_all(workspace);
}
