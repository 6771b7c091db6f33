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

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> (String, String) {
    let created = request_ok(
        stdin,
        reader,
        "create",
        "students.create",
        json!({ "name": name, "password": "pw123456" }),
    );
    (
        created
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string(),
        created
            .get("code")
            .and_then(|v| v.as_str())
            .expect("code")
            .to_string(),
    )
}

#[test]
fn arabic_label_marks_scan_paid_for_covering_period() {
    let workspace = temp_dir("tutord-pay-arabic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, code) = create_student(&mut stdin, &mut reader, "Paying Student");

    // Second billing period paid with the ordinal phrase.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.register",
        json!({ "studentId": student_id, "month": "الشهر الثاني", "amount": 250.0 }),
    );

    // Lessons 1..8 sit in the unpaid first period.
    for i in 0..8 {
        let scan = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "attendance.scan",
            json!({ "code": code, "date": "2026-02-01", "time": "16:00:00" }),
        );
        assert_eq!(scan.get("paid").and_then(|v| v.as_bool()), Some(false));
    }
    // Lesson 9 crosses into period 2, which the phrase covers.
    let scan9 = request_ok(
        &mut stdin,
        &mut reader,
        "s9",
        "attendance.scan",
        json!({ "code": code, "date": "2026-03-01", "time": "16:00:00" }),
    );
    assert_eq!(scan9.get("lessonNumber").and_then(|v| v.as_i64()), Some(9));
    assert_eq!(scan9.get("billingPeriod").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(scan9.get("paid").and_then(|v| v.as_bool()), Some(true));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn eligibility_check_resolves_numeric_labels() {
    let workspace = temp_dir("tutord-pay-numeric");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, _code) = create_student(&mut stdin, &mut reader, "Numeric Student");

    // No payments at all: not eligible anywhere.
    let check = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.checkEligibility",
        json!({ "studentId": student_id, "lessonNumber": 1 }),
    );
    assert_eq!(check.get("paid").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.register",
        json!({ "studentId": student_id, "month": "3" }),
    );

    // Lesson 17 is the first lesson of period 3.
    let check17 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.checkEligibility",
        json!({ "studentId": student_id, "lessonNumber": 17 }),
    );
    assert_eq!(check17.get("billingPeriod").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(check17.get("paid").and_then(|v| v.as_bool()), Some(true));

    let check10 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payments.checkEligibility",
        json!({ "studentId": student_id, "lessonNumber": 10 }),
    );
    assert_eq!(check10.get("paid").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn paid_periods_report_dedupes_and_surfaces_unresolved_labels() {
    let workspace = temp_dir("tutord-pay-report");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, _code) = create_student(&mut stdin, &mut reader, "Report Student");

    // The same period paid twice under different label styles, plus one
    // label nothing can resolve.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.register",
        json!({ "studentId": student_id, "months": ["3", "الشهر الثالث", "paid cash"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.register",
        json!({ "studentId": student_id, "month": "الأول" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.paidPeriods",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        report.get("periods").and_then(|v| v.as_array()).map(|a| a
            .iter()
            .filter_map(|v| v.as_i64())
            .collect::<Vec<_>>()),
        Some(vec![1, 3])
    );
    assert_eq!(
        report
            .get("unresolvedLabels")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let payments = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payments.list",
        json!({ "studentId": student_id }),
    );
    let rows = payments
        .get("payments")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("payments");
    assert_eq!(rows.len(), 2);
    let month_counts: Vec<usize> = rows
        .iter()
        .filter_map(|p| p.get("paidMonths").and_then(|v| v.as_array()).map(|a| a.len()))
        .collect();
    assert!(month_counts.contains(&3));
    assert!(month_counts.contains(&1));

    let _ = std::fs::remove_dir_all(workspace);
}
