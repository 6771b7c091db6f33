use crate::billing;
use crate::cache::EvictionCache;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{payments, setup, students};
use crate::ipc::helpers::{
    epoch_millis, get_optional_str, get_required_str, get_string_array, new_id, now_time_string,
    today_string, HandlerErr,
};
use crate::ipc::types::{AppState, CachedStudent, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STATUS_PRESENT: &str = "present";
const STATUS_ABSENT: &str = "absent";

fn lesson_numbers_for(conn: &Connection, student_id: &str) -> Result<Vec<i64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT lesson_number FROM attendance_records WHERE student_id = ?")
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

/// Check-in: resolve the scanned code, assign the next lesson number, record
/// presence, and annotate the result with the payment verdict for the
/// covering billing period. The verdict never blocks registration.
fn attendance_scan(
    conn: &Connection,
    student_cache: &mut EvictionCache<String, CachedStudent>,
    payment_cache: &mut EvictionCache<String, Vec<String>>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let date = get_optional_str(params, "date").unwrap_or_else(today_string);
    let time = get_optional_str(params, "time").unwrap_or_else(now_time_string);

    let now = epoch_millis();
    let Some(student) = students::find_student_by_code(conn, student_cache, &code, now)? else {
        return Err(HandlerErr::not_found("student"));
    };

    let history = lesson_numbers_for(conn, &student.id)?;
    let lesson_number = billing::next_lesson_number(history);

    conn.execute(
        "INSERT INTO attendance_records(id, student_id, status, lesson_number, date, time)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            new_id(),
            &student.id,
            STATUS_PRESENT,
            lesson_number,
            &date,
            &time,
        ),
    )
    .map_err(HandlerErr::insert)?;

    let bucket = setup::lessons_per_period(conn);
    let labels = payments::paid_month_labels(conn, payment_cache, &student.id, now)?;
    let paid =
        billing::has_paid_for_lesson(labels.iter().map(|s| s.as_str()), lesson_number, bucket);

    Ok(json!({
        "studentId": student.id,
        "name": student.name,
        "code": student.code,
        "group": student.group_name,
        "status": STATUS_PRESENT,
        "lessonNumber": lesson_number,
        "displayLessonNumber": billing::display_lesson_number(lesson_number, bucket),
        "billingPeriod": billing::billing_period(lesson_number, bucket),
        "paid": paid,
        "date": date,
        "time": time,
    }))
}

fn attendance_bulk_absent(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_ids = get_string_array(params, "studentIds")?;
    let date = get_optional_str(params, "date").unwrap_or_else(today_string);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut recorded = 0_i64;
    for student_id in student_ids {
        let exists = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !exists {
            continue;
        }
        let history = {
            let mut stmt = tx
                .prepare("SELECT lesson_number FROM attendance_records WHERE student_id = ?")
                .map_err(HandlerErr::query)?;
            stmt.query_map([&student_id], |r| r.get::<_, i64>(0))
                .and_then(|it| it.collect::<Result<Vec<i64>, _>>())
                .map_err(HandlerErr::query)?
        };
        let lesson_number = billing::next_lesson_number(history);
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, status, lesson_number, date, time)
             VALUES(?, ?, ?, ?, ?, NULL)",
            (new_id(), &student_id, STATUS_ABSENT, lesson_number, &date),
        )
        .map_err(HandlerErr::insert)?;
        recorded += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "recorded": recorded }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let bucket = setup::lessons_per_period(conn);

    let mut stmt = conn
        .prepare(
            "SELECT id, status, lesson_number, date, time
             FROM attendance_records
             WHERE student_id = ?
             ORDER BY lesson_number",
        )
        .map_err(HandlerErr::query)?;
    let records: Vec<serde_json::Value> = stmt
        .query_map([&student_id], |r| {
            let lesson_number: i64 = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "lessonNumber": lesson_number,
                "displayLessonNumber": billing::display_lesson_number(lesson_number, bucket),
                "billingPeriod": billing::billing_period(lesson_number, bucket),
                "date": r.get::<_, String>(3)?,
                "time": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "records": records }))
}

fn attendance_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let affected = conn
        .execute("DELETE FROM attendance_records WHERE id = ?", [&attendance_id])
        .map_err(HandlerErr::delete)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("attendance record"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.scan" => {
            let AppState {
                db,
                student_cache,
                payment_cache,
                ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(
                match attendance_scan(conn, student_cache, payment_cache, &req.params) {
                    Ok(result) => ok(&req.id, result),
                    Err(e) => e.response(&req.id),
                },
            )
        }
        "attendance.bulkAbsent" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match attendance_bulk_absent(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "attendance.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match attendance_list(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "attendance.delete" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match attendance_delete(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
