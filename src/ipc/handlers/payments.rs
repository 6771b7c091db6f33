use crate::billing;
use crate::cache::EvictionCache;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    epoch_millis, get_optional_f64, get_optional_str, get_required_i64, get_required_str, new_id,
    today_string, HandlerErr,
};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Flattened paid-month label history for one student, oldest payment first.
/// Served from the payment cache when fresh; a student with no payments is a
/// cacheable answer like any other.
pub(crate) fn paid_month_labels(
    conn: &Connection,
    cache: &mut EvictionCache<String, Vec<String>>,
    student_id: &str,
    now_millis: i64,
) -> Result<Vec<String>, HandlerErr> {
    if let Some(cached) = cache.get(&student_id.to_string(), now_millis) {
        return Ok(cached.unwrap_or_default());
    }
    let mut stmt = conn
        .prepare(
            "SELECT pm.month
             FROM paid_months pm
             JOIN payments p ON p.id = pm.payment_id
             WHERE p.student_id = ?
             ORDER BY p.date, pm.sort_order",
        )
        .map_err(HandlerErr::query)?;
    let labels: Vec<String> = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    cache.set(student_id.to_string(), Some(labels.clone()), now_millis);
    Ok(labels)
}

fn payments_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(serde_json::Value, String), HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    // Accept a single label or a list; the register flow creates one payment
    // row per event either way.
    let mut months: Vec<String> = match params.get("months").and_then(|v| v.as_array()) {
        Some(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        None => Vec::new(),
    };
    if months.is_empty() {
        if let Some(single) = get_optional_str(params, "month") {
            months.push(single);
        }
    }
    if months.is_empty() {
        return Err(HandlerErr::new("bad_params", "missing month or months"));
    }

    let amount = get_optional_f64(params, "amount");
    let date = get_optional_str(params, "date").unwrap_or_else(today_string);

    let student: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, code, group_name FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((student_name, student_code, group_name)) = student else {
        return Err(HandlerErr::not_found("student"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let payment_id = new_id();
    tx.execute(
        "INSERT INTO payments(id, student_id, student_name, student_code, group_name, month, date, amount)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &student_id,
            &student_name,
            &student_code,
            &group_name,
            &months[0],
            &date,
            amount,
        ),
    )
    .map_err(HandlerErr::insert)?;
    for (i, month) in months.iter().enumerate() {
        tx.execute(
            "INSERT INTO paid_months(id, payment_id, month, date, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (new_id(), &payment_id, month, &date, i as i64),
        )
        .map_err(HandlerErr::insert)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok((json!({ "paymentId": payment_id }), student_id))
}

fn payments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_filter = get_optional_str(params, "studentId");
    let mut sql = String::from(
        "SELECT id, student_id, student_name, student_code, group_name, month, date, amount
         FROM payments",
    );
    if student_filter.is_some() {
        sql.push_str(" WHERE student_id = ?");
    }
    sql.push_str(" ORDER BY date, id");

    struct PaymentRow {
        id: String,
        student_id: String,
        student_name: String,
        student_code: String,
        group_name: Option<String>,
        month: String,
        date: String,
        amount: Option<f64>,
    }

    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRow> {
        Ok(PaymentRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            student_code: r.get(3)?,
            group_name: r.get(4)?,
            month: r.get(5)?,
            date: r.get(6)?,
            amount: r.get(7)?,
        })
    }

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = match &student_filter {
        Some(sid) => stmt.query_map([sid], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)?;

    let mut pm_stmt = conn
        .prepare(
            "SELECT month, date FROM paid_months WHERE payment_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;

    let mut payments: Vec<serde_json::Value> = Vec::with_capacity(rows.len());
    for row in &rows {
        let paid_months: Vec<serde_json::Value> = pm_stmt
            .query_map([&row.id], |r| {
                Ok(json!({
                    "month": r.get::<_, String>(0)?,
                    "date": r.get::<_, Option<String>>(1)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        payments.push(json!({
            "id": row.id,
            "studentId": row.student_id,
            "studentName": row.student_name,
            "studentCode": row.student_code,
            "group": row.group_name,
            "month": row.month,
            "date": row.date,
            "amount": row.amount,
            "paidMonths": paid_months,
        }));
    }

    Ok(json!({ "payments": payments }))
}

fn payments_check_eligibility(
    conn: &Connection,
    cache: &mut EvictionCache<String, Vec<String>>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let lesson_number = get_required_i64(params, "lessonNumber")?;

    let bucket = setup::lessons_per_period(conn);
    let labels = paid_month_labels(conn, cache, &student_id, epoch_millis())?;
    let period = billing::billing_period(lesson_number, bucket);
    let paid = billing::has_paid_for_lesson(labels.iter().map(|s| s.as_str()), lesson_number, bucket);

    Ok(json!({
        "lessonNumber": lesson_number,
        "billingPeriod": period,
        "periodFirstLesson": billing::first_lesson_of(period, bucket),
        "periodLastLesson": billing::last_lesson_of(period, bucket),
        "paid": paid,
    }))
}

fn payments_paid_periods(
    conn: &Connection,
    cache: &mut EvictionCache<String, Vec<String>>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let labels = paid_month_labels(conn, cache, &student_id, epoch_millis())?;
    let report = billing::resolved_paid_periods(labels.iter().map(|s| s.as_str()));
    Ok(json!({
        "periods": report.periods,
        "unresolvedLabels": report.unresolved,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.register" => {
            let AppState {
                db, payment_cache, ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match payments_register(conn, &req.params) {
                Ok((result, student_id)) => {
                    // The cached label history is stale the moment a payment
                    // lands; drop it rather than patching it.
                    payment_cache.remove(&student_id);
                    ok(&req.id, result)
                }
                Err(e) => e.response(&req.id),
            })
        }
        "payments.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match payments_list(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "payments.checkEligibility" => {
            let AppState {
                db, payment_cache, ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match payments_check_eligibility(conn, payment_cache, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "payments.paidPeriods" => {
            let AppState {
                db, payment_cache, ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match payments_paid_periods(conn, payment_cache, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
