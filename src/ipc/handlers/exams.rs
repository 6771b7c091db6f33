use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_str, new_id, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn exams_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let group_name = get_optional_str(params, "group");
    let date = get_optional_str(params, "date");
    let Some(out_of) = get_optional_f64(params, "outOf") else {
        return Err(HandlerErr::new("bad_params", "missing outOf"));
    };
    if out_of <= 0.0 {
        return Err(HandlerErr::new("bad_params", "outOf must be positive"));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM exams",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let id = new_id();
    conn.execute(
        "INSERT INTO exams(id, title, group_name, date, out_of, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &group_name, &date, out_of, next_sort),
    )
    .map_err(HandlerErr::insert)?;

    Ok(json!({ "examId": id }))
}

fn exams_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_filter = get_optional_str(params, "group");
    let mut sql = String::from(
        "SELECT id, title, group_name, date, out_of, sort_order FROM exams",
    );
    if group_filter.is_some() {
        sql.push_str(" WHERE group_name = ?");
    }
    sql.push_str(" ORDER BY sort_order");

    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "group": r.get::<_, Option<String>>(2)?,
            "date": r.get::<_, Option<String>>(3)?,
            "outOf": r.get::<_, f64>(4)?,
            "sortOrder": r.get::<_, i64>(5)?,
        }))
    }
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let exams = match &group_filter {
        Some(g) => stmt.query_map([g], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)?;

    Ok(json!({ "exams": exams }))
}

fn exams_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM exam_scores WHERE exam_id = ?", [&exam_id])
        .map_err(HandlerErr::delete)?;
    let affected = tx
        .execute("DELETE FROM exams WHERE id = ?", [&exam_id])
        .map_err(HandlerErr::delete)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    if affected == 0 {
        return Err(HandlerErr::not_found("exam"));
    }
    Ok(json!({ "ok": true }))
}

fn exams_set_score(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let student_id = get_required_str(params, "studentId")?;
    // null clears the mark (absent / not yet graded); it still creates a row
    // so the stats can count the student as unmarked.
    let score = match params.get("score") {
        None => return Err(HandlerErr::new("bad_params", "missing score")),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(n) if n >= 0.0 => Some(n),
            _ => return Err(HandlerErr::new("bad_params", "score must be a non-negative number or null")),
        },
    };

    let exam_exists = conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [&exam_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exam_exists {
        return Err(HandlerErr::not_found("exam"));
    }
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student"));
    }

    conn.execute(
        "INSERT INTO exam_scores(exam_id, student_id, score)
         VALUES(?, ?, ?)
         ON CONFLICT(exam_id, student_id) DO UPDATE SET score = excluded.score",
        (&exam_id, &student_id, score),
    )
    .map_err(HandlerErr::update)?;

    Ok(json!({ "ok": true }))
}

fn exams_scores(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let mut stmt = conn
        .prepare(
            "SELECT es.student_id, s.name, s.code, es.score
             FROM exam_scores es
             JOIN students s ON s.id = es.student_id
             WHERE es.exam_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    let scores: Vec<serde_json::Value> = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "score": r.get::<_, Option<f64>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "scores": scores }))
}

fn exams_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exam: Option<(String, f64)> = conn
        .query_row(
            "SELECT title, out_of FROM exams WHERE id = ?",
            [&exam_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((title, out_of)) = exam else {
        return Err(HandlerErr::not_found("exam"));
    };

    let mut stmt = conn
        .prepare("SELECT score FROM exam_scores WHERE exam_id = ?")
        .map_err(HandlerErr::query)?;
    let scores: Vec<Option<f64>> = stmt
        .query_map([&exam_id], |r| r.get::<_, Option<f64>>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let percents: Vec<f64> = scores
        .iter()
        .filter_map(|s| s.map(|v| stats::percent(v, out_of)))
        .collect();
    let avg = stats::exam_average(scores, out_of);

    Ok(json!({
        "examId": exam_id,
        "title": title,
        "outOf": out_of,
        "avgRaw": stats::round1(avg.avg_raw),
        "avgPercent": stats::round1(avg.avg_percent),
        "medianPercent": stats::round1(stats::median(&percents)),
        "scoredCount": avg.scored_count,
        "missingCount": avg.missing_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "exams.create" | "exams.list" | "exams.delete" | "exams.setScore" | "exams.scores" | "exams.stats"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "exams.create" => exams_create(conn, &req.params),
        "exams.list" => exams_list(conn, &req.params),
        "exams.delete" => exams_delete(conn, &req.params),
        "exams.setScore" => exams_set_score(conn, &req.params),
        "exams.scores" => exams_scores(conn, &req.params),
        "exams.stats" => exams_stats(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
