use crate::access;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_str, new_id, today_string, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

fn videos_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let url = get_required_str(params, "url")?;
    let group_name = get_optional_str(params, "group");
    let grade = get_optional_str(params, "grade");

    let id = new_id();
    conn.execute(
        "INSERT INTO videos(id, title, url, group_name, grade, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &url, &group_name, &grade, today_string()),
    )
    .map_err(HandlerErr::insert)?;
    Ok(json!({ "videoId": id }))
}

fn videos_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_filter = get_optional_str(params, "group");
    let mut sql =
        String::from("SELECT id, title, url, group_name, grade, created_at FROM videos");
    if group_filter.is_some() {
        sql.push_str(" WHERE group_name = ?");
    }
    sql.push_str(" ORDER BY created_at, title");

    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "url": r.get::<_, String>(2)?,
            "group": r.get::<_, Option<String>>(3)?,
            "grade": r.get::<_, Option<String>>(4)?,
            "createdAt": r.get::<_, Option<String>>(5)?,
        }))
    }
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let videos = match &group_filter {
        Some(g) => stmt.query_map([g], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)?;

    Ok(json!({ "videos": videos }))
}

fn videos_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let video_id = get_required_str(params, "videoId")?;
    let affected = conn
        .execute("DELETE FROM videos WHERE id = ?", [&video_id])
        .map_err(HandlerErr::delete)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("video"));
    }
    Ok(json!({ "ok": true }))
}

fn parse_month_key(raw: &str) -> Result<(i32, u32), HandlerErr> {
    let Some((y, m)) = raw.trim().split_once('-') else {
        return Err(HandlerErr::new("bad_params", "month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| HandlerErr::new("bad_params", "month year must be numeric"))?;
    let month = m
        .parse::<u32>()
        .map_err(|_| HandlerErr::new("bad_params", "month must be YYYY-MM"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::new("bad_params", "month must be between 01 and 12"));
    }
    Ok((year, month))
}

/// Month-scoped video gate: too many absences in the month, or absences
/// clustered inside one short window, lock the student out of the library
/// for that month.
fn videos_check_access(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let month_key = get_required_str(params, "month")?;
    let (year, month) = parse_month_key(&month_key)?;

    let mut stmt = conn
        .prepare(
            "SELECT date FROM attendance_records WHERE student_id = ? AND status = 'absent'",
        )
        .map_err(HandlerErr::query)?;
    let raw_dates: Vec<String> = stmt
        .query_map([&student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    // Rows with unparseable dates are ignored rather than failing the check.
    let absence_dates: Vec<NaiveDate> = raw_dates
        .iter()
        .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .collect();

    let policy = setup::video_policy(conn);
    let block = access::video_block(&absence_dates, year, month, &policy);

    Ok(json!({
        "studentId": student_id,
        "month": month_key,
        "allowed": block.is_none(),
        "reason": block,
    }))
}

fn books_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let author = get_optional_str(params, "author");
    let group_name = get_optional_str(params, "group");
    let price = get_optional_f64(params, "price");

    let id = new_id();
    conn.execute(
        "INSERT INTO books(id, title, author, group_name, price, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &author, &group_name, price, today_string()),
    )
    .map_err(HandlerErr::insert)?;
    Ok(json!({ "bookId": id }))
}

fn books_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_filter = get_optional_str(params, "group");
    let mut sql =
        String::from("SELECT id, title, author, group_name, price, created_at FROM books");
    if group_filter.is_some() {
        sql.push_str(" WHERE group_name = ?");
    }
    sql.push_str(" ORDER BY title");

    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "author": r.get::<_, Option<String>>(2)?,
            "group": r.get::<_, Option<String>>(3)?,
            "price": r.get::<_, Option<f64>>(4)?,
            "createdAt": r.get::<_, Option<String>>(5)?,
        }))
    }
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let books = match &group_filter {
        Some(g) => stmt.query_map([g], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)?;

    Ok(json!({ "books": books }))
}

fn books_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    let affected = conn
        .execute("DELETE FROM books WHERE id = ?", [&book_id])
        .map_err(HandlerErr::delete)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("book"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "videos.create"
            | "videos.list"
            | "videos.delete"
            | "videos.checkAccess"
            | "books.create"
            | "books.list"
            | "books.delete"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "videos.create" => videos_create(conn, &req.params),
        "videos.list" => videos_list(conn, &req.params),
        "videos.delete" => videos_delete(conn, &req.params),
        "videos.checkAccess" => videos_check_access(conn, &req.params),
        "books.create" => books_create(conn, &req.params),
        "books.list" => books_list(conn, &req.params),
        "books.delete" => books_delete(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
