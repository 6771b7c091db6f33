use crate::cache::EvictionCache;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    epoch_millis, get_optional_str, get_required_str, new_id, today_string, HandlerErr,
};
use crate::ipc::types::{AppState, CachedStudent, Request};
use crate::session;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    name: String,
    code: String,
    group_name: Option<String>,
    grade: Option<String>,
    phone: Option<String>,
    parent_phone: Option<String>,
    created_at: Option<String>,
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "name": s.name,
        "code": s.code,
        "group": s.group_name,
        "grade": s.grade,
        "phone": s.phone,
        "parentPhone": s.parent_phone,
        "createdAt": s.created_at,
    })
}

fn map_student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        code: r.get(2)?,
        group_name: r.get(3)?,
        grade: r.get(4)?,
        phone: r.get(5)?,
        parent_phone: r.get(6)?,
        created_at: r.get(7)?,
    })
}

const STUDENT_COLUMNS: &str =
    "id, name, code, group_name, grade, phone, parent_phone, created_at";

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        |r| map_student_row(r),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("student"))
}

/// Codes are printed on QR cards, so they stay short: eight hex characters
/// from a v4 uuid, retried on the (rare) collision.
fn generate_student_code(conn: &Connection) -> Result<String, HandlerErr> {
    for _ in 0..16 {
        let raw = Uuid::new_v4().simple().to_string();
        let code = raw[..8].to_uppercase();
        let taken = conn
            .query_row("SELECT 1 FROM students WHERE code = ?", [&code], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !taken {
            return Ok(code);
        }
    }
    Err(HandlerErr::new(
        "db_insert_failed",
        "could not allocate a unique student code",
    ))
}

/// Cache-backed lookup used by the scan flow. A backing-store miss is cached
/// too, so repeated scans of a bad code stay cheap until the entry expires.
pub(crate) fn find_student_by_code(
    conn: &Connection,
    cache: &mut EvictionCache<String, CachedStudent>,
    code: &str,
    now_millis: i64,
) -> Result<Option<CachedStudent>, HandlerErr> {
    if let Some(cached) = cache.get(&code.to_string(), now_millis) {
        return Ok(cached);
    }
    let found = conn
        .query_row(
            "SELECT id, name, code, group_name, grade FROM students WHERE code = ?",
            [code],
            |r| {
                Ok(CachedStudent {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    code: r.get(2)?,
                    group_name: r.get(3)?,
                    grade: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    cache.set(code.to_string(), found.clone(), now_millis);
    Ok(found)
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let password = get_required_str(params, "password")?;
    let group_name = get_optional_str(params, "group");
    let grade = get_optional_str(params, "grade");
    let phone = get_optional_str(params, "phone");
    let parent_phone = get_optional_str(params, "parentPhone");

    let id = new_id();
    let code = generate_student_code(conn)?;
    conn.execute(
        "INSERT INTO students(id, name, code, group_name, grade, phone, parent_phone, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &code,
            &group_name,
            &grade,
            &phone,
            &parent_phone,
            session::hash_password(&password),
            today_string(),
        ),
    )
    .map_err(HandlerErr::insert)?;

    Ok(json!({ "studentId": id, "code": code }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_filter = get_optional_str(params, "group");
    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    if group_filter.is_some() {
        sql.push_str(" WHERE group_name = ?");
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = match &group_filter {
        Some(g) => stmt.query_map([g], map_student_row),
        None => stmt.query_map([], map_student_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)?;

    let students: Vec<serde_json::Value> = rows.iter().map(student_json).collect();
    Ok(json!({ "students": students }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(serde_json::Value, String), HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "patch must be an object"));
    };

    let existing = load_student(conn, &student_id)?;

    let mut name = existing.name.clone();
    let mut group_name = existing.group_name.clone();
    let mut grade = existing.grade.clone();
    let mut phone = existing.phone.clone();
    let mut parent_phone = existing.parent_phone.clone();
    let mut password_hash: Option<String> = None;

    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return Err(HandlerErr::new("bad_params", "name must not be empty"));
                };
                name = s.to_string();
            }
            "group" => group_name = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            "grade" => grade = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            "phone" => phone = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            "parentPhone" => {
                parent_phone = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
            }
            "password" => {
                let Some(s) = v.as_str().filter(|s| !s.trim().is_empty()) else {
                    return Err(HandlerErr::new("bad_params", "password must not be empty"));
                };
                password_hash = Some(session::hash_password(s));
            }
            // The code is system-assigned and printed on cards; it never changes.
            "code" => return Err(HandlerErr::new("bad_params", "code cannot be updated")),
            _ => return Err(HandlerErr::new("bad_params", format!("unknown field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE students SET name = ?, group_name = ?, grade = ?, phone = ?, parent_phone = ?
         WHERE id = ?",
        (&name, &group_name, &grade, &phone, &parent_phone, &student_id),
    )
    .map_err(HandlerErr::update)?;
    if let Some(hash) = password_hash {
        conn.execute(
            "UPDATE students SET password_hash = ? WHERE id = ?",
            (&hash, &student_id),
        )
        .map_err(HandlerErr::update)?;
    }

    Ok((json!({ "ok": true }), existing.code))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(serde_json::Value, String, String), HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let existing = load_student(conn, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM exam_scores WHERE student_id = ?", [&student_id])
        .map_err(HandlerErr::delete)?;
    tx.execute(
        "DELETE FROM paid_months WHERE payment_id IN (SELECT id FROM payments WHERE student_id = ?)",
        [&student_id],
    )
    .map_err(HandlerErr::delete)?;
    tx.execute("DELETE FROM payments WHERE student_id = ?", [&student_id])
        .map_err(HandlerErr::delete)?;
    tx.execute(
        "DELETE FROM attendance_records WHERE student_id = ?",
        [&student_id],
    )
    .map_err(HandlerErr::delete)?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(HandlerErr::delete)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok((json!({ "ok": true }), existing.code, student_id))
}

fn students_lookup_by_code(
    conn: &Connection,
    cache: &mut EvictionCache<String, CachedStudent>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let found = find_student_by_code(conn, cache, &code, epoch_millis())?;
    Ok(match found {
        Some(s) => json!({
            "found": true,
            "student": {
                "id": s.id,
                "name": s.name,
                "code": s.code,
                "group": s.group_name,
                "grade": s.grade,
            }
        }),
        None => json!({ "found": false, "student": null }),
    })
}

fn students_list_by_parent(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let parent_phone = get_required_str(params, "parentPhone")?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students WHERE parent_phone = ? ORDER BY name",
            STUDENT_COLUMNS
        ))
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&parent_phone], |r| map_student_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let children: Vec<serde_json::Value> = rows.iter().map(student_json).collect();
    Ok(json!({ "children": children }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_create(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "students.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_list(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "students.update" => {
            let AppState {
                db, student_cache, ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_update(conn, &req.params) {
                Ok((result, code)) => {
                    student_cache.remove(&code);
                    ok(&req.id, result)
                }
                Err(e) => e.response(&req.id),
            })
        }
        "students.delete" => {
            let AppState {
                db,
                student_cache,
                payment_cache,
                ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_delete(conn, &req.params) {
                Ok((result, code, student_id)) => {
                    student_cache.remove(&code);
                    payment_cache.remove(&student_id);
                    ok(&req.id, result)
                }
                Err(e) => e.response(&req.id),
            })
        }
        "students.lookupByCode" => {
            let AppState {
                db, student_cache, ..
            } = state;
            let Some(conn) = db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_lookup_by_code(conn, student_cache, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "students.listByParent" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_list_by_parent(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
