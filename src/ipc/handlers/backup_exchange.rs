use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // Flush any open connection so the copied file is current.
    if state.workspace.as_deref() == Some(workspace.as_path()) {
        state.db = None;
    }

    let result = backup::export_workspace_bundle(&workspace, &out_path);

    if state.workspace.as_deref() == Some(workspace.as_path()) && state.db.is_none() {
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    match result {
        Ok(summary) => {
            log::info!("workspace bundle exported to {}", out_path.to_string_lossy());
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                    "outPath": out_path.to_string_lossy(),
                }),
            )
        }
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // Close the live connection before the database file is swapped out.
    if state.workspace.as_deref() == Some(workspace.as_path()) {
        state.db = None;
        log::debug!(
            "dropping {} cached student and {} cached payment entries for import",
            state.student_cache.len(),
            state.payment_cache.len()
        );
        state.student_cache.clear();
        state.payment_cache.clear();
    }

    let result = backup::import_workspace_bundle(&in_path, &workspace);

    if state.workspace.as_deref() == Some(workspace.as_path()) {
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    match result {
        Ok(summary) => ok(
            &req.id,
            json!({ "bundleFormatDetected": summary.bundle_format_detected }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

fn export_students_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);

    let mut stmt = conn
        .prepare(
            "SELECT name, code, group_name, grade, phone, parent_phone
             FROM students ORDER BY name",
        )
        .map_err(HandlerErr::query)?;
    let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, Option<String>)> =
        stmt.query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut csv = String::from("name,code,group,grade,phone,parentPhone\n");
    for (name, code, group, grade, phone, parent_phone) in &rows {
        let fields = [
            name.as_str(),
            code.as_str(),
            group.as_deref().unwrap_or(""),
            grade.as_deref().unwrap_or(""),
            phone.as_deref().unwrap_or(""),
            parent_phone.as_deref().unwrap_or(""),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
        csv.push_str(&line.join(","));
        csv.push('\n');
    }

    std::fs::write(&out_path, csv).map_err(|e| {
        HandlerErr::with_details(
            "backup_failed",
            e.to_string(),
            json!({ "outPath": out_path.to_string_lossy() }),
        )
    })?;

    Ok(json!({ "rowCount": rows.len(), "outPath": out_path.to_string_lossy() }))
}

fn handle_export_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match export_students_csv(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        "exchange.exportStudentsCsv" => Some(handle_export_students_csv(state, req)),
        _ => None,
    }
}
