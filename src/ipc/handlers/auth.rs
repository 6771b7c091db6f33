use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{epoch_millis, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, Role, Session};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "role": session.role.as_str(),
        "subjectId": session.subject_id,
        "displayName": session.display_name,
        "startedAtMillis": session.started_at_millis,
    })
}

fn login_admin(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Session, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let (expected_user, stored_hash) = setup::admin_credentials(conn);
    if !username.eq_ignore_ascii_case(&expected_user) {
        return Err(HandlerErr::new("not_authorized", "invalid credentials"));
    }
    // A fresh workspace has no hash yet; the first login is accepted so the
    // admin can reach setup.update and set one.
    if let Some(hash) = stored_hash {
        if !session::verify_password(&password, &hash) {
            return Err(HandlerErr::new("not_authorized", "invalid credentials"));
        }
    }
    Ok(Session::admin(expected_user, epoch_millis()))
}

fn login_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Session, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let password = get_required_str(params, "password")?;
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, name, password_hash FROM students WHERE code = ?",
            [&code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((id, name, hash)) = row else {
        return Err(HandlerErr::new("not_authorized", "invalid credentials"));
    };
    if !session::verify_password(&password, &hash) {
        return Err(HandlerErr::new("not_authorized", "invalid credentials"));
    }
    Ok(Session::student(id, name, epoch_millis()))
}

fn login_parent(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(Session, Vec<serde_json::Value>), HandlerErr> {
    let parent_phone = get_required_str(params, "parentPhone")?;
    let password = get_required_str(params, "password")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, code, password_hash FROM students
             WHERE parent_phone = ?
             ORDER BY name",
        )
        .map_err(HandlerErr::query)?;
    let children: Vec<(String, String, String, String)> = stmt
        .query_map([&parent_phone], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    // Parents authenticate with any of their children's passwords; there is
    // no separate parent account.
    let authorized = children
        .iter()
        .any(|(_, _, _, hash)| session::verify_password(&password, hash));
    if children.is_empty() || !authorized {
        return Err(HandlerErr::new("not_authorized", "invalid credentials"));
    }

    let children_json: Vec<serde_json::Value> = children
        .iter()
        .map(|(id, name, code, _)| {
            json!({ "id": id, "name": name, "code": code })
        })
        .collect();
    let session = Session::parent(parent_phone.clone(), parent_phone, epoch_millis());
    Ok((session, children_json))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let role = match get_required_str(&req.params, "role") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let outcome = match Role::parse(&role) {
        Some(Role::Admin) => login_admin(conn, &req.params).map(|s| (s, None)),
        Some(Role::Student) => login_student(conn, &req.params).map(|s| (s, None)),
        Some(Role::Parent) => {
            login_parent(conn, &req.params).map(|(s, children)| (s, Some(children)))
        }
        None => Err(HandlerErr::new("bad_params", "unknown role")),
    };

    match outcome {
        Ok((session, children)) => {
            log::info!("{} session started", session.role.as_str());
            let mut result = session_json(&session);
            if let Some(children) = children {
                result["children"] = json!(children);
            }
            state.session = Some(session);
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(session) = state.session.take() {
        log::info!("{} session ended", session.role.as_str());
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(session) => {
            let mut result = session_json(session);
            result["active"] = json!(true);
            ok(&req.id, result)
        }
        None => ok(&req.id, json!({ "active": false })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        _ => None,
    }
}
