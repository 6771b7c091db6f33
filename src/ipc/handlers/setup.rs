use crate::access::AbsencePolicy;
use crate::billing;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{
    AppState, Request, CACHE_MAX_ENTRIES, PAYMENT_CACHE_TTL_MILLIS, STUDENT_CACHE_TTL_MILLIS,
};
use crate::session;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Billing,
    VideoAccess,
    Cache,
    Security,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(Self::Billing),
            "videoAccess" => Some(Self::VideoAccess),
            "cache" => Some(Self::Cache),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Billing => "setup.billing",
            Self::VideoAccess => "setup.videoAccess",
            Self::Cache => "setup.cache",
            Self::Security => "setup.security",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Billing => json!({
            "lessonsPerPeriod": billing::DEFAULT_LESSONS_PER_PERIOD,
        }),
        SetupSection::VideoAccess => json!({
            "maxAbsencesPerMonth": 3,
            "windowDays": 7,
            "windowAbsences": 2,
        }),
        SetupSection::Cache => json!({
            "studentTtlMillis": STUDENT_CACHE_TTL_MILLIS,
            "paymentTtlMillis": PAYMENT_CACHE_TTL_MILLIS,
            "maxEntries": CACHE_MAX_ENTRIES,
        }),
        SetupSection::Security => json!({
            "adminUsername": "admin",
            "adminPasswordHash": null,
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Billing => match k.as_str() {
                "lessonsPerPeriod" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 64)?));
                }
                _ => return Err(format!("unknown billing field: {}", k)),
            },
            SetupSection::VideoAccess => match k.as_str() {
                "maxAbsencesPerMonth" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 31)?));
                }
                "windowDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 31)?));
                }
                "windowAbsences" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 2, 31)?));
                }
                _ => return Err(format!("unknown videoAccess field: {}", k)),
            },
            SetupSection::Cache => match k.as_str() {
                "studentTtlMillis" | "paymentTtlMillis" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1_000, 86_400_000)?),
                    );
                }
                "maxEntries" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10_000)?));
                }
                _ => return Err(format!("unknown cache field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "adminUsername" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
                }
                // The UI submits a plain password; only its hash is stored.
                "adminPassword" => {
                    let plain = parse_string_max(v, k, 128)?;
                    obj.insert(
                        "adminPasswordHash".to_string(),
                        Value::String(session::hash_password(&plain)),
                    );
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let (Some(saved_obj), Some(obj)) = (saved.as_object(), current.as_object_mut()) {
            for (k, v) in saved_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(current)
}

/// Bucket size shared by the billing-period mapper and the eligibility
/// check. Reading it through one accessor keeps the two from ever seeing
/// different values.
pub fn lessons_per_period(conn: &Connection) -> i64 {
    load_section(conn, SetupSection::Billing)
        .ok()
        .and_then(|v| v.get("lessonsPerPeriod").and_then(|n| n.as_i64()))
        .unwrap_or(billing::DEFAULT_LESSONS_PER_PERIOD)
        .max(1)
}

pub fn video_policy(conn: &Connection) -> AbsencePolicy {
    let defaults = AbsencePolicy::default();
    let Ok(section) = load_section(conn, SetupSection::VideoAccess) else {
        return defaults;
    };
    AbsencePolicy {
        max_absences_per_month: section
            .get("maxAbsencesPerMonth")
            .and_then(|v| v.as_i64())
            .unwrap_or(defaults.max_absences_per_month),
        window_days: section
            .get("windowDays")
            .and_then(|v| v.as_i64())
            .unwrap_or(defaults.window_days),
        window_absences: section
            .get("windowAbsences")
            .and_then(|v| v.as_i64())
            .unwrap_or(defaults.window_absences),
    }
}

pub struct CacheConfig {
    pub student_ttl_millis: i64,
    pub payment_ttl_millis: i64,
    pub max_entries: usize,
}

pub fn cache_config(conn: &Connection) -> CacheConfig {
    let section = load_section(conn, SetupSection::Cache).unwrap_or_else(|_| json!({}));
    CacheConfig {
        student_ttl_millis: section
            .get("studentTtlMillis")
            .and_then(|v| v.as_i64())
            .unwrap_or(STUDENT_CACHE_TTL_MILLIS),
        payment_ttl_millis: section
            .get("paymentTtlMillis")
            .and_then(|v| v.as_i64())
            .unwrap_or(PAYMENT_CACHE_TTL_MILLIS),
        max_entries: section
            .get("maxEntries")
            .and_then(|v| v.as_i64())
            .map(|n| n.max(1) as usize)
            .unwrap_or(CACHE_MAX_ENTRIES),
    }
}

/// Returns the configured admin username and password hash. A missing hash
/// means the workspace has not set credentials yet.
pub fn admin_credentials(conn: &Connection) -> (String, Option<String>) {
    let Ok(section) = load_section(conn, SetupSection::Security) else {
        return ("admin".to_string(), None);
    };
    let username = section
        .get("adminUsername")
        .and_then(|v| v.as_str())
        .unwrap_or("admin")
        .to_string();
    let hash = section
        .get("adminPasswordHash")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    (username, hash)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let billing_section = match load_section(conn, SetupSection::Billing) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let video_access = match load_section(conn, SetupSection::VideoAccess) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cache = match load_section(conn, SetupSection::Cache) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut security = match load_section(conn, SetupSection::Security) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // The hash itself stays server-side.
    if let Some(obj) = security.as_object_mut() {
        let configured = obj
            .get("adminPasswordHash")
            .map(|v| !v.is_null())
            .unwrap_or(false);
        obj.remove("adminPasswordHash");
        obj.insert("adminPasswordSet".to_string(), Value::Bool(configured));
    }

    ok(
        &req.id,
        json!({
            "billing": billing_section,
            "videoAccess": video_access,
            "cache": cache,
            "security": security
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // New cache parameters take effect immediately, not at next open.
    if matches!(section, SetupSection::Cache) {
        let cfg = cache_config(conn);
        state.student_cache =
            crate::cache::EvictionCache::new(cfg.student_ttl_millis, cfg.max_entries);
        state.payment_cache =
            crate::cache::EvictionCache::new(cfg.payment_ttl_millis, cfg.max_entries);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
