use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::EvictionCache;
use crate::session::Session;

pub const STUDENT_CACHE_TTL_MILLIS: i64 = 600_000;
pub const PAYMENT_CACHE_TTL_MILLIS: i64 = 300_000;
pub const CACHE_MAX_ENTRIES: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Student fields the scan flow needs; kept small so cache entries stay cheap
/// to clone. The password hash never enters the cache.
#[derive(Debug, Clone)]
pub struct CachedStudent {
    pub id: String,
    pub name: String,
    pub code: String,
    pub group_name: Option<String>,
    pub grade: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    /// Keyed by student code (the value scanned at check-in).
    pub student_cache: EvictionCache<String, CachedStudent>,
    /// Keyed by student id; caches the flattened paid-month label history.
    pub payment_cache: EvictionCache<String, Vec<String>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            student_cache: EvictionCache::new(STUDENT_CACHE_TTL_MILLIS, CACHE_MAX_ENTRIES),
            payment_cache: EvictionCache::new(PAYMENT_CACHE_TTL_MILLIS, CACHE_MAX_ENTRIES),
        }
    }
}
