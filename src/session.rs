use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
    Parent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "student" => Some(Self::Student),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
            Self::Parent => "parent",
        }
    }
}

/// Who is connected to this daemon instance. Owned by `AppState` and torn
/// down on logout; there is no module-level credential state anywhere.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    /// Student id for student sessions; the parent's own phone for parent
    /// sessions; absent for admin.
    pub subject_id: Option<String>,
    pub display_name: String,
    pub started_at_millis: i64,
}

impl Session {
    pub fn admin(display_name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            role: Role::Admin,
            subject_id: None,
            display_name: display_name.into(),
            started_at_millis: now_millis,
        }
    }

    pub fn student(
        student_id: impl Into<String>,
        display_name: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            role: Role::Student,
            subject_id: Some(student_id.into()),
            display_name: display_name.into(),
            started_at_millis: now_millis,
        }
    }

    pub fn parent(
        parent_phone: impl Into<String>,
        display_name: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            role: Role::Parent,
            subject_id: Some(parent_phone.into()),
            display_name: display_name.into(),
            started_at_millis: now_millis,
        }
    }
}

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password).eq_ignore_ascii_case(stored_hash.trim())
}
