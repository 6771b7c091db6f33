use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "tutor.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            group_name TEXT,
            grade TEXT,
            phone TEXT,
            parent_phone TEXT,
            password_hash TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    ensure_students_parent_phone(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_name)",
        [],
    )?;

    // No UNIQUE(student_id, lesson_number): the counter derives from the
    // current max, so a deleted top record hands its number back and rapid
    // rescans may collide. Matching historical numbering matters more than
    // tidiness here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            date TEXT NOT NULL,
            time TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            student_code TEXT NOT NULL,
            group_name TEXT,
            month TEXT NOT NULL,
            date TEXT NOT NULL,
            amount REAL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_payments_amount(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS paid_months(
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL,
            month TEXT NOT NULL,
            date TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(payment_id) REFERENCES payments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_paid_months_payment ON paid_months(payment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS videos(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            group_name TEXT,
            grade TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            author TEXT,
            group_name TEXT,
            price REAL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            group_name TEXT,
            date TEXT,
            out_of REAL NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_scores(
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL,
            PRIMARY KEY(exam_id, student_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_scores_student ON exam_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_parent_phone(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces tracked only the student's own phone.
    if table_has_column(conn, "students", "parent_phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN parent_phone TEXT", [])?;
    Ok(())
}

fn ensure_payments_amount(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "amount")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN amount REAL", [])?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        // Malformed historical values must not block opening the workspace.
        Some(text) => Ok(serde_json::from_str(&text).ok()),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
