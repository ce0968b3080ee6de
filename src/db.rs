use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            first_name TEXT,
            last_name TEXT,
            phone_number TEXT,
            avatar_url TEXT,
            updated_at TEXT,
            FOREIGN KEY(id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(owner_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_institutions_owner ON institutions(owner_id)",
        [],
    )?;

    // Careers hang off an institution; the store owns the cascade.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS careers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(institution_id) REFERENCES institutions(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_careers_institution ON careers(institution_id)",
        [],
    )?;

    // Flat lookup catalogs, no relationships among themselves.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades_catalog(
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            grade TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections_catalog(
            id TEXT PRIMARY KEY,
            section TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods_catalog(
            id TEXT PRIMARY KEY,
            period TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            career_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(career_id) REFERENCES careers(id) ON DELETE CASCADE,
            FOREIGN KEY(grade_id) REFERENCES grades_catalog(id),
            FOREIGN KEY(section_id) REFERENCES sections_catalog(id),
            FOREIGN KEY(period_id) REFERENCES periods_catalog(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_career ON courses(career_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    // student_code and email are natural keys when present; NULLs stay free.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT UNIQUE,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    Ok(conn)
}

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}
