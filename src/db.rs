use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            faculty TEXT NOT NULL,
            course INTEGER NOT NULL
        )",
        [],
    )?;

    // Teachers are users with role='teacher'. The unique username index is
    // the final authority against duplicate logins; the run-scoped resolver
    // cache only prevents duplicate person rows within one import.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT NOT NULL,
            user_code TEXT NOT NULL,
            faculty TEXT NOT NULL,
            course INTEGER NOT NULL,
            is_staff INTEGER NOT NULL,
            is_active INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    // No unique constraint on (name, teacher_id): subject dedup is run-scoped
    // only, so re-imports may add rows for the same pair. Kept that way on
    // purpose; see DESIGN.md.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_teacher ON subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_entries(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            day TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            faculty TEXT NOT NULL,
            time TEXT NOT NULL,
            time_end TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            classroom TEXT NOT NULL,
            another_classroom TEXT NOT NULL,
            first_teacher_code TEXT NOT NULL,
            first_teacher_name TEXT NOT NULL,
            second_teacher_code TEXT,
            second_teacher_name TEXT,
            UNIQUE(group_id, day, lesson_number),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_group ON schedule_entries(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_subject ON schedule_entries(subject_id)",
        [],
    )?;

    Ok(())
}
