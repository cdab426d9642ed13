use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

pub const UNSPECIFIED_FACULTY: &str = "Не указан";
pub const SENTINEL_TEACHER: &str = "No Teacher";
const EMAIL_DOMAIN: &str = "msu.portal";

#[derive(Debug, Clone)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct TeacherRef {
    pub id: String,
    pub code: String,
    pub last_name: String,
    pub first_name: String,
}

impl TeacherRef {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
            .trim()
            .to_string()
    }
}

/// Resolve-or-create for the entities a schedule row references.
///
/// The two caches live for one import call across all of its sheets. They are
/// the only person/subject dedup there is: the store itself only enforces
/// username uniqueness, so a second run (empty caches) creates fresh teacher
/// rows under suffixed usernames and fresh subject rows. Known limitation,
/// covered by tests.
pub struct Resolver {
    faculty: String,
    course: i64,
    teachers: HashMap<String, TeacherRef>,
    subjects: HashMap<String, String>,
    pub teachers_created: usize,
    pub subjects_created: usize,
}

impl Resolver {
    pub fn new(faculty: String, course: i64) -> Self {
        Resolver {
            faculty,
            course,
            teachers: HashMap::new(),
            subjects: HashMap::new(),
            teachers_created: 0,
            subjects_created: 0,
        }
    }

    /// Group lookup is by exact name; a miss creates the group with the run's
    /// default faculty/course. Groups are never updated after creation.
    pub fn group(&self, conn: &Connection, name: &str) -> anyhow::Result<GroupRef> {
        let existing: Option<String> = conn
            .query_row("SELECT id FROM groups WHERE name = ?", [name], |r| r.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(GroupRef {
                id,
                name: name.to_string(),
                created: false,
            });
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO groups(id, name, faculty, course) VALUES(?, ?, ?, ?)",
            (&id, name, &self.faculty, self.course),
        )?;
        Ok(GroupRef {
            id,
            name: name.to_string(),
            created: true,
        })
    }

    /// Resolves the row's teacher pair. Empty names resolve to nothing; if
    /// both are empty the sentinel teacher stands in, so the result always
    /// holds one or two teachers.
    pub fn teachers_for_row(
        &mut self,
        conn: &Connection,
        first: &str,
        second: &str,
    ) -> anyhow::Result<Vec<TeacherRef>> {
        let mut teachers = Vec::new();
        for name in [first, second] {
            if let Some(t) = self.teacher(conn, name)? {
                teachers.push(t);
            }
        }
        if teachers.is_empty() {
            let sentinel = self
                .teacher(conn, SENTINEL_TEACHER)?
                .ok_or_else(|| anyhow::anyhow!("sentinel teacher did not resolve"))?;
            teachers.push(sentinel);
        }
        Ok(teachers)
    }

    /// Resolve-or-create one teacher by display name. Empty or unsplittable
    /// input is a valid no-teacher outcome, not an error.
    pub fn teacher(&mut self, conn: &Connection, name: &str) -> anyhow::Result<Option<TeacherRef>> {
        let Some((last_name, first_name)) = split_teacher_name(name) else {
            return Ok(None);
        };

        let key = format!("{} {}", last_name, first_name).trim().to_string();
        if let Some(t) = self.teachers.get(&key) {
            return Ok(Some(t.clone()));
        }

        let username = free_username(conn, &username_base(&last_name, &first_name))?;
        let teacher_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM users WHERE role = 'teacher'", [], |r| {
                r.get(0)
            })?;
        let code = format!("t{:04}", teacher_count + 1);

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users(id, username, first_name, last_name, email, role, user_code,
                               faculty, course, is_staff, is_active)
             VALUES(?, ?, ?, ?, ?, 'teacher', ?, ?, 0, 1, 1)",
            (
                &id,
                &username,
                &first_name,
                &last_name,
                &format!("{username}@{EMAIL_DOMAIN}"),
                &code,
                &self.faculty,
            ),
        )?;

        let teacher = TeacherRef {
            id,
            code,
            last_name,
            first_name,
        };
        self.teachers.insert(key, teacher.clone());
        self.teachers_created += 1;
        Ok(Some(teacher))
    }

    /// Subjects are keyed by name + primary teacher within the run. A cache
    /// miss always creates a new row; there is no store-level lookup.
    pub fn subject(
        &mut self,
        conn: &Connection,
        name: &str,
        primary: &TeacherRef,
    ) -> anyhow::Result<String> {
        let key = format!("{}_{}", name, primary.id);
        if let Some(id) = self.subjects.get(&key) {
            return Ok(id.clone());
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO subjects(id, name, teacher_id) VALUES(?, ?, ?)",
            (&id, name, &primary.id),
        )?;
        self.subjects.insert(key, id.clone());
        self.subjects_created += 1;
        Ok(id)
    }
}

/// First token is the last name, the rest (joined) the first name.
fn split_teacher_name(full: &str) -> Option<(String, String)> {
    let mut parts = full.split_whitespace();
    let last = parts.next()?.to_string();
    let first = parts.collect::<Vec<_>>().join(" ");
    Some((last, first))
}

fn username_base(last_name: &str, first_name: &str) -> String {
    let first = first_name.to_lowercase().replace('.', "").replace(' ', "_");
    format!("{}_{}", last_name.to_lowercase(), first)
}

// The suffix loop only keeps the unique index happy; it does not merge with
// teacher rows left by earlier runs.
fn free_username(conn: &Connection, base: &str) -> anyhow::Result<String> {
    let mut candidate = base.to_string();
    let mut counter = 1;
    loop {
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE username = ?", [&candidate], |r| {
                r.get(0)
            })
            .optional()?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate = format!("{base}_{counter}");
        counter += 1;
    }
}
