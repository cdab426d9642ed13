use std::path::PathBuf;

use log::{error, info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{self, DayTracker, NormalizedRow};
use crate::resolve::{GroupRef, Resolver, TeacherRef, UNSPECIFIED_FACULTY};
use crate::sheets::{RawRow, Workbook};

enum RowOutcome {
    Skipped,
    Created,
    Updated,
}

#[derive(Default)]
struct SheetStats {
    group_created: bool,
    rows_imported: usize,
    rows_skipped: usize,
    entries_created: usize,
    entries_updated: usize,
    errors: Vec<(usize, String)>,
}

/// `schedule.import` — runs the whole ingestion pipeline over one workbook.
///
/// Error boundaries, smallest first: a bad row is caught and logged without
/// touching the rest of its sheet; an unreadable sheet is skipped; only a
/// workbook that cannot be opened (or a failed transaction) aborts the run.
fn handle_schedule_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let workbook_path = match req.params.get("workbookPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing workbookPath", None),
    };
    let faculty = req
        .params
        .get("faculty")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNSPECIFIED_FACULTY)
        .to_string();
    let course = req.params.get("course").and_then(|v| v.as_i64()).unwrap_or(1);

    let mut workbook = match Workbook::open(&workbook_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "source_open_failed",
                format!("{e:#}"),
                Some(json!({ "workbookPath": workbook_path.to_string_lossy() })),
            )
        }
    };

    // Entity caches live here: one set for the whole run, all sheets.
    let mut resolver = Resolver::new(faculty.clone(), course);
    let mut sheets_out: Vec<serde_json::Value> = Vec::new();

    for title in workbook.sheet_titles() {
        let group_name = title.trim().to_string();
        if group_name.is_empty() {
            continue;
        }
        info!("processing group: {group_name}");

        let rows = match workbook.rows(&title) {
            Ok(v) => v,
            Err(e) => {
                error!("error reading sheet {group_name}: {e:#}");
                sheets_out.push(json!({
                    "group": group_name,
                    "skipped": true,
                    "error": format!("{e:#}"),
                }));
                continue;
            }
        };

        let stats = match import_sheet(conn, &mut resolver, &group_name, &faculty, &rows) {
            Ok(v) => v,
            Err(e) => {
                // Transaction-level failure; the sheet's writes rolled back.
                return err(
                    &req.id,
                    "db_tx_failed",
                    format!("{e:#}"),
                    Some(json!({ "group": group_name })),
                );
            }
        };
        info!("processed group: {group_name}");

        sheets_out.push(json!({
            "group": group_name,
            "groupCreated": stats.group_created,
            "rowsImported": stats.rows_imported,
            "rowsSkipped": stats.rows_skipped,
            "entriesCreated": stats.entries_created,
            "entriesUpdated": stats.entries_updated,
            "errors": stats
                .errors
                .iter()
                .map(|(row, message)| json!({ "row": row, "message": message }))
                .collect::<Vec<_>>(),
        }));
    }

    info!("import completed");
    ok(
        &req.id,
        json!({
            "sheets": sheets_out,
            "teachersCreated": resolver.teachers_created,
            "subjectsCreated": resolver.subjects_created,
        }),
    )
}

// One sheet: resolve the group up front, then run the row loop inside a
// single transaction. Row failures are contained below the transaction
// boundary and never trigger a rollback.
fn import_sheet(
    conn: &Connection,
    resolver: &mut Resolver,
    group_name: &str,
    faculty: &str,
    rows: &[RawRow],
) -> anyhow::Result<SheetStats> {
    let group = resolver.group(conn, group_name)?;
    if group.created {
        info!("created group: {}", group.name);
    }

    let mut stats = SheetStats {
        group_created: group.created,
        ..SheetStats::default()
    };

    let tx = conn.unchecked_transaction()?;
    let mut tracker = DayTracker::new();
    for (idx, row) in rows.iter().enumerate() {
        // The header occupies line 1 of the sheet, so data rows report from 2.
        let row_no = idx + 2;
        match import_row(&tx, resolver, &group, faculty, &mut tracker, row) {
            Ok(RowOutcome::Skipped) => stats.rows_skipped += 1,
            Ok(RowOutcome::Created) => {
                stats.rows_imported += 1;
                stats.entries_created += 1;
            }
            Ok(RowOutcome::Updated) => {
                stats.rows_imported += 1;
                stats.entries_updated += 1;
            }
            Err(e) => {
                warn!("error processing row {row_no} in {group_name}: {e:#}");
                stats.errors.push((row_no, format!("{e:#}")));
            }
        }
    }
    tx.commit()?;

    Ok(stats)
}

fn import_row(
    conn: &Connection,
    resolver: &mut Resolver,
    group: &GroupRef,
    faculty: &str,
    tracker: &mut DayTracker,
    row: &RawRow,
) -> anyhow::Result<RowOutcome> {
    let Some(normalized) = normalize::normalize_row(row, tracker)? else {
        return Ok(RowOutcome::Skipped);
    };

    let teachers =
        resolver.teachers_for_row(conn, &normalized.first_teacher, &normalized.second_teacher)?;
    let subject_id = resolver.subject(conn, &normalized.subject_name, &teachers[0])?;

    let created = upsert_entry(
        conn,
        group,
        faculty,
        tracker.peek_ordinal(),
        &normalized,
        &subject_id,
        &teachers,
    )?;
    tracker.consume_ordinal();

    Ok(if created {
        RowOutcome::Created
    } else {
        RowOutcome::Updated
    })
}

/// Idempotent write keyed by (group, day, lesson ordinal): find-by-key, then
/// create or overwrite the default fields. A missing second teacher clears
/// any previously stored pair.
fn upsert_entry(
    conn: &Connection,
    group: &GroupRef,
    faculty: &str,
    ordinal: i64,
    row: &NormalizedRow,
    subject_id: &str,
    teachers: &[TeacherRef],
) -> anyhow::Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM schedule_entries WHERE group_id = ? AND day = ? AND lesson_number = ?",
            (&group.id, &row.day, ordinal),
            |r| r.get(0),
        )
        .optional()?;

    let first = &teachers[0];
    let second_code = teachers.get(1).map(|t| t.code.clone());
    let second_name = teachers.get(1).map(|t| t.display_name());

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE schedule_entries SET
                   faculty = ?, time = ?, time_end = ?, subject_id = ?,
                   classroom = ?, another_classroom = ?,
                   first_teacher_code = ?, first_teacher_name = ?,
                   second_teacher_code = ?, second_teacher_name = ?
                 WHERE id = ?",
                (
                    faculty,
                    &row.time,
                    &row.time_end,
                    subject_id,
                    &row.classroom,
                    &row.another_classroom,
                    &first.code,
                    &first.display_name(),
                    &second_code,
                    &second_name,
                    &id,
                ),
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO schedule_entries(
                   id, group_id, day, lesson_number, faculty, time, time_end,
                   subject_id, classroom, another_classroom,
                   first_teacher_code, first_teacher_name,
                   second_teacher_code, second_teacher_name)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &Uuid::new_v4().to_string(),
                    &group.id,
                    &row.day,
                    ordinal,
                    faculty,
                    &row.time,
                    &row.time_end,
                    subject_id,
                    &row.classroom,
                    &row.another_classroom,
                    &first.code,
                    &first.display_name(),
                    &second_code,
                    &second_name,
                ),
            )?;
            Ok(true)
        }
    }
}

fn handle_schedule_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_name = match req.params.get("groupName").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupName", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT e.day, e.lesson_number, e.faculty, e.time, e.time_end,
                s.name, e.classroom, e.another_classroom,
                e.first_teacher_code, e.first_teacher_name,
                e.second_teacher_code, e.second_teacher_name
         FROM schedule_entries e
         JOIN groups g ON g.id = e.group_id
         JOIN subjects s ON s.id = e.subject_id
         WHERE g.name = ?
         ORDER BY e.day, e.lesson_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&group_name], |row| {
            Ok(json!({
                "day": row.get::<_, String>(0)?,
                "lessonNumber": row.get::<_, i64>(1)?,
                "faculty": row.get::<_, String>(2)?,
                "time": row.get::<_, String>(3)?,
                "timeEnd": row.get::<_, String>(4)?,
                "subject": row.get::<_, String>(5)?,
                "classroom": row.get::<_, String>(6)?,
                "anotherClassroom": row.get::<_, String>(7)?,
                "firstTeacherCode": row.get::<_, String>(8)?,
                "firstTeacherName": row.get::<_, String>(9)?,
                "secondTeacherCode": row.get::<_, Option<String>>(10)?,
                "secondTeacherName": row.get::<_, Option<String>>(11)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.import" => Some(handle_schedule_import(state, req)),
        "schedule.list" => Some(handle_schedule_list(state, req)),
        _ => None,
    }
}
