use anyhow::Context;
use chrono::{Duration, NaiveTime};

use crate::sheets::RawRow;

// Column names as they appear in the source workbooks.
pub const DAY_HEADER: &str = "День недели";
pub const TIME_HEADER: &str = "Время начала";
pub const SUBJECT_HEADER: &str = "Название";
pub const FIRST_TEACHER_HEADER: &str = "Преподаватель";
pub const SECOND_TEACHER_HEADER: &str = "2-ой преподаватель";
pub const CLASSROOM_HEADER: &str = "Кабинет";
pub const ANOTHER_CLASSROOM_HEADER: &str = "Прочие кабинеты";

/// Every lesson slot is 1h35m; the end time is always derived from the start
/// time, never read from the sheet.
const LESSON_DURATION_MINUTES: i64 = 95;

#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub day: String,
    pub time: String,
    pub time_end: String,
    pub subject_name: String,
    pub first_teacher: String,
    pub second_teacher: String,
    pub classroom: String,
    pub another_classroom: String,
}

/// Day cursor + lesson counter for one sheet. Owned by the import loop and
/// passed through explicitly; never ambient state.
#[derive(Debug)]
pub struct DayTracker {
    current_day: Option<String>,
    next_ordinal: i64,
}

impl DayTracker {
    pub fn new() -> Self {
        DayTracker {
            current_day: None,
            next_ordinal: 1,
        }
    }

    // Runs before the skip test so a row with some other field missing can
    // never hide a day boundary.
    fn observe(&mut self, day: &str) {
        if self.current_day.as_deref() != Some(day) {
            self.current_day = Some(day.to_string());
            self.next_ordinal = 1;
        }
    }

    /// The ordinal the next successful row will be keyed under.
    pub fn peek_ordinal(&self) -> i64 {
        self.next_ordinal
    }

    /// Consumes the current ordinal after a successful upsert. Skipped and
    /// failed rows never consume one.
    pub fn consume_ordinal(&mut self) -> i64 {
        let n = self.next_ordinal;
        self.next_ordinal += 1;
        n
    }
}

/// Converts one raw row into a validated record, or `None` when the row is
/// missing any of day / start time / subject name (a skip, not an error).
pub fn normalize_row(row: &RawRow, tracker: &mut DayTracker) -> anyhow::Result<Option<NormalizedRow>> {
    let field = |key: &str| {
        row.get(key)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let day = field(DAY_HEADER);
    tracker.observe(&day);

    let time = field(TIME_HEADER);
    let subject_name = field(SUBJECT_HEADER);
    if day.is_empty() || time.is_empty() || subject_name.is_empty() {
        return Ok(None);
    }

    let time_end = end_time(&time)?;

    Ok(Some(NormalizedRow {
        day,
        time_end,
        time,
        subject_name,
        first_teacher: field(FIRST_TEACHER_HEADER),
        second_teacher: field(SECOND_TEACHER_HEADER),
        classroom: field(CLASSROOM_HEADER),
        another_classroom: field(ANOTHER_CLASSROOM_HEADER),
    }))
}

fn end_time(start: &str) -> anyhow::Result<String> {
    let t = NaiveTime::parse_from_str(start, "%H:%M")
        .with_context(|| format!("start time {:?} is not in hour:minute form", start))?;
    let end = t + Duration::minutes(LESSON_DURATION_MINUTES);
    Ok(end.format("%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_row_normalizes_with_derived_end_time() {
        let mut tracker = DayTracker::new();
        let r = row(&[
            (DAY_HEADER, " Понедельник "),
            (TIME_HEADER, "09:00"),
            (SUBJECT_HEADER, "Алгебра"),
            (FIRST_TEACHER_HEADER, "Петров И."),
            (CLASSROOM_HEADER, "101"),
        ]);
        let n = normalize_row(&r, &mut tracker)
            .expect("normalize")
            .expect("not skipped");
        assert_eq!(n.day, "Понедельник");
        assert_eq!(n.time, "09:00");
        assert_eq!(n.time_end, "10:35");
        assert_eq!(n.subject_name, "Алгебра");
        assert_eq!(n.first_teacher, "Петров И.");
        assert_eq!(n.second_teacher, "");
        assert_eq!(n.classroom, "101");
    }

    #[test]
    fn missing_required_field_is_a_skip_not_an_error() {
        let mut tracker = DayTracker::new();
        for missing in [DAY_HEADER, TIME_HEADER, SUBJECT_HEADER] {
            let mut r = row(&[
                (DAY_HEADER, "Вторник"),
                (TIME_HEADER, "10:45"),
                (SUBJECT_HEADER, "Физика"),
            ]);
            r.insert(missing.to_string(), "   ".to_string());
            let n = normalize_row(&r, &mut tracker).expect("normalize");
            assert!(n.is_none(), "row without {missing} should skip");
        }
    }

    #[test]
    fn unparseable_start_time_is_a_row_error() {
        let mut tracker = DayTracker::new();
        let r = row(&[
            (DAY_HEADER, "Среда"),
            (TIME_HEADER, "9am"),
            (SUBJECT_HEADER, "Химия"),
        ]);
        assert!(normalize_row(&r, &mut tracker).is_err());
    }

    #[test]
    fn end_time_wraps_past_midnight() {
        assert_eq!(end_time("23:00").expect("end"), "00:35");
    }

    #[test]
    fn day_change_resets_ordinal_even_on_skipped_rows() {
        let mut tracker = DayTracker::new();

        let monday = row(&[
            (DAY_HEADER, "Понедельник"),
            (TIME_HEADER, "09:00"),
            (SUBJECT_HEADER, "Алгебра"),
        ]);
        let _ = normalize_row(&monday, &mut tracker).expect("normalize");
        assert_eq!(tracker.consume_ordinal(), 1);
        let _ = normalize_row(&monday, &mut tracker).expect("normalize");
        assert_eq!(tracker.consume_ordinal(), 2);

        // Tuesday row that is skipped for a missing subject still moves the
        // day cursor and resets the counter.
        let broken_tuesday = row(&[(DAY_HEADER, "Вторник"), (TIME_HEADER, "09:00")]);
        let n = normalize_row(&broken_tuesday, &mut tracker).expect("normalize");
        assert!(n.is_none());
        assert_eq!(tracker.peek_ordinal(), 1);

        let tuesday = row(&[
            (DAY_HEADER, "Вторник"),
            (TIME_HEADER, "10:45"),
            (SUBJECT_HEADER, "Физика"),
        ]);
        let _ = normalize_row(&tuesday, &mut tracker).expect("normalize");
        assert_eq!(tracker.consume_ordinal(), 1);
    }

    #[test]
    fn failed_rows_do_not_consume_ordinals() {
        let mut tracker = DayTracker::new();
        let bad = row(&[
            (DAY_HEADER, "Четверг"),
            (TIME_HEADER, "later"),
            (SUBJECT_HEADER, "История"),
        ]);
        assert!(normalize_row(&bad, &mut tracker).is_err());
        assert_eq!(tracker.peek_ordinal(), 1);
    }
}
