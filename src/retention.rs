use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::{Error, JobRecord};

/// How long a trashed job stays restorable.
pub fn default_window() -> Duration {
    Duration::days(3)
}

/// Move a record to the trash. Re-trashing is a conflict, not a no-op, so the
/// caller can tell the record was already hidden.
pub fn trash(record: &mut JobRecord, now: DateTime<Utc>) -> Result<(), Error> {
    if record.deleted_at.is_some() {
        return Err(Error::Conflict(format!(
            "job {} is already in the trash",
            record.id
        )));
    }
    record.deleted_at = Some(now);
    Ok(())
}

/// Clear the deletion stamp. Only an explicit restore may do this.
pub fn restore(record: &mut JobRecord) -> Result<(), Error> {
    if record.deleted_at.take().is_none() {
        return Err(Error::Conflict(format!(
            "job {} is not in the trash",
            record.id
        )));
    }
    Ok(())
}

/// Whether the retention window has fully elapsed since deletion. Purge timing
/// is decided here, from the absolute instants, never from the rounded
/// display value.
pub fn is_expired(record: &JobRecord, window: Duration, now: DateTime<Utc>) -> bool {
    match record.deleted_at {
        Some(deleted_at) => now - deleted_at >= window,
        None => false,
    }
}

/// Display-only view of the time left before a trashed job is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLeft {
    Days(i64),
    LessThanADay,
}

impl fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeLeft::Days(days) => write!(f, "{days} days"),
            TimeLeft::LessThanADay => write!(f, "less than a day"),
        }
    }
}

/// Remaining retention time in whole days (ceiling), floored at the
/// [`TimeLeft::LessThanADay`] sentinel. `None` for records not in the trash.
pub fn time_left(record: &JobRecord, window: Duration, now: DateTime<Utc>) -> Option<TimeLeft> {
    let deleted_at = record.deleted_at?;
    let remaining = window - (now - deleted_at);
    if remaining < Duration::days(1) {
        Some(TimeLeft::LessThanADay)
    } else {
        let days = (remaining.num_seconds() + 86_399) / 86_400;
        Some(TimeLeft::Days(days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobState;
    use uuid::Uuid;

    fn record() -> JobRecord {
        JobRecord {
            id: Uuid::new_v4(),
            owner: "tester".into(),
            source_url: "https://example.com/videos/a1b2c3".into(),
            display_name: "Video_a1b2c3.mp4".into(),
            model_hint: "standard".into(),
            state: JobState::Completed,
            progress: 100,
            report: None,
            failure_reason: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn trash_then_restore_round_trips() {
        let mut job = record();
        let before = job.clone();
        let now = Utc::now();

        trash(&mut job, now).unwrap();
        assert_eq!(job.deleted_at, Some(now));

        restore(&mut job).unwrap();
        assert!(job.deleted_at.is_none());
        assert_eq!(job.state, before.state);
        assert_eq!(job.progress, before.progress);
    }

    #[test]
    fn double_trash_is_a_conflict() {
        let mut job = record();
        let first = Utc::now();
        trash(&mut job, first).unwrap();

        let err = trash(&mut job, first + Duration::hours(1)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // The original stamp survives the rejected call.
        assert_eq!(job.deleted_at, Some(first));
    }

    #[test]
    fn restoring_an_active_record_is_a_conflict() {
        let mut job = record();
        let err = restore(&mut job).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn expiry_is_inclusive_of_the_window_boundary() {
        let mut job = record();
        let deleted = Utc::now();
        trash(&mut job, deleted).unwrap();
        let window = Duration::days(3);

        assert!(!is_expired(&job, window, deleted + Duration::days(2)));
        assert!(is_expired(&job, window, deleted + window));
        assert!(is_expired(&job, window, deleted + Duration::days(4)));
    }

    #[test]
    fn active_records_never_expire() {
        let job = record();
        assert!(!is_expired(&job, Duration::zero(), Utc::now()));
    }

    #[test]
    fn time_left_ceils_to_whole_days() {
        let mut job = record();
        let deleted = Utc::now();
        trash(&mut job, deleted).unwrap();
        let window = Duration::days(3);

        assert_eq!(
            time_left(&job, window, deleted),
            Some(TimeLeft::Days(3))
        );
        assert_eq!(
            time_left(&job, window, deleted + Duration::hours(30)),
            Some(TimeLeft::Days(2))
        );
    }

    #[test]
    fn time_left_bottoms_out_at_the_sentinel() {
        let mut job = record();
        let deleted = Utc::now();
        trash(&mut job, deleted).unwrap();
        let window = Duration::days(3);

        // Under a day left, and even past expiry, never a zero or negative.
        assert_eq!(
            time_left(&job, window, deleted + Duration::hours(50)),
            Some(TimeLeft::LessThanADay)
        );
        assert_eq!(
            time_left(&job, window, deleted + Duration::days(5)),
            Some(TimeLeft::LessThanADay)
        );
    }

    #[test]
    fn time_left_is_absent_for_active_records() {
        let job = record();
        assert_eq!(time_left(&job, default_window(), Utc::now()), None);
    }
}
