//! Backup job state machine: every operation from every status.

use chrono::Utc;
use dbvault_core::backup::{BackupJob, BackupStatus, BackupType};
use dbvault_core::executor::{BackupOptions, BackupResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Start,
    Complete,
    Fail,
    Cancel,
    Retry,
}

fn result() -> BackupResult {
    BackupResult {
        path: PathBuf::from("/var/backups/app.sql"),
        original_size: 10,
        compressed_size: None,
        compression: None,
        duration: Duration::from_millis(5),
        tables: vec!["public.users".into()],
        metadata: BTreeMap::new(),
        checksum: "ab".into(),
    }
}

/// A job driven into `status` through legal transitions.
fn job_in(status: BackupStatus) -> BackupJob {
    let now = Utc::now();
    let mut job = BackupJob::create(Uuid::new_v4(), BackupType::Full, BackupOptions::default(), None, now);
    match status {
        BackupStatus::Pending => {}
        BackupStatus::Running => job.start(now).unwrap(),
        BackupStatus::Completed => {
            job.start(now).unwrap();
            job.complete(&result(), None, now).unwrap();
        }
        BackupStatus::Failed => {
            job.start(now).unwrap();
            job.fail("boom", "TOOL_FAILED", now).unwrap();
        }
        BackupStatus::Cancelled => job.cancel(now).unwrap(),
    }
    assert_eq!(job.status, status);
    job
}

fn apply(job: &mut BackupJob, op: Op) -> bool {
    let now = Utc::now();
    match op {
        Op::Start => job.start(now),
        Op::Complete => job.complete(&result(), None, now),
        Op::Fail => job.fail("boom", "TOOL_FAILED", now),
        Op::Cancel => job.cancel(now),
        Op::Retry => job.retry(now),
    }
    .is_ok()
}

#[test]
fn test_transition_table() {
    use BackupStatus::*;
    let legal: &[(BackupStatus, Op, BackupStatus)] = &[
        (Pending, Op::Start, Running),
        (Pending, Op::Fail, Failed),
        (Pending, Op::Cancel, Cancelled),
        (Running, Op::Complete, Completed),
        (Running, Op::Fail, Failed),
        (Running, Op::Cancel, Cancelled),
        (Failed, Op::Retry, Pending),
        (Cancelled, Op::Retry, Pending),
    ];

    for from in [Pending, Running, Completed, Failed, Cancelled] {
        for op in [Op::Start, Op::Complete, Op::Fail, Op::Cancel, Op::Retry] {
            let mut job = job_in(from);
            let before = job.clone();
            let expected = legal.iter().find(|(f, o, _)| *f == from && *o == op);

            let ok = apply(&mut job, op);
            match expected {
                Some((_, _, to)) => {
                    assert!(ok, "{:?} from {} should succeed", op, from);
                    assert_eq!(job.status, *to);
                }
                None => {
                    assert!(!ok, "{:?} from {} should be rejected", op, from);
                    assert_eq!(job.status, before.status);
                    assert_eq!(job.updated_at, before.updated_at);
                }
            }
        }
    }
}

#[test]
fn test_completed_job_is_frozen() {
    let mut job = job_in(BackupStatus::Completed);
    assert_eq!(job.progress, 100.0);
    assert_eq!(job.original_size, Some(10));
    assert!(!job.update_progress(10.0, "late", Utc::now()));
    assert_eq!(job.progress, 100.0);
    assert!(job.status.is_terminal());
}

#[test]
fn test_failed_then_retried_job_starts_clean() {
    let mut job = job_in(BackupStatus::Failed);
    assert_eq!(job.error_code.as_deref(), Some("TOOL_FAILED"));
    assert!(job.duration().is_some());

    job.retry(Utc::now()).unwrap();
    assert!(job.error_message.is_none());
    assert!(job.duration().is_none());
    assert_eq!(job.progress, 0.0);

    job.start(Utc::now()).unwrap();
    assert!(job.update_progress(40.0, "Dumping table public.users", Utc::now()));
    assert!(!job.status.is_terminal());
    assert!(job.status.is_active());

    let report = job.progress_report();
    assert_eq!(report.progress, 40.0);
    assert_eq!(report.current_step.as_deref(), Some("Dumping table public.users"));
    assert!(report.duration_seconds.is_none());
}
