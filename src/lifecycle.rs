use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AnalysisReport, Error, JobRecord};

/// Number of ordered non-terminal stages (`Queued` through `Analyzing`).
const STAGE_COUNT: u32 = 4;

/// Pipeline position of a job.
///
/// The happy path is `Queued → Fetching → Retrieving → Analyzing → Completed`;
/// `Failed` is reachable from any non-terminal state. `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Fetching,
    Retrieving,
    Analyzing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Position on the ordered happy path. `Failed` sits outside the order.
    fn stage_index(self) -> Option<u32> {
        match self {
            JobState::Queued => Some(0),
            JobState::Fetching => Some(1),
            JobState::Retrieving => Some(2),
            JobState::Analyzing => Some(3),
            JobState::Completed => Some(4),
            JobState::Failed => None,
        }
    }

    /// Progress recorded when a job enters this state.
    pub fn progress(self) -> u8 {
        match self.stage_index() {
            Some(k) => ((100 * k + STAGE_COUNT / 2) / STAGE_COUNT) as u8,
            None => 0,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Fetching => write!(f, "fetching"),
            JobState::Retrieving => write!(f, "retrieving"),
            JobState::Analyzing => write!(f, "analyzing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// A pipeline worker's report of one transition.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// Entered a further non-terminal stage.
    Advanced(JobState),
    /// Finished with a full report attached.
    Completed(Box<AnalysisReport>),
    /// Gave up; the diagnostic is recorded verbatim.
    Failed(String),
}

impl StageOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageOutcome::Advanced(_))
    }
}

/// Apply a worker-reported transition to a record.
///
/// Rejects any transition on a terminal record and any backward or same-state
/// move, so callers can tell "already finished" apart from "accepted". This is
/// the only place `state`, `progress`, `report` and `failure_reason` change.
pub fn apply(record: &mut JobRecord, outcome: StageOutcome) -> Result<(), Error> {
    if record.state.is_terminal() {
        return Err(Error::Conflict(format!(
            "job {} is already {}",
            record.id, record.state
        )));
    }

    match outcome {
        StageOutcome::Advanced(next) => {
            if next.is_terminal() {
                return Err(Error::Validation(format!(
                    "entering {next} requires an outcome payload"
                )));
            }
            match (record.state.stage_index(), next.stage_index()) {
                (Some(current), Some(target)) if target > current => {
                    record.state = next;
                    record.progress = next.progress();
                    Ok(())
                }
                _ => Err(Error::Conflict(format!(
                    "job {} cannot move {} -> {}",
                    record.id, record.state, next
                ))),
            }
        }
        StageOutcome::Completed(report) => {
            record.state = JobState::Completed;
            record.progress = 100;
            record.report = Some(*report);
            Ok(())
        }
        StageOutcome::Failed(reason) => {
            // Progress stays at its last recorded value.
            record.state = JobState::Failed;
            record.failure_reason = Some(reason);
            Ok(())
        }
    }
}
