use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::api::ApiHandle;
use crate::{Error, JobRecord, ReportBundle};

/// Consecutive failed polls before the loop escalates its log level.
const STALE_POLL_THRESHOLD: u32 = 5;

/// True once no record needs further observation.
pub fn all_terminal(jobs: &[JobRecord]) -> bool {
    jobs.iter().all(|job| job.state.is_terminal())
}

/// An owner's live projection of the authoritative job set.
///
/// The view is an explicit cache owned by the session: a snapshot replaced
/// wholesale on every successful fetch, read through a `watch` receiver.
/// Mutations never touch it directly; they trigger a refresh instead, because
/// the service holds the authoritative ids, timestamps and states.
#[derive(Clone)]
pub struct Session {
    api: ApiHandle,
    owner: String,
    refresh: mpsc::UnboundedSender<()>,
    view: watch::Receiver<Vec<JobRecord>>,
}

impl Session {
    /// Spawn the poll loop for `owner` and hand back the session plus the
    /// loop's join handle. Cancelling the token ends the loop; an in-flight
    /// fetch at that point is discarded unapplied.
    pub fn open(
        api: ApiHandle,
        owner: impl Into<String>,
        poll_interval: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let owner = owner.into();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(Vec::new());
        let join_handle = tokio::spawn(
            run(
                cancel_token,
                api.clone(),
                owner.clone(),
                poll_interval,
                refresh_rx,
                view_tx,
            )
            .instrument(info_span!("poll")),
        );
        let session = Session {
            api,
            owner,
            refresh: refresh_tx,
            view: view_rx,
        };
        (session, join_handle)
    }

    /// Current snapshot receiver; `borrow` for the latest set, `changed` to
    /// await the next replacement.
    pub fn view(&self) -> watch::Receiver<Vec<JobRecord>> {
        self.view.clone()
    }

    /// Submit a batch and pull the authoritative set straight after.
    pub async fn submit(
        &self,
        sources: Vec<String>,
        model_hint: &str,
    ) -> Result<Vec<Uuid>, Error> {
        let ids = self.api.submit(&self.owner, sources, model_hint).await?;
        self.request_refresh();
        Ok(ids)
    }

    pub async fn trash(&self, job_id: Uuid) -> Result<(), Error> {
        self.api.trash(&self.owner, job_id).await?;
        self.request_refresh();
        Ok(())
    }

    pub async fn restore(&self, job_id: Uuid) -> Result<(), Error> {
        self.api.restore(&self.owner, job_id).await?;
        self.request_refresh();
        Ok(())
    }

    pub async fn purge(&self, job_id: Uuid) -> Result<(), Error> {
        self.api.purge(&self.owner, job_id).await?;
        self.request_refresh();
        Ok(())
    }

    pub async fn clear_trash(&self) -> Result<usize, Error> {
        let purged = self.api.clear_trash(&self.owner).await?;
        self.request_refresh();
        Ok(purged)
    }

    pub async fn export(&self, job_id: Uuid) -> Result<ReportBundle, Error> {
        self.api.export(&self.owner, job_id).await
    }

    /// Ask for an immediate fetch outside the poll schedule, e.g. when the
    /// operator reopens a quiescent view.
    pub fn refresh(&self) {
        self.request_refresh();
    }

    fn request_refresh(&self) {
        // A closed loop means the session is over; nothing left to refresh.
        let _ = self.refresh.send(());
    }
}

/// The poll loop. One cooperative timer, armed only while the view holds a
/// non-terminal record; the tick that observes an all-terminal set is the
/// last one. Mutation paths nudge the loop over the `refresh` channel instead
/// of waiting out the interval.
pub async fn run(
    cancel_token: CancellationToken,
    api: ApiHandle,
    owner: String,
    poll_interval: Duration,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
    view_tx: watch::Sender<Vec<JobRecord>>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polling = false;
    let mut missed_polls: u32 = 0;

    loop {
        tokio::select! {
            // Checked first so a fetch resolving at the same moment can never
            // resurrect the view after the session ended.
            biased;
            _ = cancel_token.cancelled() => {
                debug!("Session cancelled, poll timer stopped");
                break;
            },
            _ = ticker.tick(), if polling => {
                if let Some(active) =
                    refresh_view(&cancel_token, &api, &owner, &view_tx, &mut missed_polls).await
                {
                    polling = active;
                }
            },
            nudge = refresh_rx.recv() => {
                match nudge {
                    None => {
                        debug!("Session handle dropped, poll loop exiting");
                        break;
                    },
                    Some(()) => {
                        if let Some(active) =
                            refresh_view(&cancel_token, &api, &owner, &view_tx, &mut missed_polls).await
                        {
                            polling = active;
                        }
                        // Restart the interval so the next tick lands a full
                        // period after this fetch.
                        ticker.reset();
                    }
                }
            }
        }
    }
}

/// One fetch-and-replace. Returns whether polling should stay armed, or
/// `None` when nothing changed: either the poll failed (current view kept,
/// retried next tick) or the session was cancelled while the fetch was in
/// flight, in which case the result is discarded unapplied.
async fn refresh_view(
    cancel_token: &CancellationToken,
    api: &ApiHandle,
    owner: &str,
    view_tx: &watch::Sender<Vec<JobRecord>>,
    missed_polls: &mut u32,
) -> Option<bool> {
    let fetched = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return None,
        fetched = api.list(owner) => fetched,
    };
    match fetched {
        Ok(jobs) => {
            *missed_polls = 0;
            let active = !all_terminal(&jobs);
            view_tx.send_replace(jobs);
            Some(active)
        }
        Err(err) => {
            *missed_polls += 1;
            if *missed_polls >= STALE_POLL_THRESHOLD {
                error!(error = %err, missed = *missed_polls, "view is going stale, still retrying");
            } else {
                warn!(error = %err, "poll failed, keeping current view");
            }
            None
        }
    }
}
