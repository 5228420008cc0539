use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::lifecycle::{self, StageOutcome};
use crate::retention;
use crate::{Error, JobRecord, JobState, NewJob, ReportBundle};

/// Release hook for media and report artifacts held outside the job table.
/// Every purge path (explicit, sweep, clear-trash) calls it once per removed
/// record, after the record has left the table.
pub trait ArtifactStore: Send + Sync {
    fn release(&self, job: &JobRecord);
}

/// Stand-in for the real media storage collaborator.
pub struct DiscardArtifacts;

impl ArtifactStore for DiscardArtifacts {
    fn release(&self, job: &JobRecord) {
        debug!(job_id = %job.id, "releasing artifacts");
    }
}

/// Cloneable handle to the authoritative job table.
///
/// All mutation goes through here: lifecycle transitions via [`Self::advance`],
/// deletion stamps via the retention methods. Each method takes the write lock
/// once, so a transition is applied atomically with its progress update and no
/// reader ever observes a half-purged record.
#[derive(Clone)]
pub struct StoreHandle {
    table: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    artifacts: Arc<dyn ArtifactStore>,
    window: Duration,
}

impl StoreHandle {
    pub fn new(window: Duration, artifacts: Arc<dyn ArtifactStore>) -> Self {
        StoreHandle {
            table: Arc::new(RwLock::new(HashMap::new())),
            artifacts,
            window,
        }
    }

    /// Retention window this store purges against.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Insert a validated batch as queued records and return their fresh ids.
    pub async fn create_jobs(&self, owner: &str, jobs: Vec<NewJob>) -> Vec<Uuid> {
        let now = Utc::now();
        let mut table = self.table.write().await;
        jobs.into_iter()
            .map(|new| {
                let id = Uuid::new_v4();
                debug!(job_id = %id, source = %new.source_url, "created job");
                table.insert(
                    id,
                    JobRecord {
                        id,
                        owner: owner.to_string(),
                        source_url: new.source_url,
                        display_name: new.display_name,
                        model_hint: new.model_hint,
                        state: JobState::Queued,
                        progress: 0,
                        report: None,
                        failure_reason: None,
                        created_at: now,
                        deleted_at: None,
                    },
                );
                id
            })
            .collect()
    }

    /// Full owner-scoped snapshot, newest first. Trashed records are included;
    /// purged ones are gone for good.
    pub async fn list_jobs(&self, owner: &str) -> Vec<JobRecord> {
        let table = self.table.read().await;
        let mut jobs: Vec<JobRecord> = table
            .values()
            .filter(|job| job.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Queued records across all owners, oldest first, for dispatch.
    pub async fn queued_jobs(&self) -> Vec<JobRecord> {
        let table = self.table.read().await;
        let mut jobs: Vec<JobRecord> = table
            .values()
            .filter(|job| job.state == JobState::Queued)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Apply a worker-reported transition under the lifecycle rules.
    pub async fn advance(&self, job_id: Uuid, outcome: StageOutcome) -> Result<JobRecord, Error> {
        let mut table = self.table.write().await;
        let record = table.get_mut(&job_id).ok_or(Error::NotFound(job_id))?;
        lifecycle::apply(record, outcome)?;
        Ok(record.clone())
    }

    pub async fn trash(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let mut table = self.table.write().await;
        let record = owned_mut(&mut table, owner, job_id)?;
        retention::trash(record, Utc::now())
    }

    pub async fn restore(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let mut table = self.table.write().await;
        let record = owned_mut(&mut table, owner, job_id)?;
        retention::restore(record)
    }

    /// Immediate purge, bypassing the retention window.
    pub async fn purge(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let record = {
            let mut table = self.table.write().await;
            owned_mut(&mut table, owner, job_id)?;
            table.remove(&job_id).ok_or(Error::NotFound(job_id))?
        };
        self.artifacts.release(&record);
        info!(job_id = %job_id, "purged job");
        Ok(())
    }

    /// Purge every trashed record of one owner. Returns how many went.
    pub async fn clear_trash(&self, owner: &str) -> usize {
        let removed = {
            let mut table = self.table.write().await;
            let ids: Vec<Uuid> = table
                .values()
                .filter(|job| job.owner == owner && job.is_trashed())
                .map(|job| job.id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.remove(&id))
                .collect::<Vec<JobRecord>>()
        };
        for record in &removed {
            self.artifacts.release(record);
            info!(job_id = %record.id, "purged trashed job");
        }
        removed.len()
    }

    /// Remove every record whose retention window has elapsed. Returns the
    /// purged records so the caller can log or account for them.
    pub async fn sweep_expired(&self) -> Vec<JobRecord> {
        let now = Utc::now();
        let purged = {
            let mut table = self.table.write().await;
            let expired: Vec<Uuid> = table
                .values()
                .filter(|job| retention::is_expired(job, self.window, now))
                .map(|job| job.id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| table.remove(&id))
                .collect::<Vec<JobRecord>>()
        };
        for record in &purged {
            self.artifacts.release(record);
            info!(job_id = %record.id, "purged expired job");
        }
        purged
    }

    /// Package a completed job's report for download.
    pub async fn export_report(&self, owner: &str, job_id: Uuid) -> Result<ReportBundle, Error> {
        let table = self.table.read().await;
        let record = table
            .get(&job_id)
            .filter(|job| job.owner == owner)
            .ok_or(Error::NotFound(job_id))?;
        let report = record.report.clone().ok_or_else(|| {
            Error::Conflict(format!("job {job_id} has no report to export"))
        })?;
        Ok(ReportBundle {
            job_id,
            display_name: record.display_name.clone(),
            source_url: record.source_url.clone(),
            exported_at: Utc::now(),
            report,
        })
    }
}

/// Owner-scoped lookup. A record belonging to someone else is reported as
/// missing, not as forbidden.
fn owned_mut<'t>(
    table: &'t mut HashMap<Uuid, JobRecord>,
    owner: &str,
    job_id: Uuid,
) -> Result<&'t mut JobRecord, Error> {
    match table.get_mut(&job_id) {
        Some(record) if record.owner == owner => Ok(record),
        _ => Err(Error::NotFound(job_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit;
    use crate::{AiAnalysis, AnalysisReport, EngagementStats, VideoMetadata};

    fn store(window: Duration) -> StoreHandle {
        StoreHandle::new(window, Arc::new(DiscardArtifacts))
    }

    fn new_jobs(urls: &[&str]) -> Vec<NewJob> {
        submit::prepare(
            &urls.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
            "standard",
        )
        .unwrap()
    }

    fn report(url: &str) -> Box<AnalysisReport> {
        Box::new(AnalysisReport {
            media_path: "media/clip.mp4".into(),
            metadata: VideoMetadata {
                url: url.into(),
                author: "creator".into(),
                publish_time: "2024-03-22".into(),
                description: "clip".into(),
                category: "commerce".into(),
                stats: EngagementStats::default(),
            },
            analysis: AiAnalysis {
                score: 88,
                short_summary: "works".into(),
                detail_summary: "works well".into(),
                suggestions: "none".into(),
            },
            segments: vec![],
        })
    }

    async fn completed_job(store: &StoreHandle, owner: &str, url: &str) -> Uuid {
        let id = store.create_jobs(owner, new_jobs(&[url])).await[0];
        for stage in [JobState::Fetching, JobState::Retrieving, JobState::Analyzing] {
            store.advance(id, StageOutcome::Advanced(stage)).await.unwrap();
        }
        store
            .advance(id, StageOutcome::Completed(report(url)))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn created_jobs_start_queued_with_fresh_ids() {
        let store = store(retention::default_window());
        let ids = store
            .create_jobs("ana", new_jobs(&["https://example.com/a", "https://example.com/b"]))
            .await;
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);

        let jobs = store.list_jobs("ana").await;
        assert!(jobs.iter().all(|j| j.state == JobState::Queued && j.progress == 0));
    }

    #[tokio::test]
    async fn listing_is_owner_scoped() {
        let store = store(retention::default_window());
        store.create_jobs("ana", new_jobs(&["https://example.com/a"])).await;
        let bob_id = store.create_jobs("bob", new_jobs(&["https://example.com/b"])).await[0];

        let jobs = store.list_jobs("ana").await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs.iter().all(|j| j.owner == "ana"));

        // Another owner's record is invisible to mutation too.
        let err = store.trash("ana", bob_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn trash_restore_round_trip_preserves_the_record() {
        let store = store(retention::default_window());
        let id = completed_job(&store, "ana", "https://example.com/a").await;
        let before = store.list_jobs("ana").await.remove(0);

        store.trash("ana", id).await.unwrap();
        assert!(store.list_jobs("ana").await[0].is_trashed());

        let err = store.trash("ana", id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        store.restore("ana", id).await.unwrap();
        let after = store.list_jobs("ana").await.remove(0);
        assert!(after.deleted_at.is_none());
        assert_eq!(after.state, before.state);
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.created_at, before.created_at);

        let err = store.restore("ana", id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn purge_removes_for_good() {
        let store = store(retention::default_window());
        let id = completed_job(&store, "ana", "https://example.com/a").await;

        store.purge("ana", id).await.unwrap();
        assert!(store.list_jobs("ana").await.is_empty());

        let err = store.restore("ana", id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store.purge("ana", id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn sweep_purges_only_expired_trash() {
        // Zero window: anything trashed is immediately expired.
        let store = store(Duration::zero());
        let expired = completed_job(&store, "ana", "https://example.com/a").await;
        let active = completed_job(&store, "ana", "https://example.com/b").await;
        store.trash("ana", expired).await.unwrap();

        let purged = store.sweep_expired().await;
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, expired);

        let left = store.list_jobs("ana").await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, active);

        let err = store.restore("ana", expired).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn sweep_spares_trash_inside_the_window() {
        let store = store(retention::default_window());
        let id = completed_job(&store, "ana", "https://example.com/a").await;
        store.trash("ana", id).await.unwrap();

        assert!(store.sweep_expired().await.is_empty());
        assert_eq!(store.list_jobs("ana").await.len(), 1);
    }

    #[tokio::test]
    async fn clear_trash_purges_all_trashed_records_of_one_owner() {
        let store = store(retention::default_window());
        let kept = completed_job(&store, "ana", "https://example.com/a").await;
        let gone = completed_job(&store, "ana", "https://example.com/b").await;
        let other = completed_job(&store, "bob", "https://example.com/c").await;
        store.trash("ana", gone).await.unwrap();
        store.trash("bob", other).await.unwrap();

        assert_eq!(store.clear_trash("ana").await, 1);

        let ana = store.list_jobs("ana").await;
        assert_eq!(ana.len(), 1);
        assert_eq!(ana[0].id, kept);
        // Bob's trash is untouched.
        assert_eq!(store.list_jobs("bob").await.len(), 1);
    }

    #[tokio::test]
    async fn export_requires_a_completed_record() {
        let store = store(retention::default_window());
        let done = completed_job(&store, "ana", "https://example.com/a").await;
        let queued = store
            .create_jobs("ana", new_jobs(&["https://example.com/b"]))
            .await[0];

        let bundle = store.export_report("ana", done).await.unwrap();
        assert_eq!(bundle.job_id, done);
        assert_eq!(bundle.report.analysis.score, 88);

        let err = store.export_report("ana", queued).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = store.export_report("bob", done).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn advancing_a_purged_job_reports_not_found() {
        let store = store(retention::default_window());
        let id = store
            .create_jobs("ana", new_jobs(&["https://example.com/a"]))
            .await[0];
        store.purge("ana", id).await.unwrap();

        let err = store
            .advance(id, StageOutcome::Advanced(JobState::Fetching))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
