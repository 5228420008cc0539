use std::time::Duration;

use async_channel::Receiver;
use tokio::{sync::mpsc::UnboundedSender, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::lifecycle::StageOutcome;
use crate::{
    AiAnalysis, AnalysisReport, EngagementStats, JobRecord, JobState, Segment, VideoMetadata,
};

/// A pipeline stage report sent back to the service loop.
#[derive(Debug)]
pub struct WorkMessage {
    pub job_id: Uuid,
    pub outcome: StageOutcome,
}

/// Pipeline worker loop: pull a queued job, walk it through the stages, report
/// each transition. Retry policy lives here with the pipeline, not in the
/// lifecycle rules; this stand-in does not retry.
pub async fn start(
    cancel_token: CancellationToken,
    recv_from_queue: Receiver<JobRecord>,
    send_to_server: UnboundedSender<WorkMessage>,
    stage_delay: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Worker cancelled");
                break;
            },
            job = recv_from_queue.recv() => {
                match job {
                    Err(err) => {
                        debug!(message = "Job queue closed, exiting", error = ?err);
                        break;
                    },
                    Ok(job) => process(job, &send_to_server, stage_delay).await,
                }
            }
        }
    }
    info!("Worker stopped.");
}

#[instrument(skip_all, fields(job_id = %job.id))]
async fn process(job: JobRecord, send_to_server: &UnboundedSender<WorkMessage>, stage_delay: Duration) {
    for stage in [JobState::Fetching, JobState::Retrieving, JobState::Analyzing] {
        sleep(stage_delay).await;
        // In case when we can't send the report, there is no one left to be
        // notified about that, so just panic
        send_to_server
            .send(WorkMessage {
                job_id: job.id,
                outcome: StageOutcome::Advanced(stage),
            })
            .unwrap();
    }

    sleep(stage_delay).await;
    // Simulating failure for sources that ask for it
    let outcome = if job.source_url.contains("fail") {
        StageOutcome::Failed("source refused the media request".to_string())
    } else {
        StageOutcome::Completed(Box::new(sample_report(&job)))
    };
    send_to_server
        .send(WorkMessage {
            job_id: job.id,
            outcome,
        })
        .unwrap();
}

/// Canned analysis output standing in for the real scrape/download/model run.
fn sample_report(job: &JobRecord) -> AnalysisReport {
    AnalysisReport {
        media_path: format!("media/{}.mp4", job.id),
        metadata: VideoMetadata {
            url: job.source_url.clone(),
            author: "featured creator".to_string(),
            publish_time: "2024-03-22".to_string(),
            description: "Narrative breakdown of a high-performing short video.".to_string(),
            category: "commerce / growth".to_string(),
            stats: EngagementStats {
                plays: 1_250_000,
                likes: 68_000,
                comments: 2_400,
                shares: 1_500,
                favorites: 8_900,
            },
        },
        analysis: AiAnalysis {
            score: 92,
            short_summary: "Tight emotional arc with a strong hook".to_string(),
            detail_summary: format!(
                "The clip builds a complete emotional loop out of minimal visual \
                 alignment and fast audio cuts (scored with {}).",
                job.model_hint
            ),
            suggestions: "Add an on-screen callout near the 12 second mark to anchor recall."
                .to_string(),
        },
        segments: vec![Segment {
            start_secs: 0,
            end_secs: 4,
            transcript: "Sticking ideas".to_string(),
            translation: "Ideas that stick".to_string(),
            visual: "Animated text reveal".to_string(),
            preview_path: format!("media/{}-seg0.gif", job.id),
        }],
    }
}
