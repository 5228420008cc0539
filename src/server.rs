use std::collections::HashSet;
use std::time::Duration;

use anyhow::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::api::ApiRequest;
use crate::store::StoreHandle;
use crate::worker::{self, WorkMessage};
use crate::{submit, JobRecord};

/// Run the job service until cancelled: dispatch queued jobs to pipeline
/// workers, apply their stage reports through the store, answer client
/// requests, and sweep expired trash on an interval.
pub async fn serve(
    cancel_token: CancellationToken,
    store: StoreHandle,
    workers_count: u16,
    stage_delay: Duration,
    sweep_every: Duration,
    mut recv_from_client: mpsc::UnboundedReceiver<ApiRequest>,
) -> Result<(), Error> {
    let (send_to_server, mut recv_from_worker) = mpsc::unbounded_channel::<WorkMessage>();
    let (send_to_queue, recv_from_queue) = async_channel::bounded::<JobRecord>(workers_count as usize);

    let mut workers = vec![];
    for _ in 0..workers_count {
        let send_to_server = send_to_server.clone();
        let cancel_token = cancel_token.clone();
        let recv_from_queue = recv_from_queue.clone();
        let join_handle = tokio::spawn(
            async move {
                worker::start(cancel_token, recv_from_queue, send_to_server, stage_delay).await;
            }
            .instrument(info_span!("worker")),
        );
        workers.push(join_handle);
    }

    let mut free_workers = workers_count as i64;
    // Records handed to a worker but not yet reported terminal; they are still
    // `Queued` in the store until the first stage report lands.
    let mut in_flight: HashSet<Uuid> = HashSet::new();
    let mut sweep = tokio::time::interval(sweep_every);

    loop {
        if free_workers > 0 {
            let queued = store.queued_jobs().await;
            for job in queued {
                if free_workers == 0 {
                    break;
                }
                if !in_flight.insert(job.id) {
                    continue;
                }
                send_to_queue.send(job).await?;
                free_workers -= 1;
            }
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Server cancelled");
                break;
            },
            _ = sweep.tick() => {
                let purged = store.sweep_expired().await;
                if !purged.is_empty() {
                    info!(count = purged.len(), "retention sweep purged jobs");
                }
            },
            chan_msg = recv_from_worker.recv() => {
                match chan_msg {
                    None => {
                        debug!("Worker channel closed unexpectedly, exiting");
                        cancel_token.cancel();
                        break;
                    },
                    Some(WorkMessage { job_id, outcome }) => {
                        if outcome.is_terminal() {
                            free_workers += 1;
                            in_flight.remove(&job_id);
                        }
                        match store.advance(job_id, outcome).await {
                            Ok(record) => {
                                debug!(job_id = %job_id, state = %record.state, progress = record.progress, "job advanced");
                            }
                            Err(err) => {
                                // The record may have been purged mid-flight;
                                // the report is rejected, never applied.
                                warn!(job_id = %job_id, error = %err, "rejected stage report");
                            }
                        }
                    },
                }
            },
            chan_msg = recv_from_client.recv() => {
                match chan_msg {
                    None => {
                        debug!("Client channel closed, exiting");
                        break;
                    },
                    Some(request) => handle_request(&store, request).await,
                }
            }
        }
    }

    // Wait for all workers to complete
    futures::future::join_all(workers)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    info!("Server stopped.");

    Ok(())
}

/// Answer one client request. Replies to callers that already gave up are
/// dropped silently; their oneshot is gone and the result is discarded.
async fn handle_request(store: &StoreHandle, request: ApiRequest) {
    match request {
        ApiRequest::Submit {
            owner,
            sources,
            model_hint,
            reply,
        } => {
            let result = match submit::prepare(&sources, &model_hint) {
                Ok(jobs) => Ok(store.create_jobs(&owner, jobs).await),
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
        }
        ApiRequest::List { owner, reply } => {
            let _ = reply.send(Ok(store.list_jobs(&owner).await));
        }
        ApiRequest::Trash {
            owner,
            job_id,
            reply,
        } => {
            let _ = reply.send(store.trash(&owner, job_id).await);
        }
        ApiRequest::Restore {
            owner,
            job_id,
            reply,
        } => {
            let _ = reply.send(store.restore(&owner, job_id).await);
        }
        ApiRequest::Purge {
            owner,
            job_id,
            reply,
        } => {
            let _ = reply.send(store.purge(&owner, job_id).await);
        }
        ApiRequest::ClearTrash { owner, reply } => {
            let _ = reply.send(Ok(store.clear_trash(&owner).await));
        }
        ApiRequest::Export {
            owner,
            job_id,
            reply,
        } => {
            let _ = reply.send(store.export_report(&owner, job_id).await);
        }
    }
}
