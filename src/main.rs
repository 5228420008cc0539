use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use clap::Parser;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use vidq::api::ApiHandle;
use vidq::client::{self, Session};
use vidq::store::{DiscardArtifacts, StoreHandle};
use vidq::{retention, server, telemetry, JobState};

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version)]
pub struct ConfigContext {
    #[arg(
        short = 'o',
        long = "owner",
        help = "Principal submitting and viewing jobs",
        default_value = "operator"
    )]
    owner: String,

    #[arg(
        short = 'n',
        long = "number_active",
        help = "Number of pipeline workers running in parallel",
        default_value = "3"
    )]
    num: u16,

    #[arg(
        long = "poll_secs",
        help = "Seconds between job list polls",
        default_value = "3"
    )]
    poll_secs: u64,

    #[arg(
        long = "retention_days",
        help = "Days a trashed job stays restorable",
        default_value = "3"
    )]
    retention_days: i64,

    #[arg(
        short = 'm',
        long = "model",
        help = "Model preset handed to the analysis pipeline",
        default_value = "standard"
    )]
    model_hint: String,

    #[arg(help = "Video URLs to analyze (a demo batch is used when empty)")]
    urls: Vec<String>,
}

#[instrument(skip(cancel_token))]
async fn setup(cancel_token: CancellationToken) -> Result<(), Error> {
    let config = ConfigContext::parse();

    let urls = if config.urls.is_empty() {
        vec![
            "https://example.com/@clipmaker/video/7312945581".to_string(),
            "https://example.com/@clipmaker/video/7312945582".to_string(),
            "https://example.com/@clipmaker/video/fail-7312945583".to_string(),
        ]
    } else {
        config.urls.clone()
    };

    // Channel carrying client requests into the service loop
    let (send_to_server, recv_from_client) = mpsc::unbounded_channel();

    let store = StoreHandle::new(
        chrono::Duration::days(config.retention_days),
        Arc::new(DiscardArtifacts),
    );

    let server_spawn = {
        let cancel_token = cancel_token.clone();
        let store = store.clone();
        tokio::spawn(
            async move {
                if let Err(err) = server::serve(
                    cancel_token,
                    store,
                    config.num,
                    Duration::from_millis(800),
                    Duration::from_secs(60),
                    recv_from_client,
                )
                .await
                {
                    error!("Error starting server: {}", err);
                }
            }
            .instrument(info_span!("server")),
        )
    };

    let api = ApiHandle::new(send_to_server);
    let (session, poll_task) = Session::open(
        api,
        config.owner.clone(),
        Duration::from_secs(config.poll_secs),
        cancel_token.clone(),
    );

    let ids = session.submit(urls, &config.model_hint).await?;
    info!(count = ids.len(), "submitted analysis jobs");

    // Follow the view until every job settles or we are told to stop.
    let mut view = session.view();
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Cancelled while waiting for jobs to settle");
                break;
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let jobs = view.borrow_and_update().clone();
                for job in &jobs {
                    info!(job = %job.display_name, state = %job.state, progress = job.progress);
                }
                if !jobs.is_empty() && client::all_terminal(&jobs) {
                    break;
                }
            }
        }
    }

    if !cancel_token.is_cancelled() {
        let jobs = session.view().borrow().clone();
        for job in &jobs {
            match job.state {
                JobState::Completed => {
                    let bundle = session.export(job.id).await?;
                    info!(
                        job = %job.display_name,
                        score = bundle.report.analysis.score,
                        "report ready"
                    );
                    println!("{}", serde_json::to_string_pretty(&bundle)?);
                }
                JobState::Failed => {
                    info!(
                        job = %job.display_name,
                        reason = job.failure_reason.as_deref().unwrap_or("unknown"),
                        "analysis failed"
                    );
                }
                _ => {}
            }
        }

        // Showcase the trash: soft-delete the first job and show what the
        // operator would see in the recycle view.
        if let Some(first) = jobs.first() {
            let mut view = session.view();
            view.borrow_and_update();
            session.trash(first.id).await?;
            let record = loop {
                view.changed().await?;
                let trashed = view
                    .borrow_and_update()
                    .iter()
                    .find(|job| job.id == first.id && job.is_trashed())
                    .cloned();
                if let Some(record) = trashed {
                    break record;
                }
            };
            if let Some(left) = retention::time_left(&record, store.window(), chrono::Utc::now()) {
                info!(job = %record.display_name, time_left = %left, "moved to trash");
            }
            session.restore(first.id).await?;
            info!(job = %first.display_name, "restored from trash");
        }
    }

    cancel_token.cancel();
    poll_task.await?;

    println!("Waiting for server to shutdown...");
    server_spawn.await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "vidq=DEBUG");
    }

    telemetry::init()?;

    let token = CancellationToken::new();

    let cloned_token = token.clone();
    let app = tokio::spawn(setup(cloned_token));

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();
        tokio::select! {
            _ = sigterm.recv() => {println!("Received SIGTERM"); token.cancel()},
            _ = sigint.recv() => {println!("Received SIGINT"); token.cancel()},
        }
    });
    app.await??;
    println!("Shutting down.");
    telemetry::shutdown();

    Ok(())
}
