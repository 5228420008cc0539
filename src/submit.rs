use tracing::warn;

use crate::{Error, NewJob};

/// Anything we can hand to the fetch stage.
fn is_fetchable(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Label shown for a job, derived from the tail of its source URL.
pub fn display_name(url: &str) -> String {
    let tail: String = url
        .rsplit('/')
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if tail.is_empty() {
        "Video_Clip.mp4".to_string()
    } else {
        let start = tail.len().saturating_sub(6);
        format!("Video_{}.mp4", &tail[start..])
    }
}

/// Validate a submission batch and fan it out into jobs to enqueue.
///
/// Unfetchable references are dropped, not corrected; an empty batch or an
/// all-invalid one fails outright.
pub fn prepare(sources: &[String], model_hint: &str) -> Result<Vec<NewJob>, Error> {
    if sources.is_empty() {
        return Err(Error::Validation("no sources given".into()));
    }

    let mut jobs = Vec::with_capacity(sources.len());
    for raw in sources {
        let url = raw.trim();
        if !is_fetchable(url) {
            warn!(source = %raw, "dropping unfetchable source");
            continue;
        }
        jobs.push(NewJob {
            source_url: url.to_string(),
            display_name: display_name(url),
            model_hint: model_hint.to_string(),
        });
    }

    if jobs.is_empty() {
        return Err(Error::Validation("no valid sources in submission".into()));
    }
    Ok(jobs)
}
