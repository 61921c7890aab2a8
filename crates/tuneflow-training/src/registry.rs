use tracing::{debug, info};
use tuneflow_abstraction::{JobCatalog, JobHandle, JobListing, JobStatus};

use crate::retry::{retry_with_backoff, RetryFailure, RetryPolicy};

/// An existing job that can stand in for submitting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReusableJob {
    /// A job that already succeeded; its result can be used directly.
    Completed(JobHandle),
    /// A job still pending or running; wait on it instead of resubmitting.
    InProgress(JobHandle),
}

impl ReusableJob {
    #[must_use]
    pub fn handle(&self) -> &JobHandle {
        match self {
            Self::Completed(handle) | Self::InProgress(handle) => handle,
        }
    }
}

/// Picks a job to reuse among `listings` whose handle starts with `name_prefix`.
///
/// The newest succeeded job wins; otherwise the newest pending or running one.
/// Failed jobs are never reused.
#[must_use]
pub fn select_reusable_job(listings: &[JobListing], name_prefix: &str) -> Option<ReusableJob> {
    let mut matching: Vec<&JobListing> = listings
        .iter()
        .filter(|listing| listing.handle.as_str().starts_with(name_prefix))
        .collect();
    matching.sort_by(|a, b| b.snapshot.created_at.cmp(&a.snapshot.created_at));

    if let Some(done) = matching.iter().find(|l| l.snapshot.status == JobStatus::Succeeded) {
        debug!(handle = %done.handle, "Found existing tuned job to reuse");
        return Some(ReusableJob::Completed(done.handle.clone()));
    }

    matching
        .iter()
        .find(|l| !l.snapshot.is_terminal())
        .map(|queued| {
            debug!(handle = %queued.handle, status = %queued.snapshot.status, "Found queued job");
            ReusableJob::InProgress(queued.handle.clone())
        })
}

/// Lists the catalogue (with retries) and selects a reusable job.
///
/// # Errors
/// Returns the `RetryFailure` of the listing call.
pub async fn locate_reusable_job(
    catalog: &dyn JobCatalog,
    name_prefix: &str,
    retry: &RetryPolicy,
) -> Result<Option<ReusableJob>, RetryFailure> {
    let listings = retry_with_backoff(retry, |_, _, _| {}, |_| catalog.list_jobs()).await?;
    let found = select_reusable_job(&listings, name_prefix);
    info!(
        prefix = name_prefix,
        listed = listings.len(),
        found = ?found,
        "Searched job catalogue for reusable jobs"
    );
    Ok(found)
}
