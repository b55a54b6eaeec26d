//! Job executor behaviour against in-memory fakes.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use looks_core::job_lifecycle::JobStatus;
use looks_core::render::{PollResult, RenderBackendError, StepProgress};
use looks_pipeline::kinds::{FluxTextToImage, JobRowOnly, KindRegistry, KindStrategy};
use looks_pipeline::{JobDisposition, JobExecutor};

use common::*;

fn step(step: u32, total_steps: u32) -> StepProgress {
    StepProgress { step, total_steps }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn completed_job_publishes_and_records_result() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![step(10, 20), step(20, 20)], vec![pending(), ready("tryon_00001_.png")]);

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let result_url = match &report.disposition {
        JobDisposition::Completed { result_url } => result_url.clone(),
        other => panic!("expected completed, got {other:?}"),
    };
    assert!(report.finalized);
    assert!(report.bookkeeping.is_empty());

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Completed);
    assert_eq!(row.progress, 100);
    assert_eq!(row.result_url.as_deref(), Some(result_url.as_str()));
    assert_eq!(row.cost_usd, Some(0.005));
    let meta = row.result_metadata.unwrap();
    assert_eq!(meta["worker_id"], WORKER_ID);
    assert_eq!(meta["backend"], "vast");

    let state = store.state.lock().unwrap();
    assert_eq!(state.tryon_rows.len(), 1);
    assert_eq!(state.tryon_rows[0].result_url, result_url);
    assert_eq!(state.tryon_rows[0].products_used[0]["name"], "Linen Shirt");
    assert_eq!(state.jobs_processed, 1);
    assert_eq!(state.jobs_failed, 0);
    drop(state);

    let uploads = assets.state.lock().unwrap().uploads.clone();
    assert_eq!(uploads.len(), 1);
    let (key, content_type) = &uploads[0];
    assert!(key.starts_with(&format!("{}/tryons/tryon_{}_{}_", job.user_id, job.user_id, job.id)));
    assert!(key.ends_with(".jpg"));
    assert_eq!(content_type, "image/jpeg");

    let staged = backend.state.lock().unwrap().staged.clone();
    assert_eq!(
        staged,
        vec![
            format!("job_{}_avatar.jpg", job.id),
            format!("job_{}_garment_0.jpg", job.id),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn job_row_only_kind_skips_result_table() {
    let job = pending_job("portrait", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);

    let mut kinds = KindRegistry::with_defaults();
    kinds.register(
        "portrait",
        KindStrategy {
            builder: Arc::new(FluxTextToImage::default()),
            sink: Arc::new(JobRowOnly),
            requires_avatar: false,
        },
    );
    let executor = JobExecutor::new(
        store.clone(),
        store.clone(),
        backend.clone(),
        assets.clone(),
        kinds,
        executor_config(),
    );

    let report = executor.execute(&job).await.unwrap();

    assert_matches!(report.disposition, JobDisposition::Completed { .. });
    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Completed);
    assert!(row.result_url.is_some());
    assert!(store.state.lock().unwrap().tryon_rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn step_progress_maps_into_render_band() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![step(10, 20), step(20, 20)], vec![pending(), ready("out.png")]);

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_eq!(store.progress_for(job.id), vec![20, 52, 85, 90]);
}

#[tokio::test(start_paused = true)]
async fn progress_never_decreases_and_stays_below_100() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    // A second sampler restarts its step count.
    backend.script(
        vec![step(18, 20), step(2, 20), step(30, 20)],
        vec![pending(), pending(), ready("out.png")],
    );

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let progress = store.progress_for(job.id);
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert!(progress.iter().all(|p| *p <= 99), "{progress:?}");
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_do_not_fail_the_job() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(
        vec![],
        vec![
            Err(RenderBackendError::Unreachable("connection reset".into())),
            Err(RenderBackendError::Rejected { status: 502, body: "bad gateway".into() }),
            ready("out.png"),
        ],
    );

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(report.disposition, JobDisposition::Completed { .. });
    assert_eq!(backend.state.lock().unwrap().polls, 3);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn render_timeout_fails_job_without_publishing() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    let started = tokio::time::Instant::now();
    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(
        &report.disposition,
        JobDisposition::Failed { error_message } if error_message.contains("timed out after 300 seconds")
    );
    assert!(started.elapsed() >= std::time::Duration::from_secs(300));

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert!(row.result_url.is_none());
    assert!(assets.state.lock().unwrap().uploads.is_empty());
    let state = store.state.lock().unwrap();
    assert!(state.tryon_rows.is_empty());
    assert_eq!(state.jobs_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_task_is_released_on_the_backend() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_eq!(backend.state.lock().unwrap().released, vec!["prompt-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn finished_task_is_not_released_again() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert!(backend.state.lock().unwrap().released.is_empty());
}

#[tokio::test(start_paused = true)]
async fn upload_failure_fails_job_as_publish_error() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    assets.state.lock().unwrap().fail_upload = true;
    backend.script(vec![], vec![ready("out.png")]);

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(
        &report.disposition,
        JobDisposition::Failed { error_message } if error_message.contains("Failed to publish result")
    );
    assert!(report.finalized);
    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert!(row.result_url.is_none());
    let state = store.state.lock().unwrap();
    assert!(state.tryon_rows.is_empty());
    assert_eq!(state.jobs_failed, 1);
    assert_eq!(state.jobs_processed, 0);
}

#[tokio::test(start_paused = true)]
async fn unreadable_artifact_fails_job_before_upload() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    backend.state.lock().unwrap().fail_artifact = true;
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(
        &report.disposition,
        JobDisposition::Failed { error_message } if error_message.contains("Failed to publish result")
    );
    assert!(assets.state.lock().unwrap().uploads.is_empty());
    assert!(store.state.lock().unwrap().tryon_rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn backend_error_fails_job_with_reason() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(
        vec![],
        vec![Ok(PollResult::Failed("ComfyUI error in node 4: Model not found".into()))],
    );

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert_eq!(
        row.error_message.as_deref(),
        Some("Render failed: ComfyUI error in node 4: Model not found")
    );
}

#[tokio::test]
async fn rejected_submission_fails_job() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.state.lock().unwrap().submit_error = Some(RenderBackendError::Protocol(
        "Submission response has no prompt_id".into(),
    ));

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert!(row.error_message.unwrap().starts_with("Failed to dispatch workflow"));
    assert_eq!(backend.state.lock().unwrap().polls, 0);
}

#[tokio::test]
async fn unsupported_kind_fails_before_any_download() {
    let job = pending_job("enhance", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert_eq!(row.error_message.as_deref(), Some("Unsupported job kind: enhance"));
    assert!(assets.state.lock().unwrap().downloads.is_empty());
    assert_eq!(backend.submitted(), 0);
}

#[tokio::test]
async fn asset_download_failure_fails_before_dispatch() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    assets.state.lock().unwrap().fail_download = true;

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    let row = store.job(job.id);
    assert_eq!(row.status().unwrap(), JobStatus::Failed);
    assert!(row.error_message.unwrap().starts_with("Failed to fetch input asset"));
    assert_eq!(backend.submitted(), 0);
}

#[tokio::test]
async fn tryon_without_avatar_is_invalid_input() {
    let mut job = pending_job("tryon", 0, 0);
    job.input_data = serde_json::json!({ "garment_images": [] });
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_eq!(
        store.job(job.id).error_message.as_deref(),
        Some("Invalid input data: avatar_url is required")
    );
}

// ---------------------------------------------------------------------------
// Claim and terminal-write discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lost_claim_skips_job_untouched() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    store.update(|s| s.jobs.get_mut(&job.id).unwrap().status = "processing".into());
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_eq!(report.disposition, JobDisposition::Skipped);
    assert!(!report.finalized);
    assert_eq!(backend.submitted(), 0);
    assert_eq!(store.state.lock().unwrap().finalize_calls, 0);
}

#[tokio::test]
async fn terminal_row_is_never_claimed() {
    let mut job = pending_job("tryon", 0, 0);
    job.status = "failed".into();
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_eq!(report.disposition, JobDisposition::Skipped);
    assert!(store.state.lock().unwrap().claims.is_empty());
    assert_eq!(backend.submitted(), 0);
}

#[tokio::test(start_paused = true)]
async fn executing_the_same_job_twice_has_no_second_effect() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);
    let executor = executor(&store, &backend, &assets);

    executor.execute(&job).await.unwrap();
    let first = store.job(job.id);
    let report = executor.execute(&job).await.unwrap();

    assert_eq!(report.disposition, JobDisposition::Skipped);
    let second = store.job(job.id);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(store.state.lock().unwrap().jobs_processed, 1);
    assert_eq!(assets.state.lock().unwrap().uploads.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn finalize_is_retried_after_transient_failure() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    store.update(|s| s.fail_finalize = 2);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert!(report.finalized);
    assert_eq!(store.state.lock().unwrap().finalize_calls, 3);
    assert_eq!(store.job(job.id).status().unwrap(), JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn exhausted_finalize_retries_leave_job_processing() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    store.update(|s| s.fail_finalize = 4);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![], vec![ready("out.png")]);

    let started = tokio::time::Instant::now();
    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert!(!report.finalized);
    assert_matches!(report.disposition, JobDisposition::Completed { .. });
    // One attempt plus retries after 1, 2 and 4 seconds.
    assert!(started.elapsed() >= std::time::Duration::from_secs(7));
    assert_eq!(store.job(job.id).status().unwrap(), JobStatus::Processing);
    let state = store.state.lock().unwrap();
    assert_eq!(state.finalize_calls, 4);
    assert_eq!(state.jobs_processed, 0);
    assert_eq!(state.jobs_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn bookkeeping_failures_never_change_job_status() {
    let job = pending_job("tryon", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    store.update(|s| {
        s.fail_counters = true;
        s.fail_progress = true;
    });
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();
    backend.script(vec![step(5, 10)], vec![ready("out.png")]);

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(report.disposition, JobDisposition::Completed { .. });
    assert!(report.finalized);
    let operations: Vec<&str> = report.bookkeeping.iter().map(|b| b.operation).collect();
    assert!(operations.contains(&"update_progress"));
    assert!(operations.contains(&"record_job_completed"));
    assert_eq!(store.job(job.id).status().unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn failed_counter_error_does_not_mask_job_failure() {
    let job = pending_job("enhance", 0, 0);
    let store = FakeStore::with_jobs(vec![job.clone()]);
    store.update(|s| s.fail_counters = true);
    let backend = FakeBackend::new();
    let assets = FakeAssets::new();

    let report = executor(&store, &backend, &assets).execute(&job).await.unwrap();

    assert_matches!(report.disposition, JobDisposition::Failed { .. });
    assert_eq!(report.bookkeeping.len(), 1);
    assert_eq!(report.bookkeeping[0].operation, "record_job_failed");
    assert_eq!(store.job(job.id).status().unwrap(), JobStatus::Failed);
}
