mod test_utils;

use anyhow::Result;
use chrono::{Duration, Utc};
use orchestrator::dependency::{BlockingReason, DependencyResolver};
use orchestrator::error::ExecutionError;
use orchestrator::lifecycle::{DispatchOutcome, SubmitJob};
use orchestrator::models::JobStatus;
use orchestrator::repositories::JobStore;
use serde_json::json;
use test_utils::Harness;

#[tokio::test]
async fn dependent_waits_for_prerequisite() -> Result<()> {
    let h = Harness::new().await?;
    let parent = h.submit_scrape(1).await?;
    let child = h
        .manager
        .submit(SubmitJob::new("backfill", json!({"account_id": 1, "days": 7})).depends_on(parent))
        .await?;

    let outcome = h.manager.dispatch(child.id).await?;
    let DispatchOutcome::Blocked { reasons } = outcome else {
        panic!("expected blocked, got {:?}", outcome);
    };
    assert_eq!(
        reasons,
        vec![BlockingReason::Unfinished {
            prerequisite: parent,
            status: JobStatus::Pending,
        }]
    );
    assert_eq!(h.status(child.id).await?, JobStatus::Pending);
    assert!(h.broker.submissions_for(child.id).is_empty());
    Ok(())
}

#[tokio::test]
async fn completing_prerequisite_releases_dependent() -> Result<()> {
    let h = Harness::new().await?;
    let parent = h.submit_scrape(1).await?;
    let child = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 2})).depends_on(parent))
        .await?;

    h.manager.dispatch(parent).await?;
    assert!(h.broker.submissions_for(child.id).is_empty());

    h.manager.complete(parent, json!({"posts": 3})).await?;
    assert_eq!(h.status(child.id).await?, JobStatus::Running);
    assert_eq!(h.broker.submissions_for(child.id).len(), 1);

    // A duplicate completion must not dispatch the dependent twice.
    h.manager.complete(parent, json!({"posts": 3})).await?;
    let summary = h.manager.release_dependents(parent).await?;
    assert_eq!(summary.dispatched, 0);
    assert_eq!(h.broker.submissions_for(child.id).len(), 1);
    Ok(())
}

#[tokio::test]
async fn chain_runs_in_order() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.submit_scrape(1).await?;
    let b = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 2})).depends_on(a))
        .await?
        .id;
    let c = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 3})).depends_on(b))
        .await?
        .id;

    let summary = h.manager.dispatch_ready(10).await?;
    assert_eq!(summary.dispatched, 1);
    assert_eq!(h.status(a).await?, JobStatus::Running);
    assert_eq!(h.status(b).await?, JobStatus::Pending);
    assert_eq!(h.status(c).await?, JobStatus::Pending);

    h.manager.complete(a, json!({})).await?;
    assert_eq!(h.status(b).await?, JobStatus::Running);
    assert_eq!(h.status(c).await?, JobStatus::Pending);

    h.manager.complete(b, json!({})).await?;
    assert_eq!(h.status(c).await?, JobStatus::Running);

    let order: Vec<_> = h
        .broker
        .submissions()
        .iter()
        .filter_map(|submission| submission.job_id())
        .collect();
    assert_eq!(order, vec![a, b, c]);
    Ok(())
}

#[tokio::test]
async fn failed_prerequisite_blocks_permanently_without_failing_dependent() -> Result<()> {
    let h = Harness::new().await?;
    let parent = h.submit_scrape(1).await?;
    let child = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 2})).depends_on(parent))
        .await?;

    h.manager.dispatch(parent).await?;
    h.manager
        .fail(parent, ExecutionError::permanent("account suspended"))
        .await?;

    let resolver = DependencyResolver::new(h.jobs.clone());
    let child_model = h.jobs.find(child.id).await?.unwrap();
    let check = resolver.is_satisfied(&child_model).await?;
    assert!(!check.satisfied);
    assert!(check.is_permanently_blocked());
    assert!(check.describe().contains("will never complete"));

    // The resolver reports; the dependent's fate is left to the caller.
    assert_eq!(h.status(child.id).await?, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn release_scan_recovers_missed_callbacks() -> Result<()> {
    let h = Harness::new().await?;
    let parent = h.submit_scrape(1).await?;
    let child = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 2})).depends_on(parent))
        .await?;
    h.manager.dispatch(parent).await?;

    // Complete the prerequisite behind the manager's back so no release runs.
    let changes = orchestrator::models::job::ActiveModel {
        status: sea_orm::Set(JobStatus::Completed),
        ..Default::default()
    };
    h.jobs
        .transition(
            parent,
            &orchestrator::repositories::TransitionGuard::status_in(&[JobStatus::Running]),
            changes,
        )
        .await?;
    assert_eq!(h.status(child.id).await?, JobStatus::Pending);

    let summary = h.manager.release_blocked().await?;
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(h.status(child.id).await?, JobStatus::Running);

    let again = h.manager.release_blocked().await?;
    assert_eq!(again.examined, 0);
    Ok(())
}

#[tokio::test]
async fn blocked_scheduled_jobs_do_not_starve_the_batch() -> Result<()> {
    let h = Harness::new().await?;
    let parent = h.submit_scrape(1).await?;
    h.manager.dispatch(parent).await?;
    h.manager
        .fail(parent, ExecutionError::permanent("account suspended"))
        .await?;

    let later = Utc::now() + Duration::hours(1);
    let blocked = h
        .manager
        .submit(
            SubmitJob::new("scrape_one", json!({"account_id": 2}))
                .depends_on(parent)
                .run_at(later),
        )
        .await?
        .id;
    h.make_due(blocked).await?;
    let free = h
        .manager
        .submit(SubmitJob::new("scrape_all", json!({})).run_at(later))
        .await?
        .id;
    h.make_due(free).await?;

    let summary = h.manager.dispatch_ready(1).await?;
    assert_eq!(summary.dispatched, 1);
    assert_eq!(h.status(free).await?, JobStatus::Running);
    assert_eq!(h.status(blocked).await?, JobStatus::Scheduled);
    Ok(())
}

#[tokio::test]
async fn release_scan_skips_permanently_blocked_dependents() -> Result<()> {
    let h = Harness::new().await?;
    let failed_parent = h.submit_scrape(1).await?;
    h.manager.dispatch(failed_parent).await?;
    h.manager
        .fail(failed_parent, ExecutionError::permanent("account suspended"))
        .await?;
    let stuck = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 2})).depends_on(failed_parent))
        .await?
        .id;

    let parent = h.submit_scrape(3).await?;
    let child = h
        .manager
        .submit(SubmitJob::new("scrape_one", json!({"account_id": 4})).depends_on(parent))
        .await?
        .id;
    h.manager.dispatch(parent).await?;

    // Complete the prerequisite without the manager so only the scan can release.
    let changes = orchestrator::models::job::ActiveModel {
        status: sea_orm::Set(JobStatus::Completed),
        ..Default::default()
    };
    h.jobs
        .transition(
            parent,
            &orchestrator::repositories::TransitionGuard::status_in(&[JobStatus::Running]),
            changes,
        )
        .await?;

    let resolver = DependencyResolver::new(h.jobs.clone()).with_scan_limit(1);
    let summary = resolver.release_blocked(&h.manager).await?;
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(h.status(child).await?, JobStatus::Running);
    assert_eq!(h.status(stuck).await?, JobStatus::Pending);
    Ok(())
}
