//! Scheduling service workflows over the SQLite store

use std::sync::Arc;

use chrono::{Duration, TimeZone, Timelike, Utc};
use tempfile::TempDir;

use shortcast::error::Error;
use shortcast::models::{Cadence, MetadataOverrides, UploadStatus, Video, VideoId};
use shortcast::quota::QuotaLedger;
use shortcast::scheduler::{Dispatcher, DispatcherConfig, SchedulePlanner};
use shortcast::service::{NewAccount, SchedulingService, ServiceConfig};
use shortcast::storage::{SharedProjectRepository, SqliteStore, UploadFilter, VideoFilter};
use shortcast::transport::{DryRunTransport, StaticCredentials};

fn open(dir: &TempDir) -> (Arc<SqliteStore>, SchedulingService) {
    let store = Arc::new(SqliteStore::new(dir.path().join("shortcast.db")).unwrap());
    let service = SchedulingService::new(
        store.clone(),
        SchedulePlanner::seeded(30, 99),
        ServiceConfig::default(),
    )
    .unwrap();
    (store, service)
}

fn add_videos(service: &SchedulingService, n: usize) -> Vec<VideoId> {
    (0..n)
        .map(|i| {
            let video = Video::new(format!("clip-{i}"), "pets", 45, Utc::now())
                .with_title(format!("Clip {i}"));
            service.add_video(&video).unwrap().id
        })
        .collect()
}

#[tokio::test]
async fn test_bulk_schedule_dispatch_and_reload() {
    let dir = TempDir::new().unwrap();
    let (store, service) = open(&dir);

    let project = service.create_project("main", None).unwrap();
    let mut input = NewAccount::new("Cat Clips", project.id, "pets");
    input.default_tags = vec!["shorts".into(), "cats".into()];
    let account = service.create_account(input).unwrap();
    let videos = add_videos(&service, 5);

    let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
    let uploads = service
        .bulk_schedule(account.id, &videos, start, Some(Cadence::new(2).unwrap()))
        .unwrap();
    assert_eq!(uploads.len(), 5);
    for (i, upload) in uploads.iter().enumerate() {
        let hour = if i % 2 == 0 { 10 } else { 18 };
        let anchor = (start + Duration::days((i / 2) as i64))
            .with_hour(hour)
            .unwrap()
            .with_minute(0)
            .unwrap();
        assert!((upload.scheduled_for - anchor).num_minutes().abs() <= 30);
    }
    assert!(uploads[0].description.ends_with("#shorts #cats"));

    let unpicked = service
        .list_videos(&VideoFilter {
            picked: Some(false),
            ..Default::default()
        })
        .unwrap();
    assert!(unpicked.is_empty());

    let dispatcher = Dispatcher::new(
        service.store(),
        service.ledger(),
        Arc::new(DryRunTransport),
        Arc::new(StaticCredentials::new("token")),
        DispatcherConfig::default(),
    );
    let report = dispatcher
        .run_cycle(start + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(report.succeeded, 5);

    let metrics = service.dashboard_metrics().unwrap();
    assert_eq!(metrics.uploads_by_status[&UploadStatus::Done], 5);
    assert_eq!(metrics.uploads_today, 5);
    assert_eq!(metrics.quota.total_used, 5 * 1600);
    assert_eq!(metrics.quota.uploads_remaining, 1);

    // Terminal uploads are immutable
    let done = uploads[0].id;
    assert!(matches!(
        service.delete_upload(done),
        Err(Error::ImmutableTerminalState { .. })
    ));
    assert!(matches!(
        service.reschedule(done, start + Duration::days(9)),
        Err(Error::ImmutableTerminalState { .. })
    ));
    assert!(matches!(
        service.update_metadata(done, MetadataOverrides::default()),
        Err(Error::ImmutableTerminalState { .. })
    ));

    // Quota counters survive a restart
    drop(dispatcher);
    drop(service);
    drop(store);
    let (store, _) = open(&dir);
    let repo: SharedProjectRepository = store.clone();
    let ledger = QuotaLedger::load(repo, 1600).unwrap();
    assert_eq!(ledger.project(project.id).unwrap().quota_used_today, 8000);
}

#[test]
fn test_bulk_schedule_invalid_cadence_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let (_, service) = open(&dir);
    let project = service.create_project("main", None).unwrap();
    let account = service
        .create_account(NewAccount::new("acc", project.id, "pets"))
        .unwrap();
    add_videos(&service, 2);

    assert!(matches!(
        Cadence::new(4),
        Err(Error::InvalidScheduleRequest { .. })
    ));
    let err = service
        .bulk_schedule(account.id, &[], Utc::now(), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidScheduleRequest { .. }));
    assert!(service
        .list_uploads(&UploadFilter::for_account(account.id))
        .unwrap()
        .is_empty());
}

#[test]
fn test_reschedule_collision_is_jittered() {
    let dir = TempDir::new().unwrap();
    let (_, service) = open(&dir);
    let project = service.create_project("main", None).unwrap();
    let account = service
        .create_account(NewAccount::new("acc", project.id, "pets"))
        .unwrap();
    let videos = add_videos(&service, 2);
    let at = Utc.with_ymd_and_hms(2030, 6, 1, 10, 0, 0).unwrap();

    let first = service
        .pick_video(videos[0], account.id, at, MetadataOverrides::default())
        .unwrap();
    let second = service
        .pick_video(
            videos[1],
            account.id,
            at + Duration::hours(8),
            MetadataOverrides::default(),
        )
        .unwrap();

    let moved = service.reschedule(second.id, first.scheduled_for).unwrap();
    assert_ne!(moved.scheduled_for, first.scheduled_for);
    assert!((moved.scheduled_for - first.scheduled_for).num_minutes().abs() <= 30);

    // Moving onto its own minute is not a collision
    let same = service.reschedule(first.id, first.scheduled_for).unwrap();
    assert_eq!(same.scheduled_for, first.scheduled_for);
}

#[test]
fn test_paused_account_uploads_resume_to_scheduled() {
    let dir = TempDir::new().unwrap();
    let (_, service) = open(&dir);
    let project = service.create_project("main", None).unwrap();
    let account = service
        .create_account(NewAccount::new("acc", project.id, "pets"))
        .unwrap();
    let videos = add_videos(&service, 3);
    let start = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
    service
        .bulk_schedule(account.id, &videos, start, None)
        .unwrap();

    assert_eq!(service.pause_account(account.id).unwrap(), 3);
    let metrics = service.dashboard_metrics().unwrap();
    assert_eq!(metrics.uploads_by_status[&UploadStatus::Paused], 3);
    assert_eq!(metrics.active_accounts, 0);

    assert_eq!(service.resume_account(account.id).unwrap(), 3);
    assert_eq!(
        service.dashboard_metrics().unwrap().uploads_by_status[&UploadStatus::Scheduled],
        3
    );
}

#[test]
fn test_unknown_account_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_, service) = open(&dir);
    assert!(matches!(
        service.pause_account(uuid::Uuid::new_v4()),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_worker_sees_changes_made_by_another_process() {
    let dir = TempDir::new().unwrap();
    let (_worker_store, worker) = open(&dir);
    let dispatcher = Dispatcher::new(
        worker.store(),
        worker.ledger(),
        Arc::new(DryRunTransport),
        Arc::new(StaticCredentials::new("token")),
        DispatcherConfig::default(),
    );

    // CLI commands run against the same database file
    let (_cli_store, cli) = open(&dir);
    let project = cli.create_project("late", Some(10_000)).unwrap();
    let account = cli
        .create_account(NewAccount::new("acc", project.id, "pets"))
        .unwrap();
    let videos = add_videos(&cli, 2);
    let now = Utc::now();
    cli.pick_video(
        videos[0],
        account.id,
        now - Duration::minutes(5),
        MetadataOverrides::default(),
    )
    .unwrap();

    let report = dispatcher.run_cycle(now).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(cli.quota_status().unwrap().total_used, 1600);

    // An operator reset is not overwritten by the worker's next reservation
    assert_eq!(cli.ledger().force_reset().unwrap(), 1);
    cli.pick_video(
        videos[1],
        account.id,
        now - Duration::minutes(2),
        MetadataOverrides::default(),
    )
    .unwrap();
    let report = dispatcher.run_cycle(now).await.unwrap();
    assert_eq!(report.succeeded, 1);

    assert_eq!(worker.quota_status().unwrap().total_used, 1600);
    assert_eq!(cli.quota_status().unwrap().total_used, 1600);
    assert_eq!(worker.list_projects().unwrap().len(), 1);
}
