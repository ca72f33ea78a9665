//! Scheduler ticks driven by a manual clock. Workers are never started, so
//! every enqueued job stays visible in its queue.

mod common;

use std::sync::Arc;

use autoblog_engine::core::{
    queues, AgentProfile, ArtifactStatus, ContentArtifact, GenerationService, ScheduleConfig,
    ScheduleInterval, Source,
};
use autoblog_engine::util::{Clock, ManualClock, TenantId};
use autoblog_engine::{Engine, EngineBuilder, EngineConfig};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{test_config, ScriptedGenerator};
use serde_json::json;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
}

fn idle_engine(clock: &Arc<ManualClock>) -> (Engine, AgentProfile) {
    idle_engine_with(clock, test_config())
}

fn idle_engine_with(clock: &Arc<ManualClock>, config: EngineConfig) -> (Engine, AgentProfile) {
    let engine = EngineBuilder::new(config)
        .with_generation_service(Arc::new(ScriptedGenerator::new()) as Arc<dyn GenerationService>)
        .with_clock(Arc::clone(clock) as Arc<dyn Clock>)
        .with_scheduler(false)
        .build()
        .unwrap();
    let agent = AgentProfile::new(TenantId::new(), "Ferris", "systems programming");
    engine
        .repositories()
        .agents
        .upsert(agent.clone())
        .unwrap();
    (engine, agent)
}

fn add_schedule(engine: &Engine, agent: &AgentProfile, interval: ScheduleInterval, hour: u32) -> ScheduleConfig {
    let schedule = ScheduleConfig::new(agent, interval, hour);
    engine
        .repositories()
        .schedules
        .upsert(schedule.clone())
        .unwrap();
    schedule
}

/// Tick every hour for `hours` hours, returning the generate jobs created.
async fn run_hourly(engine: &Engine, clock: &ManualClock, hours: u32) -> usize {
    let mut created = 0;
    for _ in 0..hours {
        let (jobs, _) = engine
            .scheduler()
            .tick_schedules(clock.now())
            .await
            .unwrap();
        created += jobs.len();
        clock.advance(Duration::hours(1));
    }
    created
}

fn generation_depth(engine: &Engine) -> usize {
    engine.health().queue_depths[queues::GENERATION]
}

fn scheduled_artifact(agent: &AgentProfile, due: DateTime<Utc>) -> ContentArtifact {
    let mut artifact = ContentArtifact::draft(agent, "Scheduled post", "body", due);
    artifact.status = ArtifactStatus::Scheduled;
    artifact.scheduled_at = Some(due);
    artifact
}

// ============================================================================
// SCHEDULES
// ============================================================================

#[tokio::test]
async fn test_daily_schedule_fires_once_per_day() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 2, 0, 30)));
    let (engine, agent) = idle_engine(&clock);
    let schedule = add_schedule(&engine, &agent, ScheduleInterval::Daily, 9);

    let created = run_hourly(&engine, &clock, 7 * 24).await;

    assert_eq!(created, 7);
    assert_eq!(generation_depth(&engine), 7);
    let stored = engine
        .repositories()
        .schedules
        .get(schedule.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_run_at, Some(at(2026, 3, 8, 9, 30)));
    assert_eq!(stored.next_run_at, Some(at(2026, 3, 9, 9, 0)));
}

#[tokio::test]
async fn test_weekly_schedule_fires_on_mondays() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 1, 0, 0)));
    let (engine, agent) = idle_engine(&clock);
    add_schedule(&engine, &agent, ScheduleInterval::Weekly, 9);

    let created = run_hourly(&engine, &clock, 14 * 24).await;

    assert_eq!(created, 2);
    assert_eq!(generation_depth(&engine), 2);
}

#[tokio::test]
async fn test_first_tick_only_initialises() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 2, 12, 0)));
    let (engine, agent) = idle_engine(&clock);
    let schedule = add_schedule(&engine, &agent, ScheduleInterval::Daily, 9);

    let (jobs, initialised) = engine
        .scheduler()
        .tick_schedules(clock.now())
        .await
        .unwrap();

    assert!(jobs.is_empty());
    assert_eq!(initialised, 1);
    let stored = engine
        .repositories()
        .schedules
        .get(schedule.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.next_run_at, Some(at(2026, 3, 3, 9, 0)));
    assert_eq!(stored.last_run_at, None);
}

#[tokio::test]
async fn test_overdue_schedule_catches_up_with_one_run() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, agent) = idle_engine(&clock);
    let mut schedule = ScheduleConfig::new(&agent, ScheduleInterval::Daily, 9);
    schedule.next_run_at = Some(now - Duration::days(5));
    engine
        .repositories()
        .schedules
        .upsert(schedule.clone())
        .unwrap();

    let (jobs, _) = engine.scheduler().tick_schedules(now).await.unwrap();
    let (again, _) = engine.scheduler().tick_schedules(now).await.unwrap();

    assert_eq!(jobs.len(), 1);
    assert!(again.is_empty());
    let stored = engine
        .repositories()
        .schedules
        .get(schedule.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.next_run_at, Some(at(2026, 3, 11, 9, 0)));
}

#[tokio::test]
async fn test_concurrent_ticks_fire_once() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, agent) = idle_engine(&clock);
    let mut schedule = ScheduleConfig::new(&agent, ScheduleInterval::Daily, 9);
    schedule.next_run_at = Some(at(2026, 3, 10, 9, 0));
    engine.repositories().schedules.upsert(schedule).unwrap();

    let scheduler = engine.scheduler();
    let (a, b) = tokio::join!(scheduler.tick_schedules(now), scheduler.tick_schedules(now));

    let fired = a.unwrap().0.len() + b.unwrap().0.len();
    assert_eq!(fired, 1);
    assert_eq!(generation_depth(&engine), 1);
}

#[tokio::test]
async fn test_inactive_schedule_never_fires() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 2, 0, 30)));
    let (engine, agent) = idle_engine(&clock);
    let mut schedule = ScheduleConfig::new(&agent, ScheduleInterval::Daily, 9);
    schedule.is_active = false;
    engine.repositories().schedules.upsert(schedule).unwrap();

    let created = run_hourly(&engine, &clock, 3 * 24).await;

    assert_eq!(created, 0);
    assert_eq!(generation_depth(&engine), 0);
}

// ============================================================================
// PUBLISH, SOURCES, MAINTENANCE
// ============================================================================

#[tokio::test]
async fn test_due_artifact_gets_one_publish_job() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, agent) = idle_engine(&clock);
    let due = scheduled_artifact(&agent, now - Duration::minutes(5));
    let later = scheduled_artifact(&agent, now + Duration::hours(1));
    let artifacts = &engine.repositories().artifacts;
    artifacts.upsert(due).unwrap();
    artifacts.upsert(later).unwrap();

    let first = engine.scheduler().tick_publish(now).unwrap();
    let second = engine.scheduler().tick_publish(now).unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(engine.health().queue_depths[queues::PUBLISHING], 1);
}

#[tokio::test]
async fn test_monitored_source_respects_interval() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, agent) = idle_engine(&clock);
    let mut fresh = Source::new(&agent, "rss", json!({ "feed_url": "https://example.com/feed" }));
    fresh.monitor_interval_secs = Some(3_600);
    fresh.last_fetched_at = Some(now - Duration::minutes(10));
    let mut stale = Source::new(&agent, "rss", json!({ "feed_url": "https://example.com/other" }));
    stale.monitor_interval_secs = Some(3_600);
    let unmonitored = Source::new(&agent, "rss", json!({ "feed_url": "https://example.com/x" }));
    let sources = &engine.repositories().sources;
    sources.upsert(fresh).unwrap();
    sources.upsert(stale).unwrap();
    sources.upsert(unmonitored).unwrap();

    let jobs = engine.scheduler().tick_sources(now).unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(engine.health().queue_depths[queues::SOURCES], 1);
}

#[tokio::test]
async fn test_maintenance_enqueued_once_per_day() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 1, 0)));
    let (engine, _) = idle_engine(&clock);
    let scheduler = engine.scheduler();

    assert!(scheduler.tick_maintenance(clock.now()).unwrap().is_none());
    clock.set(at(2026, 3, 10, 4, 0));
    assert!(scheduler.tick_maintenance(clock.now()).unwrap().is_some());
    clock.set(at(2026, 3, 10, 5, 0));
    assert!(scheduler.tick_maintenance(clock.now()).unwrap().is_none());
    assert_eq!(engine.health().queue_depths[queues::MAINTENANCE], 1);
}

#[tokio::test]
async fn test_tick_updates_heartbeat() {
    let now = at(2026, 3, 10, 1, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, _) = idle_engine(&clock);
    assert!(engine.health().last_scheduler_tick.is_none());

    let report = engine.scheduler().tick(now).await.unwrap();

    assert!(report.generation_jobs.is_empty());
    assert!(report.maintenance_job.is_none());
    assert!(report.health_check_job.is_some());
    assert!(report.republish_jobs.is_empty());
    assert_eq!(engine.health().last_scheduler_tick, Some(now));
}

#[tokio::test]
async fn test_health_check_enqueued_once_per_window() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let (engine, _) = idle_engine(&clock);
    let scheduler = engine.scheduler();

    assert!(scheduler.tick_health_check(clock.now()).unwrap().is_some());
    clock.advance(Duration::seconds(30));
    assert!(scheduler.tick_health_check(clock.now()).unwrap().is_none());
    clock.advance(Duration::seconds(300));
    assert!(scheduler.tick_health_check(clock.now()).unwrap().is_some());
    assert_eq!(engine.health().queue_depths[queues::MAINTENANCE], 2);
}

#[tokio::test]
async fn test_health_check_disabled_with_zero_interval() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let mut config = test_config();
    config.scheduler.health_check_tick_secs = 0;
    let (engine, _) = idle_engine_with(&clock, config);

    assert!(engine.scheduler().tick_health_check(clock.now()).unwrap().is_none());
    assert_eq!(engine.health().queue_depths[queues::MAINTENANCE], 0);
}

fn failed_artifact(agent: &AgentProfile, now: DateTime<Utc>, scheduled: bool, retries: u32) -> ContentArtifact {
    let mut artifact = ContentArtifact::draft(agent, "Failed post", "body", now);
    artifact.status = ArtifactStatus::Failed;
    artifact.failure_reason = Some("AdapterTransientError: 503".into());
    artifact.scheduled_at = scheduled.then_some(now);
    artifact.publish_retries = retries;
    artifact
}

#[tokio::test]
async fn test_failed_publications_are_reopened() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let (engine, agent) = idle_engine(&clock);
    let earlier = now - Duration::hours(2);
    let publication = failed_artifact(&agent, earlier, true, 0);
    let validation = failed_artifact(&agent, earlier, false, 0);
    let exhausted = failed_artifact(&agent, earlier, true, 3);
    let artifacts = &engine.repositories().artifacts;
    for a in [&publication, &validation, &exhausted] {
        artifacts.upsert(a.clone()).unwrap();
    }

    let jobs = engine.scheduler().tick_failed_publications(now).unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(engine.health().queue_depths[queues::PUBLISHING], 1);
    let reopened = artifacts.get(publication.id).unwrap().unwrap();
    assert_eq!(reopened.status, ArtifactStatus::Scheduled);
    assert_eq!(reopened.publish_retries, 1);
    assert_eq!(reopened.scheduled_at, Some(now));
    assert_eq!(reopened.publish_key(), format!("publish:{}:retry:1", publication.id));
    assert_eq!(
        artifacts.get(validation.id).unwrap().unwrap().status,
        ArtifactStatus::Failed
    );
    assert_eq!(
        artifacts.get(exhausted.id).unwrap().unwrap().status,
        ArtifactStatus::Failed
    );

    // the publish tick shares the key, so the reopened artifact is not doubled
    assert!(engine.scheduler().tick_publish(now).unwrap().is_empty());
    assert!(engine.scheduler().tick_failed_publications(now).unwrap().is_empty());
}

#[tokio::test]
async fn test_publication_retries_disabled_with_zero_budget() {
    let now = at(2026, 3, 10, 12, 0);
    let clock = Arc::new(ManualClock::new(now));
    let mut config = test_config();
    config.scheduler.max_publication_retries = 0;
    let (engine, agent) = idle_engine_with(&clock, config);
    engine
        .repositories()
        .artifacts
        .upsert(failed_artifact(&agent, now, true, 0))
        .unwrap();

    assert!(engine.scheduler().tick_failed_publications(now).unwrap().is_empty());
    assert_eq!(engine.health().queue_depths[queues::PUBLISHING], 0);
}
