//! Tests for schedule intervals and topic filters

use autoblog_engine::core::{AgentProfile, ScheduleConfig, ScheduleInterval};
use autoblog_engine::util::TenantId;
use chrono::{DateTime, TimeZone, Utc};

fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
}

fn schedule(interval: ScheduleInterval, hour: u32) -> ScheduleConfig {
    let agent = AgentProfile::new(TenantId::new(), "Ferris", "systems programming");
    ScheduleConfig::new(&agent, interval, hour)
}

#[test]
fn test_parse_named_intervals() {
    assert_eq!("daily".parse::<ScheduleInterval>().unwrap(), ScheduleInterval::Daily);
    assert_eq!("Weekly".parse::<ScheduleInterval>().unwrap(), ScheduleInterval::Weekly);
    assert_eq!(
        "every_3_days".parse::<ScheduleInterval>().unwrap(),
        ScheduleInterval::EveryNDays(3)
    );
    assert_eq!(
        "0 9 * * 1-5".parse::<ScheduleInterval>().unwrap(),
        ScheduleInterval::Cron("0 9 * * 1-5".into())
    );
}

#[test]
fn test_parse_rejects_bad_intervals() {
    assert!("every_0_days".parse::<ScheduleInterval>().is_err());
    assert!("every_x_days".parse::<ScheduleInterval>().is_err());
    assert!("fortnightly".parse::<ScheduleInterval>().is_err());
}

#[test]
fn test_display_round_trips_names() {
    for name in ["daily", "weekly", "biweekly", "every_5_days"] {
        let interval: ScheduleInterval = name.parse().unwrap();
        assert_eq!(interval.to_string(), name);
    }
}

#[test]
fn test_cron_expression_export() {
    assert_eq!(ScheduleInterval::Daily.cron_expression(9), "0 9 * * *");
    assert_eq!(ScheduleInterval::Weekly.cron_expression(9), "0 9 * * 1");
    assert_eq!(ScheduleInterval::Biweekly.cron_expression(6), "0 6 1,15 * *");
}

#[test]
fn test_next_run_is_strictly_after_now() {
    let s = schedule(ScheduleInterval::Daily, 9);
    assert_eq!(s.next_run_after(at(2026, 3, 2, 8, 59)), Some(at(2026, 3, 2, 9, 0)));
    assert_eq!(s.next_run_after(at(2026, 3, 2, 9, 0)), Some(at(2026, 3, 3, 9, 0)));
}

#[test]
fn test_biweekly_fires_on_first_and_fifteenth() {
    let s = schedule(ScheduleInterval::Biweekly, 10);
    assert_eq!(s.next_run_after(at(2026, 3, 2, 0, 0)), Some(at(2026, 3, 15, 10, 0)));
    assert_eq!(s.next_run_after(at(2026, 3, 15, 11, 0)), Some(at(2026, 4, 1, 10, 0)));
}

#[test]
fn test_cron_schedule_ignores_publish_hour() {
    let s = schedule(ScheduleInterval::Cron("30 14 * * *".into()), 9);
    assert_eq!(s.next_run_after(at(2026, 3, 2, 9, 0)), Some(at(2026, 3, 2, 14, 30)));
}

#[test]
fn test_publish_hour_is_clamped() {
    let s = schedule(ScheduleInterval::Daily, 99);
    assert_eq!(s.publish_hour, 23);
}

#[test]
fn test_topic_filters() {
    let mut s = schedule(ScheduleInterval::Daily, 9);
    assert!(s.accepts_topic("anything goes"));

    s.target_keywords = vec!["Rust".into(), "wasm".into()];
    s.exclude_keywords = vec!["crypto".into()];
    assert!(s.accepts_topic("Why RUST wins"));
    assert!(s.accepts_topic("WASM at the edge"));
    assert!(!s.accepts_topic("Go generics"));
    assert!(!s.accepts_topic("Rust for crypto trading"));
}
