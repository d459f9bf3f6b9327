//! Tests for the scheduler module.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use crate::engine::RetryOutcome;
    use crate::metrics::EngineMetrics;
    use crate::rule::Rule;
    use crate::scheduler::offset::{is_frequency_due, is_offset_due, spread_offset};
    use crate::scheduler::{JobScheduler, Ticker};

    fn rule(id: &str, frequency: u64) -> Rule {
        Rule::new(id, frequency, format!("http://datasource/{id}"))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn due_ids(scheduler: &JobScheduler, secs: i64) -> Vec<String> {
        let mut ids: Vec<String> = scheduler
            .tick(at(secs))
            .iter()
            .map(|job| job.rule_id())
            .collect();
        ids.sort();
        ids
    }

    // -- offset helpers ------------------------------------------------------

    #[test]
    fn spread_offset_even_split() {
        assert_eq!(spread_offset(60, 0, 3), 0);
        assert_eq!(spread_offset(60, 1, 3), 20);
        assert_eq!(spread_offset(60, 2, 3), 40);
    }

    #[test]
    fn spread_offset_floors_sub_second() {
        assert_eq!(spread_offset(1, 1, 3), 0);
        assert_eq!(spread_offset(10, 1, 4), 2);
        assert_eq!(spread_offset(60, 0, 0), 0);
    }

    #[test]
    fn frequency_and_offset_checks() {
        assert!(is_frequency_due(120, 60));
        assert!(!is_frequency_due(121, 60));
        assert!(is_frequency_due(7, 0));
        assert!(is_offset_due(40, 20));
        assert!(!is_offset_due(41, 20));
        assert!(is_offset_due(41, 0));
    }

    // -- sync_rules ----------------------------------------------------------

    #[test]
    fn sync_adds_and_removes_jobs() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60), rule("b", 60)]);
        assert_eq!(scheduler.len(), 2);

        scheduler.sync_rules(&[rule("b", 60), rule("c", 30)]);
        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.get("a").is_none());
        assert!(scheduler.get("c").is_some());
    }

    #[test]
    fn sync_forgets_metrics_of_removed_rules() {
        let metrics = EngineMetrics::shared();
        let mut scheduler = JobScheduler::with_metrics(metrics.clone());
        scheduler.sync_rules(&[rule("a", 60), rule("b", 60)]);
        {
            let mut m = metrics.write().unwrap();
            let ok = RetryOutcome::Succeeded { attempts: 1 };
            m.record_run("a", &ok, Duration::from_millis(10));
            m.record_run("b", &ok, Duration::from_millis(10));
        }

        scheduler.sync_rules(&[rule("b", 60)]);

        let m = metrics.read().unwrap();
        assert!(!m.avg_run_duration.contains_key("a"));
        assert!(!m.last_run.contains_key("a"));
        assert!(m.avg_run_duration.contains_key("b"));
    }

    #[test]
    fn sync_preserves_existing_job_and_running_flag() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60)]);
        let before = scheduler.get("a").unwrap();
        let _guard = before.try_start().unwrap();

        scheduler.sync_rules(&[rule("a", 120)]);
        let after = scheduler.get("a").unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_running());
        assert_eq!(after.rule().frequency, 120);
    }

    #[test]
    fn sync_assigns_offsets_by_id_order() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("c", 60), rule("a", 60), rule("b", 60)]);
        assert_eq!(scheduler.get("a").unwrap().offset(), 0);
        assert_eq!(scheduler.get("b").unwrap().offset(), 20);
        assert_eq!(scheduler.get("c").unwrap().offset(), 40);
    }

    // -- tick ----------------------------------------------------------------

    #[test]
    fn zero_offset_job_due_on_frequency_boundary() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60)]);
        assert_eq!(due_ids(&scheduler, 600), vec!["a"]);
        assert!(due_ids(&scheduler, 601).is_empty());
    }

    #[test]
    fn offset_job_waits_for_its_offset() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60), rule("b", 60)]);
        // b gets offset 30.
        assert_eq!(scheduler.get("b").unwrap().offset(), 30);

        assert_eq!(due_ids(&scheduler, 600), vec!["a"]);
        assert!(scheduler.get("b").unwrap().offset_wait());
        assert!(due_ids(&scheduler, 615).is_empty());
        assert_eq!(due_ids(&scheduler, 630), vec!["b"]);
        assert!(!scheduler.get("b").unwrap().offset_wait());
    }

    #[test]
    fn zero_frequency_runs_every_tick() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 0)]);
        assert_eq!(due_ids(&scheduler, 1), vec!["a"]);
        assert_eq!(due_ids(&scheduler, 2), vec!["a"]);
    }

    #[test]
    fn paused_rules_are_skipped() {
        let mut paused = rule("a", 60);
        paused.paused = true;
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[paused]);
        assert!(due_ids(&scheduler, 600).is_empty());
    }

    #[test]
    fn running_jobs_are_skipped() {
        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60)]);
        let job = scheduler.get("a").unwrap();
        let guard = job.try_start().unwrap();
        assert!(due_ids(&scheduler, 600).is_empty());
        drop(guard);
        assert_eq!(due_ids(&scheduler, 660), vec!["a"]);
    }

    // -- ticker --------------------------------------------------------------

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn ticker_starts_on_whole_second() {
        let mut ticker = Ticker::new(at_ms(600_400), Duration::from_secs(1));
        assert_eq!(ticker.next_tick(), at(600));
        assert_eq!(ticker.advance(at_ms(600_400)), vec![at(600)]);
        assert!(ticker.advance(at_ms(600_900)).is_empty());
    }

    #[test]
    fn late_wakeup_replays_skipped_seconds() {
        let mut ticker = Ticker::new(at(598), Duration::from_secs(1));
        assert_eq!(ticker.advance(at(598)), vec![at(598)]);

        // Woke up 2.1s late: 599 and 600 must both be handed out.
        assert_eq!(ticker.advance(at_ms(600_100)), vec![at(599), at(600)]);

        let mut scheduler = JobScheduler::new();
        scheduler.sync_rules(&[rule("a", 60)]);
        let due: Vec<String> = [at(599), at(600)]
            .into_iter()
            .flat_map(|t| scheduler.tick(t))
            .map(|job| job.rule_id())
            .collect();
        assert_eq!(due, vec!["a"]);
    }

    #[test]
    fn long_gap_skips_ahead_instead_of_replaying() {
        let mut ticker = Ticker::new(at(0), Duration::from_secs(1));
        let ticks = ticker.advance(at(3_600));
        assert_eq!(ticks.len(), 60);
        assert_eq!(ticks[0], at(0));
        assert_eq!(ticker.next_tick(), at(3_601));
        assert_eq!(ticker.advance(at(3_601)), vec![at(3_601)]);
    }
}
