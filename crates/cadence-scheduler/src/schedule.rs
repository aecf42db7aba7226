use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::{MisfirePolicy, Schedule};

/// Upper bound on cron slots counted while resolving a misfire; `skipped`
/// saturates here.
const MAX_MISFIRE_SCAN: u32 = 10_000;

/// Outcome of a fire-time computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFire {
    /// `None` when the schedule is exhausted.
    pub fire_at: Option<DateTime<Utc>>,
    /// Missed slots dropped by the misfire policy.
    pub skipped: u32,
}

impl NextFire {
    fn on_time(at: Option<DateTime<Utc>>) -> Self {
        Self {
            fire_at: at,
            skipped: 0,
        }
    }
}

/// Parse a cron expression, accepting the classic 5-field form.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expression}': {e}")))
}

/// Compute the first fire slot strictly after `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` instant that is
/// not after `from`). A cron expression that can never match is an error.
pub fn next_after(schedule: &Schedule, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        Schedule::Cron { expression } => {
            let cron = parse_cron(expression)?;
            match cron.after(&from).next() {
                Some(t) => Ok(Some(t)),
                None => Err(SchedulerError::InvalidSchedule(format!(
                    "'{expression}' never matches after {from}"
                ))),
            }
        }

        Schedule::Interval { every_secs } => {
            let step = interval_step(*every_secs)?;
            from.checked_add_signed(step)
                .map(Some)
                .ok_or_else(|| SchedulerError::InvalidSchedule("interval overflows".into()))
        }

        Schedule::Once { at } => Ok((*at > from).then_some(*at)),
    }
}

fn interval_step(every_secs: u64) -> Result<Duration> {
    if every_secs == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be at least one second".into(),
        ));
    }
    i64::try_from(every_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("interval {every_secs}s is too large")))
}

/// Pure fire-time calculator. `now` is always an explicit input so results
/// are deterministic under a fake clock and across restarts.
#[derive(Debug, Clone, Copy)]
pub struct TriggerCalculator {
    misfire_threshold: Duration,
}

impl Default for TriggerCalculator {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(1))
    }
}

impl TriggerCalculator {
    pub fn new(misfire_threshold: std::time::Duration) -> Self {
        Self {
            misfire_threshold: Duration::from_std(misfire_threshold).unwrap_or(Duration::MAX),
        }
    }

    /// Check that `schedule` is well-formed without computing anything.
    pub fn validate(&self, schedule: &Schedule) -> Result<()> {
        match schedule {
            Schedule::Cron { expression } => parse_cron(expression).map(|_| ()),
            Schedule::Interval { every_secs } => interval_step(*every_secs).map(|_| ()),
            Schedule::Once { .. } => Ok(()),
        }
    }

    /// Next fire time after `from`, with the misfire policy applied when the
    /// computed slot already lies in the past relative to `now`.
    pub fn next_fire_time(
        &self,
        schedule: &Schedule,
        from: DateTime<Utc>,
        policy: MisfirePolicy,
        now: DateTime<Utc>,
    ) -> Result<NextFire> {
        match next_after(schedule, from)? {
            Some(slot) => self.resolve(schedule, slot, policy, now),
            None => Ok(NextFire::on_time(None)),
        }
    }

    /// Apply the misfire policy to an already computed `slot`.
    ///
    /// A slot is a misfire once it is older than the threshold. Then:
    /// - `FireNow` fires at `now`;
    /// - `Skip` jumps to the first slot after `now` and reports every
    ///   missed slot in `skipped`;
    /// - `FireOnce` fires the most recent missed slot and reports the
    ///   earlier ones in `skipped`.
    pub fn resolve(
        &self,
        schedule: &Schedule,
        slot: DateTime<Utc>,
        policy: MisfirePolicy,
        now: DateTime<Utc>,
    ) -> Result<NextFire> {
        if !self.is_misfire(slot, now) {
            return Ok(NextFire::on_time(Some(slot)));
        }

        match policy {
            MisfirePolicy::FireNow => Ok(NextFire::on_time(Some(now))),
            MisfirePolicy::Skip => {
                let (missed, _latest) = missed_slots(schedule, slot, now)?;
                let next = next_after(schedule, now)?;
                Ok(NextFire {
                    fire_at: next,
                    skipped: missed,
                })
            }
            MisfirePolicy::FireOnce => {
                let (missed, latest) = missed_slots(schedule, slot, now)?;
                Ok(NextFire {
                    fire_at: Some(latest),
                    skipped: missed.saturating_sub(1),
                })
            }
        }
    }

    pub fn is_misfire(&self, slot: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        slot.checked_add_signed(self.misfire_threshold)
            .is_some_and(|deadline| deadline < now)
    }
}

/// Count the slots in `[first, now]` and return the latest of them.
/// `first` itself is assumed to be `<= now`.
fn missed_slots(
    schedule: &Schedule,
    first: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(u32, DateTime<Utc>)> {
    match schedule {
        Schedule::Interval { every_secs } => {
            let step = interval_step(*every_secs)?;
            let elapsed_ms = (now - first).num_milliseconds().max(0);
            let steps = elapsed_ms / step.num_milliseconds();
            let latest = first + Duration::milliseconds(steps * step.num_milliseconds());
            let missed = u32::try_from(steps.saturating_add(1)).unwrap_or(u32::MAX);
            Ok((missed, latest))
        }

        Schedule::Cron { expression } => {
            let cron = parse_cron(expression)?;
            let missed = 1 + cron
                .after(&first)
                .take_while(|t| *t <= now)
                .take(MAX_MISFIRE_SCAN as usize - 1)
                .count() as u32;
            Ok((missed, latest_cron_slot(&cron, first, now)))
        }

        Schedule::Once { at } => Ok((1, *at)),
    }
}

/// The most recent cron slot `<= now`, walking backwards from `now` so the
/// result does not depend on how many slots were missed.
fn latest_cron_slot(cron: &cron::Schedule, first: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(before) = cron.after(&now).next_back() else {
        return first;
    };
    // `now` itself may be a slot
    let latest = match cron.after(&before).next() {
        Some(t) if t <= now => t,
        _ => before,
    };
    latest.max(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    fn interval(every_secs: u64) -> Schedule {
        Schedule::Interval { every_secs }
    }

    fn cron(expr: &str) -> Schedule {
        Schedule::Cron {
            expression: expr.to_string(),
        }
    }

    #[test]
    fn interval_adds_to_from() {
        let next = next_after(&interval(5), t(12, 0, 0)).unwrap();
        assert_eq!(next, Some(t(12, 0, 5)));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let err = next_after(&interval(0), t(12, 0, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn five_field_cron_fires_at_second_zero() {
        let next = next_after(&cron("*/15 * * * *"), t(12, 7, 30)).unwrap();
        assert_eq!(next, Some(t(12, 15, 0)));
    }

    #[test]
    fn six_field_cron_is_strictly_after_from() {
        // from is itself a matching instant: the next one must be later
        let next = next_after(&cron("0 0 12 * * *"), t(12, 0, 0)).unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap()));
    }

    #[test]
    fn impossible_cron_is_rejected() {
        let err = next_after(&cron("0 0 0 30 2 *"), t(12, 0, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn malformed_cron_fails_validation() {
        let calc = TriggerCalculator::default();
        assert!(calc.validate(&cron("every tuesday")).is_err());
        assert!(calc.validate(&cron("*/5 * * * *")).is_ok());
    }

    #[test]
    fn once_is_exhausted_after_its_instant() {
        let sched = Schedule::Once { at: t(13, 0, 0) };
        assert_eq!(next_after(&sched, t(12, 0, 0)).unwrap(), Some(t(13, 0, 0)));
        assert_eq!(next_after(&sched, t(13, 0, 0)).unwrap(), None);
    }

    #[test]
    fn on_time_slot_is_not_a_misfire() {
        let calc = TriggerCalculator::default();
        let next = calc
            .next_fire_time(&interval(5), t(12, 0, 0), MisfirePolicy::Skip, t(12, 0, 0))
            .unwrap();
        assert_eq!(next, NextFire::on_time(Some(t(12, 0, 5))));
    }

    #[test]
    fn slot_within_threshold_is_not_a_misfire() {
        let calc = TriggerCalculator::new(std::time::Duration::from_secs(2));
        let next = calc
            .resolve(&interval(5), t(12, 0, 5), MisfirePolicy::Skip, t(12, 0, 6))
            .unwrap();
        assert_eq!(next, NextFire::on_time(Some(t(12, 0, 5))));
    }

    #[test]
    fn fire_now_fires_at_now() {
        let calc = TriggerCalculator::default();
        let now = t(12, 1, 2);
        let next = calc
            .next_fire_time(&interval(5), t(12, 0, 0), MisfirePolicy::FireNow, now)
            .unwrap();
        assert_eq!(next, NextFire::on_time(Some(now)));
    }

    #[test]
    fn skip_advances_past_now_and_counts_missed_slots() {
        let calc = TriggerCalculator::default();
        // slots 12:00:05, :10, ... :30 are all <= now (12:00:32)
        let next = calc
            .next_fire_time(&interval(5), t(12, 0, 0), MisfirePolicy::Skip, t(12, 0, 32))
            .unwrap();
        assert_eq!(next.fire_at, Some(t(12, 0, 37)));
        assert_eq!(next.skipped, 6);
    }

    #[test]
    fn fire_once_picks_most_recent_missed_slot() {
        let calc = TriggerCalculator::default();
        let next = calc
            .next_fire_time(&interval(5), t(12, 0, 0), MisfirePolicy::FireOnce, t(12, 0, 32))
            .unwrap();
        assert_eq!(next.fire_at, Some(t(12, 0, 30)));
        assert_eq!(next.skipped, 5);
    }

    #[test]
    fn fire_once_on_cron_discards_older_slots() {
        let calc = TriggerCalculator::default();
        let next = calc
            .resolve(&cron("0 * * * *"), t(9, 0, 0), MisfirePolicy::FireOnce, t(12, 30, 0))
            .unwrap();
        // 09:00, 10:00, 11:00, 12:00 missed; only 12:00 fires
        assert_eq!(next.fire_at, Some(t(12, 0, 0)));
        assert_eq!(next.skipped, 3);
    }

    #[test]
    fn fire_once_on_dense_cron_uses_latest_slot_after_long_outage() {
        let calc = TriggerCalculator::default();
        let first = t(0, 0, 0);
        let now = first + Duration::seconds(20_000);
        let next = calc
            .resolve(&cron("* * * * * *"), first, MisfirePolicy::FireOnce, now)
            .unwrap();
        assert_eq!(next.fire_at, Some(now));
        assert_eq!(next.skipped, MAX_MISFIRE_SCAN - 1);
    }

    #[test]
    fn fire_once_latest_slot_ignores_sub_second_now() {
        let calc = TriggerCalculator::default();
        let now = t(12, 30, 0) + Duration::milliseconds(250);
        let next = calc
            .resolve(&cron("0 */10 * * * *"), t(11, 0, 0), MisfirePolicy::FireOnce, now)
            .unwrap();
        assert_eq!(next.fire_at, Some(t(12, 30, 0)));
        assert_eq!(next.skipped, 9);
    }

    #[test]
    fn skip_on_dense_cron_jumps_past_now() {
        let calc = TriggerCalculator::default();
        let first = t(0, 0, 0);
        let now = first + Duration::seconds(20_000);
        let next = calc
            .resolve(&cron("* * * * * *"), first, MisfirePolicy::Skip, now)
            .unwrap();
        assert_eq!(next.fire_at, Some(now + Duration::seconds(1)));
        assert_eq!(next.skipped, MAX_MISFIRE_SCAN);
    }

    #[test]
    fn quartz_style_hourly_expression_is_accepted() {
        let calc = TriggerCalculator::default();
        let hourly = cron("0 0 * * * ?");
        assert!(calc.validate(&hourly).is_ok());
        assert_eq!(next_after(&hourly, t(12, 15, 0)).unwrap(), Some(t(13, 0, 0)));
    }

    #[test]
    fn skip_on_exhausted_one_shot_yields_nothing() {
        let calc = TriggerCalculator::default();
        let sched = Schedule::Once { at: t(9, 0, 0) };
        let next = calc
            .resolve(&sched, t(9, 0, 0), MisfirePolicy::Skip, t(12, 0, 0))
            .unwrap();
        assert_eq!(next.fire_at, None);
        assert_eq!(next.skipped, 1);
    }

    #[test]
    fn computation_is_deterministic() {
        let calc = TriggerCalculator::default();
        let sched = cron("*/7 * * * *");
        let a = calc
            .next_fire_time(&sched, t(8, 0, 0), MisfirePolicy::Skip, t(11, 0, 0))
            .unwrap();
        let b = calc
            .next_fire_time(&sched, t(8, 0, 0), MisfirePolicy::Skip, t(11, 0, 0))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn next_fire_time_is_strictly_after_from() {
        let calc = TriggerCalculator::default();
        let schedules = [
            interval(1),
            interval(3600),
            cron("* * * * *"),
            cron("30 2 * * 1"),
            cron("0 0 1 1 *"),
        ];
        let policies = [MisfirePolicy::FireNow, MisfirePolicy::Skip, MisfirePolicy::FireOnce];
        let mut from = t(0, 0, 0);
        for step in 0..50 {
            let now = from + Duration::minutes(step * 37);
            for sched in &schedules {
                for policy in policies {
                    let next = calc.next_fire_time(sched, from, policy, now).unwrap();
                    let at = next.fire_at.unwrap();
                    assert!(at > from, "{sched:?} {policy:?}: {at} <= {from}");
                    if policy == MisfirePolicy::FireNow && calc.is_misfire(at, now) {
                        panic!("fire_now must never leave a misfired slot");
                    }
                }
            }
            from += Duration::seconds(97);
        }
    }
}
