//! Retry-Until-Deadline Loop
//!
//! Armed by the race once its initial host set has failed. Fires every
//! `retry_interval`; each firing either launches a fresh round or, once the
//! deadline measured from the start of the request has passed, ends the race.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::config::RaceConfig;

/// What the race should do on a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sample new hosts and launch round `round`
    Launch {
        /// 1-based retry round number
        round: u32,
    },
    /// Ceiling reached, stop
    Expired,
}

/// Timer driving retry rounds
#[derive(Debug)]
pub struct RetrySchedule {
    interval: Interval,
    started_at: Instant,
    deadline: Duration,
    rounds: u32,
}

impl RetrySchedule {
    /// Arm the schedule; the first tick lands one interval from now
    #[must_use]
    pub fn arm(config: &RaceConfig, started_at: Instant) -> Self {
        let period = config.retry_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            started_at,
            deadline: config.deadline,
            rounds: 0,
        }
    }

    /// Wait for the next tick and decide
    pub async fn tick(&mut self) -> RetryDecision {
        self.interval.tick().await;
        self.decide(Instant::now())
    }

    fn decide(&mut self, now: Instant) -> RetryDecision {
        if now.saturating_duration_since(self.started_at) >= self.deadline {
            return RetryDecision::Expired;
        }
        self.rounds += 1;
        RetryDecision::Launch { round: self.rounds }
    }

    /// Retry rounds launched so far
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.rounds
    }
}

/// Tick an optional schedule; pends forever while unarmed
pub async fn next_tick(schedule: &mut Option<RetrySchedule>) -> RetryDecision {
    match schedule {
        Some(schedule) => schedule.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RaceConfig {
        RaceConfig {
            hosts_per_round: 5,
            retry_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let start = Instant::now();
        let mut schedule = RetrySchedule::arm(&config(), start);

        assert_eq!(schedule.tick().await, RetryDecision::Launch { round: 1 });
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_at_deadline() {
        let start = Instant::now();
        let mut schedule = RetrySchedule::arm(&config(), start);

        let mut launched = 0;
        loop {
            match schedule.tick().await {
                RetryDecision::Launch { .. } => launched += 1,
                RetryDecision::Expired => break,
            }
        }
        // Ticks at 5, 10, ..., 115 launch; the tick at 120 expires
        assert_eq!(launched, 23);
        assert_eq!(schedule.rounds(), 23);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_request_start() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(118)).await;

        let mut schedule = RetrySchedule::arm(&config(), start);
        assert_eq!(schedule.tick().await, RetryDecision::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unarmed_schedule_pends() {
        let mut schedule: Option<RetrySchedule> = None;
        let result =
            tokio::time::timeout(Duration::from_secs(600), next_tick(&mut schedule)).await;
        assert!(result.is_err());
    }
}
