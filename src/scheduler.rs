//! Adaptive publish scheduler.
//!
//! The scheduler is ticked once per [`TICK_PERIOD`]. Every `awake_interval_secs`
//! ticks an awake interval elapses. While [`Mode::Awake`] each elapsed interval
//! publishes until `awake_publish_limit` publishes were made, then the scheduler
//! drops to [`Mode::Snoozing`]. While snoozing only every `snooze_cycles`-th elapsed
//! interval publishes. A wake command brings it back to [`Mode::Awake`].
//!
//! # Example
//!
//! ```
//! use classic_mqtt_lib::scheduler::{Mode, RateSettings, SchedulerState};
//!
//! let mut state = SchedulerState::new(RateSettings::default());
//! let first = state.tick();
//! assert!(first.publish);
//! assert!(first.include_info);
//! assert_eq!(first.mode, Mode::Snoozing);
//! ```

use log::{debug, info};
use std::fmt;
use std::time::Duration;

/// Base period of the scheduler tick.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

pub const AWAKE_INTERVAL_MIN_SECS: u32 = 2;
pub const AWAKE_INTERVAL_MAX_SECS: u32 = 15;
pub const AWAKE_INTERVAL_DEFAULT_SECS: u32 = 5;
pub const SNOOZE_INTERVAL_MIN_SECS: u32 = 60;
pub const SNOOZE_INTERVAL_MAX_SECS: u32 = 14400;
pub const SNOOZE_INTERVAL_DEFAULT_SECS: u32 = 300;
pub const AWAKE_PUBLISH_LIMIT_MIN: u32 = 15;
pub const AWAKE_PUBLISH_LIMIT_DEFAULT: u32 = 60;

/// Rejected rate settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Awake publish interval of {0}s is outside {min}..={max}s", min = AWAKE_INTERVAL_MIN_SECS, max = AWAKE_INTERVAL_MAX_SECS)]
    AwakeIntervalOutOfRange(u32),
    #[error("Snooze publish interval of {0}s is outside {min}..={max}s", min = SNOOZE_INTERVAL_MIN_SECS, max = SNOOZE_INTERVAL_MAX_SECS)]
    SnoozeIntervalOutOfRange(u32),
    #[error("Awake publish limit of {0} is below the minimum of {min}", min = AWAKE_PUBLISH_LIMIT_MIN)]
    PublishLimitTooLow(u32),
    #[error("Snooze publish interval {snooze}s is shorter than the awake interval {awake}s")]
    SnoozeShorterThanAwake { snooze: u32, awake: u32 },
    #[error("Wake publish rate of {0}ms is outside {min}..={max}ms", min = AWAKE_INTERVAL_MIN_SECS * 1000, max = AWAKE_INTERVAL_MAX_SECS * 1000)]
    WakeRateOutOfRange(u64),
}

/// Publish cadence configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSettings {
    pub awake_interval_secs: u32,
    pub snooze_interval_secs: u32,
    pub awake_publish_limit: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            awake_interval_secs: AWAKE_INTERVAL_DEFAULT_SECS,
            snooze_interval_secs: SNOOZE_INTERVAL_DEFAULT_SECS,
            awake_publish_limit: AWAKE_PUBLISH_LIMIT_DEFAULT,
        }
    }
}

impl RateSettings {
    /// Checks every bound and the awake/snooze ordering.
    pub fn validate(&self) -> Result<(), Error> {
        if !(AWAKE_INTERVAL_MIN_SECS..=AWAKE_INTERVAL_MAX_SECS).contains(&self.awake_interval_secs)
        {
            return Err(Error::AwakeIntervalOutOfRange(self.awake_interval_secs));
        }
        if !(SNOOZE_INTERVAL_MIN_SECS..=SNOOZE_INTERVAL_MAX_SECS)
            .contains(&self.snooze_interval_secs)
        {
            return Err(Error::SnoozeIntervalOutOfRange(self.snooze_interval_secs));
        }
        if self.awake_publish_limit < AWAKE_PUBLISH_LIMIT_MIN {
            return Err(Error::PublishLimitTooLow(self.awake_publish_limit));
        }
        if self.snooze_interval_secs < self.awake_interval_secs {
            return Err(Error::SnoozeShorterThanAwake {
                snooze: self.snooze_interval_secs,
                awake: self.awake_interval_secs,
            });
        }
        Ok(())
    }

    /// Number of awake intervals per snooze interval, at least one.
    pub fn snooze_cycles(&self) -> u32 {
        (self.snooze_interval_secs / self.awake_interval_secs.max(1)).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Awake,
    Snoozing,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Awake => write!(f, "awake"),
            Mode::Snoozing => write!(f, "snoozing"),
        }
    }
}

/// Outcome of one [`SchedulerState::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Fetch and publish readings on this tick.
    pub publish: bool,
    /// Mode after the tick was evaluated.
    pub mode: Mode,
    /// Also publish the info payload.
    pub include_info: bool,
}

/// Mode, counters and rates of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    mode: Mode,
    settings: RateSettings,
    snooze_cycles: u32,
    interval_ticks: u32,
    snooze_count: u32,
    awake_publish_count: u32,
    stay_awake: bool,
    info_published: bool,
}

impl SchedulerState {
    /// Starts snoozing with the counters primed so that the first tick publishes.
    pub fn new(settings: RateSettings) -> Self {
        let snooze_cycles = settings.snooze_cycles();
        Self {
            mode: Mode::Snoozing,
            settings,
            snooze_cycles,
            interval_ticks: settings.awake_interval_secs.saturating_sub(1),
            snooze_count: snooze_cycles - 1,
            awake_publish_count: 0,
            stay_awake: false,
            info_published: false,
        }
    }

    /// Advances the scheduler by one base tick.
    pub fn tick(&mut self) -> Tick {
        self.interval_ticks += 1;
        let publish = if self.interval_ticks < self.settings.awake_interval_secs {
            false
        } else {
            self.interval_ticks = 0;
            match self.mode {
                Mode::Snoozing => {
                    self.snooze_count += 1;
                    if self.snooze_count >= self.snooze_cycles {
                        self.snooze_count = 0;
                        self.info_published = false;
                        true
                    } else {
                        false
                    }
                }
                Mode::Awake => {
                    if self.awake_publish_count >= self.settings.awake_publish_limit
                        && !self.stay_awake
                    {
                        info!(
                            "Going to snooze after {} awake publishes",
                            self.awake_publish_count
                        );
                        self.mode = Mode::Snoozing;
                        self.awake_publish_count = 0;
                        self.snooze_count = 0;
                        false
                    } else {
                        self.awake_publish_count += 1;
                        true
                    }
                }
            }
        };
        let tick = Tick {
            publish,
            mode: self.mode,
            include_info: publish && !self.info_published,
        };
        if publish {
            debug!("Tick {tick:?}");
        }
        tick
    }

    /// Forces awake mode and a publish with info on the next tick.
    pub fn wake(&mut self) {
        if self.mode == Mode::Snoozing {
            info!("Waking up");
        }
        self.mode = Mode::Awake;
        self.awake_publish_count = 0;
        self.info_published = false;
        self.interval_ticks = self.settings.awake_interval_secs.saturating_sub(1);
    }

    pub fn set_stay_awake(&mut self, stay_awake: bool) {
        self.stay_awake = stay_awake;
    }

    /// Changes the awake interval from a rate in milliseconds, rounded to seconds.
    ///
    /// Returns the new interval in seconds. Out of range rates leave the state unchanged.
    pub fn set_awake_rate_ms(&mut self, rate_ms: u64) -> Result<u32, Error> {
        let secs = rate_ms.saturating_add(500) / 1000;
        let secs = u32::try_from(secs)
            .ok()
            .filter(|secs| (AWAKE_INTERVAL_MIN_SECS..=AWAKE_INTERVAL_MAX_SECS).contains(secs))
            .ok_or(Error::WakeRateOutOfRange(rate_ms))?;
        self.settings.awake_interval_secs = secs;
        self.snooze_cycles = self.settings.snooze_cycles();
        self.snooze_count = self.snooze_count.min(self.snooze_cycles - 1);
        Ok(secs)
    }

    pub fn mark_info_published(&mut self) {
        self.info_published = true;
    }

    /// Requests the info payload again with the next publish.
    pub fn invalidate_info(&mut self) {
        self.info_published = false;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn settings(&self) -> &RateSettings {
        &self.settings
    }

    pub fn snooze_cycles(&self) -> u32 {
        self.snooze_cycles
    }

    pub fn awake_publish_count(&self) -> u32 {
        self.awake_publish_count
    }

    pub fn stay_awake(&self) -> bool {
        self.stay_awake
    }

    pub fn info_published(&self) -> bool {
        self.info_published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings(awake: u32, snooze: u32, limit: u32) -> RateSettings {
        RateSettings {
            awake_interval_secs: awake,
            snooze_interval_secs: snooze,
            awake_publish_limit: limit,
        }
    }

    /// Ticks until the next elapsed interval and returns its outcome.
    fn next_interval(state: &mut SchedulerState) -> Tick {
        for _ in 1..state.settings().awake_interval_secs {
            assert!(!state.tick().publish);
        }
        state.tick()
    }

    #[test]
    fn validate_bounds() {
        assert!(RateSettings::default().validate().is_ok());
        assert_matches!(
            settings(1, 300, 60).validate(),
            Err(Error::AwakeIntervalOutOfRange(1))
        );
        assert_matches!(
            settings(16, 300, 60).validate(),
            Err(Error::AwakeIntervalOutOfRange(16))
        );
        assert_matches!(
            settings(5, 59, 60).validate(),
            Err(Error::SnoozeIntervalOutOfRange(59))
        );
        assert_matches!(
            settings(5, 14401, 60).validate(),
            Err(Error::SnoozeIntervalOutOfRange(14401))
        );
        assert_matches!(
            settings(5, 300, 14).validate(),
            Err(Error::PublishLimitTooLow(14))
        );
        assert_eq!(settings(5, 300, 60).snooze_cycles(), 60);
        assert_eq!(settings(15, 60, 60).snooze_cycles(), 4);
    }

    #[test]
    fn first_tick_publishes_with_info() {
        let mut state = SchedulerState::new(RateSettings::default());
        let tick = state.tick();
        assert_eq!(
            tick,
            Tick {
                publish: true,
                mode: Mode::Snoozing,
                include_info: true
            }
        );
        state.mark_info_published();
        // next snooze publish is a full snooze interval away
        for _ in 0..299 {
            assert!(!state.tick().publish);
        }
        let tick = state.tick();
        assert!(tick.publish);
        assert!(tick.include_info);
    }

    #[test]
    fn identical_runs_are_deterministic() {
        let run = || {
            let mut state = SchedulerState::new(settings(2, 60, 15));
            let mut trajectory = Vec::new();
            for step in 0..500 {
                if step == 40 || step == 333 {
                    state.wake();
                }
                if step == 100 {
                    state.set_stay_awake(true);
                }
                if step == 200 {
                    state.set_stay_awake(false);
                }
                let tick = state.tick();
                if tick.include_info {
                    state.mark_info_published();
                }
                trajectory.push(tick);
            }
            trajectory
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn awake_limit_reverts_to_snoozing() {
        let mut state = SchedulerState::new(settings(2, 60, 3));
        state.tick();
        state.wake();
        // wake forces the interval to elapse on the next tick
        let tick = state.tick();
        assert!(tick.publish);
        assert_eq!(state.awake_publish_count(), 1);
        for count in 2..=3 {
            let tick = next_interval(&mut state);
            assert!(tick.publish, "publish {count}");
            assert_eq!(tick.mode, Mode::Awake);
            assert_eq!(state.awake_publish_count(), count);
        }
        let tick = next_interval(&mut state);
        assert!(!tick.publish);
        assert_eq!(tick.mode, Mode::Snoozing);
        assert_eq!(state.awake_publish_count(), 0);
    }

    #[test]
    fn stay_awake_blocks_snoozing() {
        let mut state = SchedulerState::new(settings(2, 60, 3));
        state.wake();
        state.set_stay_awake(true);
        assert!(state.tick().publish);
        for _ in 0..10 {
            let tick = next_interval(&mut state);
            assert!(tick.publish);
            assert_eq!(tick.mode, Mode::Awake);
        }
        state.set_stay_awake(false);
        let tick = next_interval(&mut state);
        assert!(!tick.publish);
        assert_eq!(tick.mode, Mode::Snoozing);
    }

    #[test]
    fn wake_while_snoozing() {
        let mut state = SchedulerState::new(RateSettings::default());
        state.tick();
        state.mark_info_published();
        state.tick();
        assert_eq!(state.mode(), Mode::Snoozing);

        state.wake();
        assert_eq!(state.mode(), Mode::Awake);
        assert_eq!(state.awake_publish_count(), 0);
        assert!(!state.info_published());
        let tick = state.tick();
        assert!(tick.publish);
        assert!(tick.include_info);
        assert_eq!(tick.mode, Mode::Awake);
    }

    #[test]
    fn wake_rate_changes() {
        let mut state = SchedulerState::new(RateSettings::default());
        assert_matches!(
            state.set_awake_rate_ms(500),
            Err(Error::WakeRateOutOfRange(500))
        );
        assert_eq!(state.settings().awake_interval_secs, 5);
        assert_matches!(state.set_awake_rate_ms(16_000), Err(_));

        assert_eq!(state.set_awake_rate_ms(10_000), Ok(10));
        assert_eq!(state.settings().awake_interval_secs, 10);
        assert_eq!(state.snooze_cycles(), 30);
        // rounds to the nearest second
        assert_eq!(state.set_awake_rate_ms(1_500), Ok(2));
        assert_eq!(state.snooze_cycles(), 150);
    }
}
