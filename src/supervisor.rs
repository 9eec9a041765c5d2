//! The periodic loop tying the scheduler to the data source and the publisher.
//!
//! A [`Ticker`] paces the loop at [`TICK_PERIOD`], compensating for drift. Each
//! tick asks the shared [`SchedulerState`] whether to publish; if so the data
//! source is read and the result handed to the [`Publisher`]. Inbound commands
//! arrive on another thread through [`CommandHandler`], which mutates the same
//! state. The loop ends on a stop request or when either error ceiling is hit.

use crate::command::Command;
use crate::publisher::{Publisher, Transport};
use crate::scheduler::{Mode, SchedulerState, TICK_PERIOD};
use crate::tokio_sync_client::{Connector, DataSource};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Consecutive fetch failures that end the loop.
pub const MODBUS_MAX_ERROR_COUNT: u32 = 300;
/// Consecutive publish failures that end the loop. While the broker is
/// unreachable one error is counted per awake interval.
pub const MQTT_MAX_ERROR_COUNT: u32 = 300;
/// Sleep granularity while waiting for the next tick.
pub const WAIT_STEP: Duration = Duration::from_millis(100);

pub type SharedState = Arc<Mutex<SchedulerState>>;

/// Locks the scheduler state, ignoring poisoning.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// STOP command or Ctrl-C.
    Stopped,
    ModbusErrors,
    MqttErrors,
}

/// Applies inbound control messages to the scheduler.
#[derive(Clone)]
pub struct CommandHandler {
    state: SharedState,
    stop: Arc<AtomicBool>,
}

impl CommandHandler {
    pub fn new(state: SharedState, stop: Arc<AtomicBool>) -> Self {
        Self { state, stop }
    }

    pub fn handle(&self, payload: &[u8]) -> Command {
        let command = Command::parse(payload);
        match &command {
            Command::Wake | Command::Info => {
                info!("Received {command:?}");
                lock_state(&self.state).wake();
            }
            Command::Stop => {
                info!("Received STOP");
                self.stop.store(true, Ordering::SeqCst);
            }
            Command::SetStayAwake(stay_awake) => {
                info!("Setting stayAwake to {stay_awake}");
                lock_state(&self.state).set_stay_awake(*stay_awake);
            }
            Command::SetWakeRate(rate_ms) => {
                match lock_state(&self.state).set_awake_rate_ms(*rate_ms) {
                    Ok(secs) => info!("Awake publish interval set to {secs}s"),
                    Err(err) => error!("{err}"),
                }
            }
            Command::Unknown(payload) => warn!("Unrecognized command: {payload}"),
        }
        command
    }
}

/// Next deadline after `previous`; re-based on `now` when the tick overran.
pub fn next_deadline(previous: Instant, period: Duration, now: Instant) -> Instant {
    let next = previous + period;
    if next < now {
        now
    } else {
        next
    }
}

/// Drift compensated fixed-rate ticker.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// The first tick fires immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Blocks until the next deadline. Returns `false` as soon as `stop` is raised.
    pub fn wait(&mut self, stop: &AtomicBool) -> bool {
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= self.next {
                self.next = next_deadline(self.next, self.period, now);
                return true;
            }
            std::thread::sleep(WAIT_STEP.min(self.next - now));
        }
    }
}

pub struct Supervisor<C: Connector, T: Transport> {
    state: SharedState,
    source: DataSource<C>,
    publisher: Publisher<T>,
    stop: Arc<AtomicBool>,
    modbus_errors: u32,
    mqtt_errors: u32,
    disconnected_ticks: u32,
}

impl<C: Connector, T: Transport> Supervisor<C, T> {
    pub fn new(
        state: SharedState,
        source: DataSource<C>,
        publisher: Publisher<T>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            source,
            publisher,
            stop,
            modbus_errors: 0,
            mqtt_errors: 0,
            disconnected_ticks: 0,
        }
    }

    pub fn modbus_errors(&self) -> u32 {
        self.modbus_errors
    }

    pub fn mqtt_errors(&self) -> u32 {
        self.mqtt_errors
    }

    /// Runs one tick. Returns a reason when the loop has to end.
    pub fn step(&mut self) -> Option<ShutdownReason> {
        if !self.publisher.is_connected() {
            self.disconnected_ticks += 1;
            let interval = lock_state(&self.state).settings().awake_interval_secs;
            if self.disconnected_ticks >= interval {
                self.disconnected_ticks = 0;
                self.mqtt_errors += 1;
                warn!("MQTT not connected, skipping ({} errors)", self.mqtt_errors);
            }
            return self.check_error_ceilings();
        }
        self.disconnected_ticks = 0;

        let tick = lock_state(&self.state).tick();
        if !tick.publish {
            // the tick entering snooze does not fetch
            if tick.mode == Mode::Snoozing {
                self.source.disconnect();
            }
            return None;
        }

        match self.source.fetch(tick.mode) {
            Ok(reading) => {
                self.modbus_errors = 0;
                let report = self.publisher.publish(&reading, tick.include_info);
                if report.info_sent {
                    lock_state(&self.state).mark_info_published();
                }
                if report.failures == 0 {
                    self.mqtt_errors = 0;
                } else {
                    self.mqtt_errors += report.failures;
                }
            }
            Err(err) => {
                self.modbus_errors += 1;
                error!(
                    "MODBUS fetch failed ({} errors): {err}",
                    self.modbus_errors
                );
            }
        }
        self.check_error_ceilings()
    }

    fn check_error_ceilings(&self) -> Option<ShutdownReason> {
        if self.modbus_errors >= MODBUS_MAX_ERROR_COUNT {
            error!("Too many MODBUS errors ({}), stopping", self.modbus_errors);
            return Some(ShutdownReason::ModbusErrors);
        }
        if self.mqtt_errors >= MQTT_MAX_ERROR_COUNT {
            error!("Too many MQTT errors ({}), stopping", self.mqtt_errors);
            return Some(ShutdownReason::MqttErrors);
        }
        None
    }

    /// Ticks until stopped or an error ceiling is reached.
    pub fn run(&mut self) -> ShutdownReason {
        let mut ticker = Ticker::new(TICK_PERIOD);
        loop {
            if !ticker.wait(&self.stop) {
                debug!("Stop requested");
                return ShutdownReason::Stopped;
            }
            if let Some(reason) = self.step() {
                return reason;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::tests::FakeTransport;
    use crate::publisher::Topics;
    use crate::scheduler::RateSettings;
    use crate::tokio_sync_client::tests::{FakeConnector, FakeDevice};

    struct Fixture {
        supervisor: Supervisor<FakeConnector, FakeTransport>,
        state: SharedState,
        transport: FakeTransport,
        device: Arc<Mutex<FakeDevice>>,
        stop: Arc<AtomicBool>,
    }

    fn fixture(device: FakeDevice, settings: RateSettings) -> Fixture {
        let state = Arc::new(Mutex::new(SchedulerState::new(settings)));
        let device = Arc::new(Mutex::new(device));
        let transport = FakeTransport::default();
        let stop = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor::new(
            state.clone(),
            DataSource::new(FakeConnector(device.clone()), "10.0.0.2"),
            Publisher::new(transport.clone(), Topics::new("ClassicMQTT", "classic")),
            stop.clone(),
        );
        Fixture {
            supervisor,
            state,
            transport,
            device,
            stop,
        }
    }

    fn fast_settings() -> RateSettings {
        RateSettings {
            awake_interval_secs: 2,
            snooze_interval_secs: 60,
            awake_publish_limit: 15,
        }
    }

    #[test]
    fn deadlines() {
        let start = Instant::now();
        let period = Duration::from_secs(1);
        assert_eq!(
            next_deadline(start, period, start + Duration::from_millis(20)),
            start + period
        );
        let late = start + Duration::from_millis(2500);
        assert_eq!(next_deadline(start, period, late), late);
    }

    #[test]
    fn ticker_observes_stop() {
        let stop = AtomicBool::new(false);
        let mut ticker = Ticker::new(Duration::from_secs(3600));
        assert!(ticker.wait(&stop));
        stop.store(true, Ordering::SeqCst);
        assert!(!ticker.wait(&stop));
    }

    #[test]
    fn commands_mutate_state() {
        let state = Arc::new(Mutex::new(SchedulerState::new(RateSettings::default())));
        let stop = Arc::new(AtomicBool::new(false));
        let handler = CommandHandler::new(state.clone(), stop.clone());

        assert_eq!(handler.handle(br#"{"wake"}"#), Command::Wake);
        assert_eq!(lock_state(&state).mode(), Mode::Awake);

        handler.handle(br#"{"stayAwake":true}"#);
        assert!(lock_state(&state).stay_awake());

        handler.handle(br#"{"wakePublishRate":500}"#);
        assert_eq!(lock_state(&state).settings().awake_interval_secs, 5);
        handler.handle(br#"{"wakePublishRate":10000}"#);
        assert_eq!(lock_state(&state).settings().awake_interval_secs, 10);

        handler.handle(b"bogus");
        assert!(!stop.load(Ordering::SeqCst));
        handler.handle(b"STOP");
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn first_tick_publishes_info_and_readings() {
        let mut device = FakeDevice::zeroed();
        device.blocks.get_mut(&4100).unwrap()[14] = 134;
        let mut fx = fixture(device, RateSettings::default());

        assert_eq!(fx.supervisor.step(), None);
        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "ClassicMQTT/classic/stat/info");
        assert!(sent[0].1.contains(r#""IP":"10.0.0.2""#));
        assert_eq!(sent[1].0, "ClassicMQTT/classic/stat/readings");
        assert!(sent[1].1.contains(r#""BatVoltage":13.4"#));
        assert!(lock_state(&fx.state).info_published());
        // snoozing drops the connection after the fetch
        assert_eq!(fx.device.lock().unwrap().connects, 1);
        fx.supervisor.step();
        assert_eq!(fx.transport.sent().len(), 2);
    }

    #[test]
    fn wake_publishes_info_again() {
        let mut fx = fixture(FakeDevice::zeroed(), fast_settings());
        fx.supervisor.step();
        CommandHandler::new(fx.state.clone(), fx.stop.clone()).handle(br#"{"INFO"}"#);
        fx.supervisor.step();
        let topics: Vec<_> = fx.transport.sent().into_iter().map(|s| s.0).collect();
        assert_eq!(
            topics,
            [
                "ClassicMQTT/classic/stat/info",
                "ClassicMQTT/classic/stat/readings",
                "ClassicMQTT/classic/stat/info",
                "ClassicMQTT/classic/stat/readings",
            ]
        );
        fx.supervisor.step();
        fx.supervisor.step();
        assert_eq!(fx.transport.sent().len(), 5);
    }

    #[test]
    fn disconnected_ticks_are_skipped_and_counted() {
        let mut fx = fixture(FakeDevice::zeroed(), RateSettings::default());
        fx.transport.offline.store(true, Ordering::SeqCst);
        // one error per 5s awake interval
        for _ in 0..5 {
            assert_eq!(fx.supervisor.step(), None);
        }
        assert_eq!(fx.supervisor.mqtt_errors(), 1);
        for _ in 6..(MQTT_MAX_ERROR_COUNT * 5) {
            assert_eq!(fx.supervisor.step(), None);
        }
        assert_eq!(fx.supervisor.step(), Some(ShutdownReason::MqttErrors));
        assert!(fx.device.lock().unwrap().reads.is_empty());

        // the skipped ticks did not consume the first publish
        fx.transport.offline.store(false, Ordering::SeqCst);
        assert_eq!(fx.supervisor.step(), None);
        assert_eq!(fx.supervisor.mqtt_errors(), 0);
        assert_eq!(fx.transport.sent().len(), 2);
    }

    #[test]
    fn publish_failures_count_and_keep_info_pending() {
        let mut fx = fixture(FakeDevice::zeroed(), fast_settings());
        lock_state(&fx.state).wake();
        fx.transport.failing.store(true, Ordering::SeqCst);
        assert_eq!(fx.supervisor.step(), None);
        assert_eq!(fx.supervisor.mqtt_errors(), 2);
        assert!(!lock_state(&fx.state).info_published());

        fx.transport.failing.store(false, Ordering::SeqCst);
        fx.supervisor.step();
        fx.supervisor.step();
        let topics: Vec<_> = fx.transport.sent().into_iter().map(|s| s.0).collect();
        assert_eq!(
            topics,
            [
                "ClassicMQTT/classic/stat/info",
                "ClassicMQTT/classic/stat/readings",
            ]
        );
        assert_eq!(fx.supervisor.mqtt_errors(), 0);
        assert!(lock_state(&fx.state).info_published());
    }

    #[test]
    fn entering_snooze_drops_modbus_connection() {
        let mut fx = fixture(FakeDevice::zeroed(), fast_settings());
        lock_state(&fx.state).wake();
        fx.supervisor.step();
        assert!(fx.supervisor.source.is_connected());

        let mut ticks = 0;
        while lock_state(&fx.state).mode() == Mode::Awake {
            assert!(fx.supervisor.source.is_connected());
            fx.supervisor.step();
            ticks += 1;
            assert!(ticks < 100);
        }
        assert!(!fx.supervisor.source.is_connected());
        assert_eq!(fx.device.lock().unwrap().connects, 1);

        // the next snooze publish reconnects and probes
        for _ in 0..60 {
            fx.supervisor.step();
        }
        let device = fx.device.lock().unwrap();
        assert_eq!(device.connects, 2);
        assert!(!fx.supervisor.source.is_connected());
    }

    #[test]
    fn modbus_error_ceiling() {
        let mut device = FakeDevice::zeroed();
        device.refuse_connect = true;
        let mut fx = fixture(device, fast_settings());
        {
            let mut state = lock_state(&fx.state);
            state.wake();
            state.set_stay_awake(true);
        }
        let mut reason = None;
        for _ in 0..(MODBUS_MAX_ERROR_COUNT * 2) {
            reason = fx.supervisor.step();
            if reason.is_some() {
                break;
            }
        }
        assert_eq!(reason, Some(ShutdownReason::ModbusErrors));
        assert_eq!(fx.supervisor.modbus_errors(), MODBUS_MAX_ERROR_COUNT);

        fx.device.lock().unwrap().refuse_connect = false;
        fx.supervisor.step();
        fx.supervisor.step();
        assert_eq!(fx.supervisor.modbus_errors(), 0);
    }

    #[test]
    fn run_returns_when_stopped() {
        let mut fx = fixture(FakeDevice::zeroed(), RateSettings::default());
        fx.stop.store(true, Ordering::SeqCst);
        assert_eq!(fx.supervisor.run(), ShutdownReason::Stopped);
        assert!(fx.transport.sent().is_empty());
    }
}
