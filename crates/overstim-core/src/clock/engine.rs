//! Schedule clock implementation.
//!
//! The clock recomputes its state at construction, on `start()`, on
//! `update_schedule()`, and at each self-scheduled wake-up. Recomputation is
//! synchronous; the only suspension point is the wake-up timer, a tokio task
//! that `stop()` aborts.
//!
//! ## Usage
//!
//! ```ignore
//! let clock = ScheduleClock::new(ScheduleConfig::default());
//! let _sub = clock.on_state_change(|state| println!("calm: {}", state.calm_active));
//! clock.start()?; // inside a tokio runtime
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::time_source::{SystemTimeSource, TimeSource};
use crate::error::ClockError;
use crate::fault;
use crate::schedule::{evaluate, ScheduleConfig, SolarCalculator, SunCalculator};

/// Wake-up interval when no transition can be computed.
pub const SAFETY_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How far ahead of a transition the clock wakes up.
pub const WAKEUP_BUFFER: Duration = Duration::from_millis(100);

/// Snapshot of the clock. Listeners and callers get independent copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    pub current_time: DateTime<Utc>,
    pub calm_active: bool,
    pub next_transition_at: Option<DateTime<Utc>>,
    pub schedule: ScheduleConfig,
    /// Number of flips so far; a snapshot with a lower count is stale.
    #[serde(default)]
    pub flip_count: u64,
}

type Listener = Arc<dyn Fn(&ClockState) + Send + Sync>;

struct ClockInner {
    state: ClockState,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    running: bool,
    wakeup: Option<JoinHandle<()>>,
}

struct ClockShared {
    inner: Mutex<ClockInner>,
    time: Arc<dyn TimeSource>,
    sun: Arc<dyn SunCalculator>,
}

impl ClockShared {
    fn lock(&self) -> MutexGuard<'_, ClockInner> {
        // A listener never runs under this lock, so a poisoned lock still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Calm-state clock with self-scheduled recomputation.
///
/// Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct ScheduleClock {
    shared: Arc<ClockShared>,
}

impl std::fmt::Debug for ScheduleClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleClock")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle returned by [`ScheduleClock::on_state_change`].
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) removes the
/// listener.
#[must_use = "dropping the subscription removes the listener"]
pub struct ClockSubscription {
    shared: Weak<ClockShared>,
    id: u64,
}

impl ClockSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ClockSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl ScheduleClock {
    /// Clock on wall-clock time with the built-in solar calculator.
    pub fn new(schedule: ScheduleConfig) -> Self {
        Self::with_sources(schedule, Arc::new(SystemTimeSource), Arc::new(SolarCalculator))
    }

    pub fn with_sources(
        schedule: ScheduleConfig,
        time: Arc<dyn TimeSource>,
        sun: Arc<dyn SunCalculator>,
    ) -> Self {
        let now = time.now();
        let eval = evaluate(&schedule, sun.as_ref(), now);
        let state = ClockState {
            current_time: now,
            calm_active: eval.calm_active,
            next_transition_at: eval.next_transition_at,
            schedule,
            flip_count: 0,
        };
        Self {
            shared: Arc::new(ClockShared {
                inner: Mutex::new(ClockInner {
                    state,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    running: false,
                    wakeup: None,
                }),
                time,
                sun,
            }),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ClockState {
        self.shared.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Current time from the clock's time source.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.time.now()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin the self-scheduling loop. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NoRuntime`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), ClockError> {
        Handle::try_current().map_err(|_| ClockError::NoRuntime)?;
        {
            let mut inner = self.shared.lock();
            if inner.running {
                return Ok(());
            }
            inner.running = true;
        }
        tracing::debug!("schedule clock started");
        recompute(&self.shared);
        Ok(())
    }

    /// Cancel any pending wake-up. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if let Some(handle) = inner.wakeup.take() {
            handle.abort();
        }
        if inner.running {
            inner.running = false;
            tracing::debug!("schedule clock stopped");
        }
    }

    /// Replace the schedule and recompute immediately.
    pub fn update_schedule(&self, schedule: ScheduleConfig) {
        tracing::info!(kind = schedule.kind(), "schedule replaced");
        self.shared.lock().state.schedule = schedule;
        recompute(&self.shared);
    }

    /// Force a recomputation now, as a wake-up would.
    pub fn refresh(&self) {
        recompute(&self.shared);
    }

    /// Register a listener invoked each time `calm_active` flips.
    pub fn on_state_change<F>(&self, listener: F) -> ClockSubscription
    where
        F: Fn(&ClockState) + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        ClockSubscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }
}

fn recompute(shared: &Arc<ClockShared>) {
    let (snapshot, flipped, to_notify, running) = {
        let mut inner = shared.lock();
        let now = shared.time.now();
        let eval = evaluate(&inner.state.schedule, shared.sun.as_ref(), now);
        let flipped = eval.calm_active != inner.state.calm_active;
        inner.state.current_time = now;
        inner.state.calm_active = eval.calm_active;
        inner.state.next_transition_at = eval.next_transition_at;
        if flipped {
            inner.state.flip_count += 1;
        }
        let to_notify: Vec<Listener> = if flipped {
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        } else {
            Vec::new()
        };
        (inner.state.clone(), flipped, to_notify, inner.running)
    };

    tracing::trace!(
        calm_active = snapshot.calm_active,
        next = ?snapshot.next_transition_at,
        "clock recomputed"
    );
    if flipped {
        tracing::info!(calm_active = snapshot.calm_active, "calm state changed");
    }
    for listener in to_notify {
        // A later recomputation flipped again and delivers its own snapshot.
        if shared.lock().state.flip_count != snapshot.flip_count {
            tracing::debug!(flip = snapshot.flip_count, "stale calm state not delivered");
            break;
        }
        if let Err(message) = fault::guard(|| listener(&snapshot)) {
            tracing::error!(%message, "calm state listener panicked");
        }
    }

    if running {
        schedule_wakeup(
            shared,
            wakeup_delay(snapshot.next_transition_at, snapshot.current_time),
        );
    }
}

/// Delay until the next recomputation.
///
/// Wakes `WAKEUP_BUFFER` early; once inside the buffer it sleeps the exact
/// remainder so the follow-up wake lands on the transition instead of
/// spinning. A transition already in the past yields zero.
pub(crate) fn wakeup_delay(next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let Some(at) = next else {
        return SAFETY_POLL_INTERVAL;
    };
    let remaining = (at - now).to_std().unwrap_or(Duration::ZERO);
    if remaining > WAKEUP_BUFFER {
        remaining - WAKEUP_BUFFER
    } else {
        remaining
    }
}

fn schedule_wakeup(shared: &Arc<ClockShared>, delay: Duration) {
    let Ok(runtime) = Handle::try_current() else {
        tracing::error!("no tokio runtime; clock wake-up not scheduled");
        return;
    };
    let weak = Arc::downgrade(shared);
    let mut inner = shared.lock();
    if !inner.running {
        return;
    }
    if let Some(previous) = inner.wakeup.take() {
        previous.abort();
    }
    tracing::trace!(?delay, "clock wake-up scheduled");
    inner.wakeup = Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(shared) = weak.upgrade() {
            recompute(&shared);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Time source the test moves by hand.
    struct ManualTime(Mutex<DateTime<Utc>>);

    impl ManualTime {
        fn at(hh: u32, mm: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                Utc.with_ymd_and_hms(2024, 3, 14, hh, mm, 0).unwrap(),
            )))
        }

        fn set(&self, hh: u32, mm: u32) {
            *self.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 14, hh, mm, 0).unwrap();
        }
    }

    impl TimeSource for ManualTime {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    /// Time source that follows tokio's (pausable) clock from a fixed origin.
    struct TokioTime {
        origin: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl TimeSource for TokioTime {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = tokio::time::Instant::now() - self.started;
            self.origin + chrono::Duration::from_std(elapsed).unwrap()
        }
    }

    fn overnight() -> ScheduleConfig {
        ScheduleConfig::fixed_in("22:00", "07:00", "UTC")
    }

    fn clock_at(time: Arc<ManualTime>) -> ScheduleClock {
        ScheduleClock::with_sources(overnight(), time, Arc::new(SolarCalculator))
    }

    #[test]
    fn initial_state_reflects_schedule() {
        let clock = clock_at(ManualTime::at(23, 0));
        let state = clock.state();
        assert!(state.calm_active);
        assert_eq!(
            state.next_transition_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 7, 0, 0).unwrap())
        );
        assert!(!clock.is_running());
    }

    #[test]
    fn listeners_fire_only_on_flips() {
        let time = ManualTime::at(12, 0);
        let clock = clock_at(time.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let _sub = clock.on_state_change(move |s| sink.lock().unwrap().push(s.calm_active));

        clock.refresh();
        time.set(21, 59);
        clock.refresh();
        time.set(22, 0);
        clock.refresh();
        time.set(23, 0);
        clock.refresh();

        assert_eq!(*calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn stale_flips_are_not_delivered_after_newer_ones() {
        let time = ManualTime::at(12, 0);
        let clock = clock_at(time.clone());
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let handle = clock.clone();
        let rewind = time.clone();
        let sink = first.clone();
        let _a = clock.on_state_change(move |s| {
            sink.lock().unwrap().push(s.calm_active);
            if s.calm_active {
                rewind.set(12, 0);
                handle.refresh();
            }
        });
        let sink = second.clone();
        let _b = clock.on_state_change(move |s| sink.lock().unwrap().push(s.calm_active));

        time.set(22, 30);
        clock.refresh();

        assert_eq!(*first.lock().unwrap(), vec![true, false]);
        assert_eq!(*second.lock().unwrap(), vec![false]);
        let state = clock.state();
        assert!(!state.calm_active);
        assert_eq!(state.flip_count, 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let time = ManualTime::at(12, 0);
        let clock = clock_at(time.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let _bad = clock.on_state_change(|_| panic!("boom"));
        let _good = clock.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time.set(22, 30);
        clock.refresh();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(clock.state().calm_active);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let time = ManualTime::at(12, 0);
        let clock = clock_at(time.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = clock.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();

        time.set(23, 0);
        clock.refresh();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_schedule_recomputes_immediately() {
        let clock = clock_at(ManualTime::at(13, 30));
        assert!(!clock.state().calm_active);

        let flips = Arc::new(AtomicUsize::new(0));
        let counter = flips.clone();
        let _sub = clock.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        clock.update_schedule(ScheduleConfig::fixed_in("13:00", "14:00", "UTC"));
        let state = clock.state();
        assert!(state.calm_active);
        assert_eq!(state.schedule, ScheduleConfig::fixed_in("13:00", "14:00", "UTC"));
        assert_eq!(flips.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_is_an_independent_snapshot() {
        let clock = clock_at(ManualTime::at(12, 0));
        let mut snapshot = clock.state();
        snapshot.calm_active = true;
        snapshot.schedule = ScheduleConfig::fixed("01:00", "02:00");
        assert!(!clock.state().calm_active);
        assert_eq!(clock.state().schedule, overnight());
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let clock = clock_at(ManualTime::at(12, 0));
        assert_eq!(clock.start(), Err(ClockError::NoRuntime));
        assert!(!clock.is_running());
    }

    #[test]
    fn wakeup_delay_policy() {
        let now = Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap();
        assert_eq!(wakeup_delay(None, now), SAFETY_POLL_INTERVAL);
        assert_eq!(
            wakeup_delay(Some(now + chrono::Duration::seconds(10)), now),
            Duration::from_millis(9_900)
        );
        assert_eq!(
            wakeup_delay(Some(now + chrono::Duration::milliseconds(80)), now),
            Duration::from_millis(80)
        );
        assert_eq!(
            wakeup_delay(Some(now - chrono::Duration::seconds(5)), now),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_itself_at_the_transition() {
        let time = Arc::new(TokioTime {
            origin: Utc.with_ymd_and_hms(2024, 3, 14, 21, 59, 30).unwrap(),
            started: tokio::time::Instant::now(),
        });
        let clock = ScheduleClock::with_sources(overnight(), time, Arc::new(SolarCalculator));
        let flips = Arc::new(Mutex::new(Vec::new()));
        let sink = flips.clone();
        let _sub = clock.on_state_change(move |s| sink.lock().unwrap().push(s.current_time));

        clock.start().unwrap();
        clock.start().unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(flips.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let flips = flips.lock().unwrap().clone();
        assert_eq!(flips.len(), 1);
        let transition = Utc.with_ymd_and_hms(2024, 3, 14, 22, 0, 0).unwrap();
        assert!(flips[0] >= transition);
        assert!(flips[0] - transition < chrono::Duration::seconds(1));
        assert!(clock.state().calm_active);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_wakeup() {
        let time = Arc::new(TokioTime {
            origin: Utc.with_ymd_and_hms(2024, 3, 14, 21, 59, 0).unwrap(),
            started: tokio::time::Instant::now(),
        });
        let clock = ScheduleClock::with_sources(overnight(), time, Arc::new(SolarCalculator));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = clock.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        clock.start().unwrap();
        clock.stop();
        clock.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!clock.state().calm_active, "no recomputation after stop");
    }
}
