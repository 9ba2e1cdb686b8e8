//! Background side: owns the clock and the settings, serves page hosts.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::clock::{ClockState, ClockSubscription, ScheduleClock, SystemTimeSource, TimeSource};
use crate::error::{ClockError, CoreError, TransportError};
use crate::protocol::{ExtensionState, PageMessage, Request, Response};
use crate::schedule::{SolarCalculator, SunCalculator};
use crate::storage::{SettingsStore, UserSettings};

/// Push channel from the clock host to every connected page host.
pub trait PageTransport: Send + Sync {
    /// Deliver `message` to every connected page and return how many got it.
    /// Failed deliveries are not retried.
    fn broadcast(&self, message: &PageMessage) -> Result<usize, TransportError>;
}

/// In-process transport over unbounded tokio channels.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::UnboundedSender<PageMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page host; it receives every later broadcast.
    pub fn connect(&self) -> mpsc::UnboundedReceiver<PageMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn connected(&self) -> usize {
        let mut senders = self.lock();
        senders.retain(|s| !s.is_closed());
        senders.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<PageMessage>>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageTransport for ChannelTransport {
    fn broadcast(&self, message: &PageMessage) -> Result<usize, TransportError> {
        let mut senders = self.lock();
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(senders.len())
    }
}

/// Calm-state message for the given settings and clock state. The master
/// switch masks the clock.
fn state_message(settings: &UserSettings, state: &ClockState) -> PageMessage {
    PageMessage::CalmStateChanged {
        calm_active: settings.enabled && state.calm_active,
        overrides_by_domain: settings.domain_overrides.clone(),
        enabled_rule_ids: settings.enabled_rule_ids.clone(),
    }
}

fn broadcast(transport: &dyn PageTransport, message: &PageMessage) {
    match transport.broadcast(message) {
        Ok(delivered) => tracing::debug!(delivered, "calm state broadcast"),
        Err(e) => tracing::warn!(error = %e, "calm state broadcast failed"),
    }
}

fn lock_settings(settings: &Mutex<UserSettings>) -> MutexGuard<'_, UserSettings> {
    settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the [`ScheduleClock`] and the user's settings and answers
/// [`Request`]s from page hosts and settings surfaces.
///
/// Every calm flip and every settings change that pages act on is pushed
/// to all pages through the [`PageTransport`].
pub struct ClockHost {
    clock: ScheduleClock,
    settings: Arc<Mutex<UserSettings>>,
    store: Arc<dyn SettingsStore>,
    transport: Arc<dyn PageTransport>,
    _flips: ClockSubscription,
}

impl ClockHost {
    /// Host on wall-clock time with the built-in solar calculator.
    pub fn new(store: Arc<dyn SettingsStore>, transport: Arc<dyn PageTransport>) -> Self {
        Self::with_sources(
            store,
            transport,
            Arc::new(SystemTimeSource),
            Arc::new(SolarCalculator),
        )
    }

    pub fn with_sources(
        store: Arc<dyn SettingsStore>,
        transport: Arc<dyn PageTransport>,
        time: Arc<dyn TimeSource>,
        sun: Arc<dyn SunCalculator>,
    ) -> Self {
        let settings = store.load_or_default();
        if let Err(e) = settings.validate() {
            tracing::warn!(error = %e, "stored settings are invalid; calm mode may stay off");
        }
        let clock = ScheduleClock::with_sources(settings.schedule.clone(), time, sun);
        let settings = Arc::new(Mutex::new(settings));

        let listener_settings = Arc::clone(&settings);
        let listener_transport = Arc::clone(&transport);
        let flips = clock.on_state_change(move |state| {
            let message = {
                let settings = lock_settings(&listener_settings);
                if !settings.enabled {
                    return;
                }
                state_message(&settings, state)
            };
            broadcast(listener_transport.as_ref(), &message);
        });

        Self {
            clock,
            settings,
            store,
            transport,
            _flips: flips,
        }
    }

    /// Start the clock's wake-up loop.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> Result<(), ClockError> {
        self.clock.start()
    }

    pub fn stop(&self) {
        self.clock.stop();
    }

    pub fn clock(&self) -> &ScheduleClock {
        &self.clock
    }

    pub fn settings(&self) -> UserSettings {
        lock_settings(&self.settings).clone()
    }

    /// Calm state after applying the master switch.
    pub fn calm_active(&self) -> bool {
        lock_settings(&self.settings).enabled && self.clock.state().calm_active
    }

    /// Answer one request.
    pub fn handle(&self, request: Request) -> Response {
        tracing::trace!(?request, "request received");
        match request {
            Request::GetCalmState { domain } => {
                let settings = self.settings();
                Response::CalmState {
                    calm_active: self.calm_active(),
                    domain_override: domain
                        .as_deref()
                        .and_then(|d| settings.override_for(d))
                        .cloned(),
                    current_time: self.clock.now(),
                    enabled_rule_ids: settings.enabled_rule_ids,
                }
            }
            Request::UpdateSchedule { schedule } => {
                if let Err(e) = schedule.validate() {
                    return Response::error(e.to_string());
                }
                let committed = self.commit(|s| {
                    s.schedule = schedule.clone();
                    Ok(())
                });
                match committed {
                    Ok(()) => {
                        self.clock.update_schedule(schedule);
                        Response::ok()
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::SetEnabled { enabled } => {
                match self.commit(|s| {
                    s.enabled = enabled;
                    Ok(())
                }) {
                    Ok(()) => {
                        tracing::info!(enabled, "master switch changed");
                        self.push_state();
                        Response::ok()
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::ToggleRule { rule_id } => {
                match self.commit(|s| s.toggle_rule(&rule_id).map_err(CoreError::from)) {
                    Ok(enabled) => {
                        self.push_state();
                        Response::RuleToggled { rule_id, enabled }
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::ToggleSiteOverride { domain } => {
                match self.commit(|s| Ok(s.toggle_site_override(&domain))) {
                    Ok(overridden) => {
                        self.push_state();
                        Response::SiteOverrideToggled { domain, overridden }
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::GetExtensionState { domain } => {
                Response::ExtensionState(self.extension_state(domain))
            }
        }
    }

    pub fn extension_state(&self, domain: Option<String>) -> ExtensionState {
        let settings = self.settings();
        let state = self.clock.state();
        ExtensionState {
            enabled: settings.enabled,
            calm_active: settings.enabled && state.calm_active,
            schedule: state.schedule,
            current_time: self.clock.now(),
            next_transition_at: state.next_transition_at,
            domain_override: domain
                .as_deref()
                .and_then(|d| settings.override_for(d))
                .cloned(),
            domain,
            enabled_rule_ids: settings.enabled_rule_ids,
        }
    }

    /// Push the current state to every page.
    pub fn push_state(&self) {
        let message = state_message(&self.settings(), &self.clock.state());
        broadcast(self.transport.as_ref(), &message);
    }

    /// Apply `change` to a copy of the settings, persist it, then publish it.
    /// Nothing changes when `change` or the save fails.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut UserSettings) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut settings = lock_settings(&self.settings);
        let mut updated = settings.clone();
        let value = change(&mut updated)?;
        self.store.save(&updated)?;
        *settings = updated;
        Ok(value)
    }
}

impl Drop for ClockHost {
    fn drop(&mut self) {
        self.clock.stop();
    }
}
