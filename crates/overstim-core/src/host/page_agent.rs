//! Page side: one agent per page context.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::ClockHost;
use crate::error::TransportError;
use crate::page::{GestureTracker, Page};
use crate::protocol::{PageMessage, Request, Response};
use crate::rules::{builtin_rules, build_rule_context, CalmSnapshot, Rule, RuleRegistry};

/// Attempts made to fetch calm state before falling back to inactive.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Pause between fetch attempts.
pub const FETCH_BACKOFF: Duration = Duration::from_millis(50);

/// Request channel from a page host to the clock host.
#[async_trait(?Send)]
pub trait ClockClient {
    async fn request(&self, request: Request) -> Result<Response, TransportError>;
}

/// Client calling a [`ClockHost`] in the same process.
#[derive(Clone)]
pub struct LocalClockClient {
    host: Arc<ClockHost>,
}

impl LocalClockClient {
    pub fn new(host: Arc<ClockHost>) -> Self {
        Self { host }
    }
}

#[async_trait(?Send)]
impl ClockClient for LocalClockClient {
    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        Ok(self.host.handle(request))
    }
}

/// Runs the rules of one page against calm state from the clock host.
pub struct PageAgent<C> {
    page: Rc<dyn Page>,
    client: C,
    gestures: Rc<GestureTracker>,
    registry: RefCell<RuleRegistry>,
    last_url: RefCell<String>,
    torn_down: Cell<bool>,
}

impl<C: ClockClient> PageAgent<C> {
    /// Agent with the four built-in rules.
    pub fn new(page: Rc<dyn Page>, client: C) -> Self {
        Self::with_rules(page, client, builtin_rules)
    }

    /// Agent with a custom rule set built around the page's gesture tracker.
    pub fn with_rules<F>(page: Rc<dyn Page>, client: C, rules: F) -> Self
    where
        F: FnOnce(&Rc<GestureTracker>) -> Vec<Rc<dyn Rule>>,
    {
        let gestures = GestureTracker::attach(&page);
        let mut registry = RuleRegistry::new();
        for rule in rules(&gestures) {
            registry.register(rule);
        }
        let last_url = page.location().to_string();
        Self {
            page,
            client,
            gestures,
            registry: RefCell::new(registry),
            last_url: RefCell::new(last_url),
            torn_down: Cell::new(false),
        }
    }

    pub fn gestures(&self) -> &Rc<GestureTracker> {
        &self.gestures
    }

    /// Applied rule ids in application order.
    pub fn applied_rule_ids(&self) -> Vec<String> {
        self.registry
            .borrow()
            .applied_rule_ids()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// First evaluation after the page loads.
    pub async fn initialize(&self) {
        let snapshot = self.fetch_snapshot().await;
        self.with_registry(|registry, page| {
            registry.apply_rules(&build_rule_context(page, &snapshot, Utc::now()));
        });
    }

    /// Fetch fresh state and reapply.
    pub async fn refresh(&self) {
        let snapshot = self.fetch_snapshot().await;
        self.reapply(&snapshot);
    }

    /// React to a pushed message.
    pub fn handle_message(&self, message: &PageMessage) {
        let domain = self.page.location().host_str().unwrap_or_default().to_string();
        self.reapply(&message.snapshot_for(&domain));
    }

    /// Call after the page's location may have changed; refreshes when it did.
    pub async fn on_navigation(&self) {
        let current = self.page.location().to_string();
        if *self.last_url.borrow() == current {
            return;
        }
        tracing::debug!(url = %current, "page navigated");
        *self.last_url.borrow_mut() = current;
        self.refresh().await;
    }

    /// Call when the page becomes visible or hidden.
    pub async fn on_visibility_change(&self, visible: bool) {
        if visible {
            self.refresh().await;
        }
    }

    /// Stop listening to the page, then revert and drop every rule.
    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.gestures.dispose();
        self.registry.borrow_mut().teardown();
        tracing::debug!("page agent torn down");
    }

    fn reapply(&self, snapshot: &CalmSnapshot) {
        self.with_registry(|registry, page| {
            registry.reapply(&build_rule_context(page, snapshot, Utc::now()));
        });
    }

    fn with_registry(&self, f: impl FnOnce(&mut RuleRegistry, &Rc<dyn Page>)) {
        if self.torn_down.get() {
            return;
        }
        f(&mut self.registry.borrow_mut(), &self.page);
    }

    /// Calm state for this page, retried a bounded number of times, falling
    /// back to "inactive" when the clock host stays unreachable.
    async fn fetch_snapshot(&self) -> CalmSnapshot {
        let domain = self.page.location().host_str().map(str::to_string);
        for attempt in 1..=FETCH_ATTEMPTS {
            let request = Request::GetCalmState {
                domain: domain.clone(),
            };
            let result = self.client.request(request).await.and_then(|response| {
                response.calm_snapshot().ok_or_else(|| {
                    TransportError::UnexpectedResponse(format!("{response:?}"))
                })
            });
            match result {
                Ok(snapshot) => return snapshot,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "calm state fetch failed");
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(FETCH_BACKOFF).await;
                    }
                }
            }
        }
        tracing::warn!("clock host unreachable; assuming calm mode is off");
        CalmSnapshot::inactive()
    }
}

impl<C> Drop for PageAgent<C> {
    fn drop(&mut self) {
        if !self.torn_down.replace(true) {
            self.gestures.dispose();
            self.registry.get_mut().teardown();
        }
    }
}
