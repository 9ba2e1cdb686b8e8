//! Page surface that rules act on.
//!
//! The real document lives in another runtime; rules only see it through the
//! [`Page`] trait. A page host is single-threaded, so callbacks are `Rc`
//! closures and run to completion one at a time.
//!
//! Everything a rule registers with the page (listeners, mutation
//! subscriptions, timers) comes back as a [`Subscription`] that unregisters
//! on drop.

mod gesture;
mod memory;

pub use gesture::{GestureTracker, DEFAULT_TRUST_WINDOW};
pub use memory::{ElementSpec, MemoryPage, NodeSnapshot, PageSnapshot};

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Opaque handle to a node in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One delivery of the mutation subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<ElementId>,
    pub removed: Vec<ElementId>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Rejection returned to a page script whose play request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("playback of {media} blocked: {reason}")]
pub struct PlaybackBlocked {
    pub media: ElementId,
    pub reason: String,
}

/// Decides whether a media play request may proceed.
pub trait PlaybackGate {
    fn check(&self, media: ElementId) -> Result<(), PlaybackBlocked>;
}

pub type PlayCallback = Rc<dyn Fn(ElementId)>;
pub type InputCallback = Rc<dyn Fn()>;
pub type MutationCallback = Rc<dyn Fn(&MutationBatch)>;
pub type ClickCallback = Rc<dyn Fn()>;

/// Registration handle; dropping it cancels the registration.
#[must_use = "dropping the subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Everything the rules need from a document and its window.
///
/// Operations on an element that no longer exists are no-ops, and queries on
/// it return defaults, mirroring detached DOM nodes.
pub trait Page {
    // ── Window ───────────────────────────────────────────────────────

    fn location(&self) -> Url;

    /// Monotonic page time.
    fn now(&self) -> Duration;

    fn viewport_height(&self) -> f64;

    /// Run `callback` once after `delay`.
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Subscription;

    // ── Structure ────────────────────────────────────────────────────

    /// Elements matching a comma-separated selector list, in document order.
    fn query_selector_all(&self, selector: &str) -> Vec<ElementId>;

    /// `root` itself if it is media, plus all media descendants.
    fn media_in_subtree(&self, root: ElementId) -> Vec<ElementId>;

    fn remove_element(&self, element: ElementId);

    /// Added/removed node batches. Delivery is asynchronous with respect to
    /// the mutation that caused it.
    fn observe_mutations(&self, callback: MutationCallback) -> Subscription;

    // ── Attributes and inline style ──────────────────────────────────

    fn attribute(&self, element: ElementId, name: &str) -> Option<String>;

    fn set_attribute(&self, element: ElementId, name: &str, value: &str);

    fn remove_attribute(&self, element: ElementId, name: &str);

    fn style_property(&self, element: ElementId, property: &str) -> Option<String>;

    /// `None` clears the inline property.
    fn set_style_property(&self, element: ElementId, property: &str, value: Option<&str>);

    // ── Layout ───────────────────────────────────────────────────────

    fn scroll_height(&self, element: ElementId) -> f64;

    fn client_height(&self, element: ElementId) -> f64;

    fn scroll_top(&self, element: ElementId) -> f64;

    fn set_scroll_top(&self, element: ElementId, value: f64);

    // ── Media ────────────────────────────────────────────────────────

    /// Every `video` and `audio` element.
    fn media_elements(&self) -> Vec<ElementId>;

    fn has_audio(&self, media: ElementId) -> bool;

    fn is_muted(&self, media: ElementId) -> bool;

    fn set_muted(&self, media: ElementId, muted: bool);

    fn is_paused(&self, media: ElementId) -> bool;

    fn pause(&self, media: ElementId);

    fn playback_gate(&self) -> Option<Rc<dyn PlaybackGate>>;

    /// Install (or with `None`, remove) the gate consulted by play requests.
    fn set_playback_gate(&self, gate: Option<Rc<dyn PlaybackGate>>);

    /// Fired after a play request went through.
    fn on_play(&self, callback: PlayCallback) -> Subscription;

    // ── Input and injected content ───────────────────────────────────

    /// Fired on genuine user input (click, touch, key, mouse down).
    fn on_user_input(&self, callback: InputCallback) -> Subscription;

    /// `None` when the document has no head to inject into.
    fn inject_stylesheet(&self, css: &str) -> Option<ElementId>;

    fn append_button(&self, parent: ElementId, label: &str, on_click: ClickCallback) -> ElementId;
}
