//! Gesture-trust tracking.
//!
//! A play request counts as user-initiated when it arrives within a short
//! window after genuine user input. One tracker exists per page context and
//! is handed explicitly to the rules that need it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::{Page, Subscription};

/// Default gesture-trust window.
pub const DEFAULT_TRUST_WINDOW: Duration = Duration::from_millis(100);

pub struct GestureTracker {
    page: Weak<dyn Page>,
    trust_window: Duration,
    last_input: Rc<Cell<Option<Duration>>>,
    subscription: RefCell<Option<Subscription>>,
}

impl GestureTracker {
    /// Start listening for user input on `page`.
    pub fn attach(page: &Rc<dyn Page>) -> Rc<Self> {
        Self::with_trust_window(page, DEFAULT_TRUST_WINDOW)
    }

    pub fn with_trust_window(page: &Rc<dyn Page>, trust_window: Duration) -> Rc<Self> {
        let last_input = Rc::new(Cell::new(None));
        let stamp = Rc::clone(&last_input);
        let weak_page = Rc::downgrade(page);
        let subscription = page.on_user_input(Rc::new(move || {
            if let Some(page) = weak_page.upgrade() {
                stamp.set(Some(page.now()));
            }
        }));
        Rc::new(Self {
            page: Rc::downgrade(page),
            trust_window,
            last_input,
            subscription: RefCell::new(Some(subscription)),
        })
    }

    pub fn trust_window(&self) -> Duration {
        self.trust_window
    }

    /// Most recent user input happened less than one trust window ago.
    pub fn was_user_initiated(&self) -> bool {
        let (Some(page), Some(at)) = (self.page.upgrade(), self.last_input.get()) else {
            return false;
        };
        page.now().saturating_sub(at) < self.trust_window
    }

    /// Record a user interaction observed by other means.
    pub fn mark_user_interaction(&self) {
        if let Some(page) = self.page.upgrade() {
            self.last_input.set(Some(page.now()));
        }
    }

    /// Stop listening. Later queries report no trust.
    pub fn dispose(&self) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.cancel();
        }
        self.last_input.set(None);
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.borrow().is_some()
    }
}
