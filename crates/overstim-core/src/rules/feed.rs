//! `infinite-scroll-block`: long feeds are capped behind a button.
//!
//! A candidate container is frozen when its content is taller than
//! [`THRESHOLD_MULTIPLIER`] viewports, it fills at least half the viewport,
//! and it looks scrolled or scrollable. Frozen containers get a fixed height,
//! `overflow: hidden`, and a "Show more content" button that lifts the cap for
//! one viewport's worth of scrolling before re-capping.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;

use super::{Rule, RuleContext, INFINITE_SCROLL_BLOCK};
use crate::error::RuleError;
use crate::page::{ElementId, MutationBatch, Page, Subscription};

/// Selectors for elements that commonly host infinite feeds.
pub const FEED_SELECTORS: &str = concat!(
    r#"[role="feed"], [role="article"], main, "#,
    r#"[class*="feed"], [class*="stream"], [class*="timeline"], "#,
    r#"[id*="feed"], [id*="stream"]"#,
);

pub const SHOW_MORE_LABEL: &str = "Show more content";

/// Content taller than this many viewports counts as an endless feed.
pub const THRESHOLD_MULTIPLIER: f64 = 2.5;

/// How long the cap stays lifted after "Show more".
pub const RECAP_DELAY: Duration = Duration::from_millis(100);

const CAPPED_PROPERTIES: [&str; 3] = ["height", "overflow", "position"];

struct Frozen {
    threshold: f64,
    /// Inline values of `CAPPED_PROPERTIES` before freezing.
    original: [Option<String>; 3],
    button: ElementId,
    recap: Option<Subscription>,
}

#[derive(Default)]
struct State {
    page: Option<Rc<dyn Page>>,
    frozen: IndexMap<ElementId, Frozen>,
    observer: Option<Subscription>,
}

#[derive(Default)]
pub struct InfiniteScrollBlock {
    state: Rc<RefCell<State>>,
}

impl InfiniteScrollBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers currently frozen, in freezing order.
    pub fn frozen_containers(&self) -> Vec<ElementId> {
        self.state.borrow().frozen.keys().copied().collect()
    }
}

fn looks_endless(page: &dyn Page, container: ElementId, threshold: f64) -> bool {
    let viewport = page.viewport_height();
    let scroll_height = page.scroll_height(container);
    let client_height = page.client_height(container);
    scroll_height > threshold
        && client_height > viewport * 0.5
        && (page.scroll_top(container) > 0.0 || scroll_height > client_height * 1.5)
}

fn cap(page: &dyn Page, container: ElementId, threshold: f64) {
    page.set_style_property(container, "height", Some(&format!("{threshold}px")));
    page.set_style_property(container, "overflow", Some("hidden"));
    page.set_style_property(container, "position", Some("relative"));
}

fn scan(state: &Rc<RefCell<State>>) {
    let Some(page) = state.borrow().page.clone() else {
        return;
    };
    let threshold = page.viewport_height() * THRESHOLD_MULTIPLIER;
    for container in page.query_selector_all(FEED_SELECTORS) {
        if state.borrow().frozen.contains_key(&container) {
            continue;
        }
        if looks_endless(page.as_ref(), container, threshold) {
            freeze(state, page.as_ref(), container, threshold);
        }
    }
}

fn freeze(state: &Rc<RefCell<State>>, page: &dyn Page, container: ElementId, threshold: f64) {
    let original = CAPPED_PROPERTIES.map(|p| page.style_property(container, p));
    cap(page, container, threshold);

    let weak = Rc::downgrade(state);
    let button = page.append_button(
        container,
        SHOW_MORE_LABEL,
        Rc::new(move || show_more(&weak, container)),
    );
    tracing::debug!(%container, threshold, "feed container frozen");

    state.borrow_mut().frozen.insert(
        container,
        Frozen {
            threshold,
            original,
            button,
            recap: None,
        },
    );
}

fn show_more(state: &Weak<RefCell<State>>, container: ElementId) {
    let Some(state_rc) = state.upgrade() else {
        return;
    };
    let mut state = state_rc.borrow_mut();
    let Some(page) = state.page.clone() else {
        return;
    };
    let Some(frozen) = state.frozen.get_mut(&container) else {
        return;
    };

    let [height, overflow, _] = &frozen.original;
    page.set_style_property(container, "height", height.as_deref());
    page.set_style_property(container, "overflow", overflow.as_deref());
    let top = page.scroll_top(container) + page.viewport_height();
    page.set_scroll_top(container, top);

    let weak = Rc::downgrade(&state_rc);
    let threshold = frozen.threshold;
    frozen.recap = Some(page.set_timeout(
        RECAP_DELAY,
        Box::new(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mut state = state.borrow_mut();
            let Some(page) = state.page.clone() else {
                return;
            };
            if let Some(frozen) = state.frozen.get_mut(&container) {
                cap(page.as_ref(), container, threshold);
                frozen.recap = None;
            }
        }),
    ));
}

fn on_mutations(state: &Weak<RefCell<State>>, batch: &MutationBatch) {
    let Some(state) = state.upgrade() else {
        return;
    };
    if !batch.removed.is_empty() {
        let pruned: Vec<Frozen> = {
            let mut state = state.borrow_mut();
            batch
                .removed
                .iter()
                .filter_map(|id| state.frozen.shift_remove(id))
                .collect()
        };
        drop(pruned);
    }
    if !batch.added.is_empty() {
        scan(&state);
    }
}

impl Rule for InfiniteScrollBlock {
    fn id(&self) -> &str {
        INFINITE_SCROLL_BLOCK
    }

    fn applies(&self, context: &RuleContext) -> bool {
        context.calm_active()
    }

    fn apply(&self, context: &RuleContext) -> Result<(), RuleError> {
        if self.state.borrow().page.is_some() {
            return Ok(());
        }
        let page = Rc::clone(context.page());
        self.state.borrow_mut().page = Some(Rc::clone(&page));
        scan(&self.state);

        let weak = Rc::downgrade(&self.state);
        let observer = page.observe_mutations(Rc::new(move |batch: &MutationBatch| {
            on_mutations(&weak, batch);
        }));
        self.state.borrow_mut().observer = Some(observer);
        Ok(())
    }

    fn revert(&self) -> Result<(), RuleError> {
        let (page, frozen, observer) = {
            let mut state = self.state.borrow_mut();
            (
                state.page.take(),
                std::mem::take(&mut state.frozen),
                state.observer.take(),
            )
        };
        drop(observer);
        let Some(page) = page else {
            return Ok(());
        };
        for (container, entry) in frozen.into_iter().rev() {
            drop(entry.recap);
            page.remove_element(entry.button);
            for (property, value) in CAPPED_PROPERTIES.iter().zip(&entry.original) {
                page.set_style_property(container, property, value.as_deref());
            }
        }
        Ok(())
    }

    fn quiesce(&self) {
        let observer = self.state.borrow_mut().observer.take();
        drop(observer);
    }
}
