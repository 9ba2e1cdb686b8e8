//! Reversible page-adaptation rules.
//!
//! A rule is a small unit that changes a page while calm mode is active and
//! can put everything back afterwards. The [`RuleRegistry`] decides which
//! rules run for a given [`RuleContext`] and guarantees that at most one
//! application of each rule is live at a time.
//!
//! ## Built-in rules
//!
//! | id                      | effect                                          |
//! |-------------------------|-------------------------------------------------|
//! | `autoplay-block`        | rejects play requests without a recent gesture  |
//! | `infinite-scroll-block` | caps long feeds behind a "Show more" button     |
//! | `thumbnail-dimming`     | desaturates thumbnails via an injected sheet    |
//! | `audio-surprise-block`  | mutes media that starts without a gesture       |

mod audio;
mod autoplay;
mod context;
mod dimming;
mod feed;
mod registry;
mod undo;

pub use audio::AudioSurpriseBlock;
pub use autoplay::{AutoplayBlock, BLOCKED_REASON};
pub use context::{build_rule_context, CalmSnapshot, DomainOverride, RuleContext};
pub use dimming::{ThumbnailDimming, DIMMING_CSS};
pub use feed::{InfiniteScrollBlock, FEED_SELECTORS, SHOW_MORE_LABEL};
pub use registry::RuleRegistry;
pub use undo::UndoStack;

use std::rc::Rc;

use crate::error::RuleError;
use crate::page::GestureTracker;

/// Stable rule identifier, e.g. `"autoplay-block"`.
pub type RuleId = String;

pub const AUTOPLAY_BLOCK: &str = "autoplay-block";
pub const INFINITE_SCROLL_BLOCK: &str = "infinite-scroll-block";
pub const THUMBNAIL_DIMMING: &str = "thumbnail-dimming";
pub const AUDIO_SURPRISE_BLOCK: &str = "audio-surprise-block";

/// Ids of the built-in rules, in registration order.
pub const BUILTIN_RULE_IDS: [&str; 4] = [
    AUTOPLAY_BLOCK,
    INFINITE_SCROLL_BLOCK,
    THUMBNAIL_DIMMING,
    AUDIO_SURPRISE_BLOCK,
];

/// A reversible page adaptation.
///
/// Rules live on the single-threaded page host and keep their own ledger of
/// what they changed behind interior mutability, so every method takes
/// `&self`.
pub trait Rule {
    /// Stable identifier.
    fn id(&self) -> &str;

    /// Whether the rule wants to run in `context`. Must be side-effect free.
    fn applies(&self, context: &RuleContext) -> bool;

    /// Change the page. Calling it again while applied changes nothing.
    fn apply(&self, context: &RuleContext) -> Result<(), RuleError>;

    /// Restore every value `apply` touched. A no-op when not applied.
    fn revert(&self) -> Result<(), RuleError>;

    /// Stop reacting to page events without restoring anything yet.
    ///
    /// Called on teardown before `revert`, so no callback fires against a
    /// half-restored page.
    fn quiesce(&self) {}
}

/// The four built-in rules, sharing one gesture tracker.
pub fn builtin_rules(gestures: &Rc<GestureTracker>) -> Vec<Rc<dyn Rule>> {
    vec![
        Rc::new(AutoplayBlock::new(Rc::clone(gestures))),
        Rc::new(InfiniteScrollBlock::new()),
        Rc::new(ThumbnailDimming::new()),
        Rc::new(AudioSurpriseBlock::new(Rc::clone(gestures))),
    ]
}

/// Whether `id` names a built-in rule.
pub fn is_builtin(id: &str) -> bool {
    BUILTIN_RULE_IDS.contains(&id)
}
