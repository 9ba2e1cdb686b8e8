//! `autoplay-block`: media only plays right after a user gesture.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use super::{Rule, RuleContext, UndoStack, AUTOPLAY_BLOCK};
use crate::error::RuleError;
use crate::page::{
    ElementId, GestureTracker, MutationBatch, Page, PlaybackBlocked, PlaybackGate, Subscription,
};

/// Message carried by rejected play requests.
pub const BLOCKED_REASON: &str = "Autoplay blocked by Overstim Guard";

/// Playback gate admitting only gesture-trusted play requests.
struct GestureGate {
    gestures: Rc<GestureTracker>,
    inner: Option<Rc<dyn PlaybackGate>>,
}

impl PlaybackGate for GestureGate {
    fn check(&self, media: ElementId) -> Result<(), PlaybackBlocked> {
        if !self.gestures.was_user_initiated() {
            tracing::debug!(%media, "blocked autoplay attempt");
            return Err(PlaybackBlocked {
                media,
                reason: BLOCKED_REASON.to_string(),
            });
        }
        match &self.inner {
            Some(inner) => inner.check(media),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct State {
    page: Option<Rc<dyn Page>>,
    handled: HashSet<ElementId>,
    undo: UndoStack,
    observer: Option<Subscription>,
}

pub struct AutoplayBlock {
    gestures: Rc<GestureTracker>,
    state: Rc<RefCell<State>>,
}

impl AutoplayBlock {
    pub fn new(gestures: Rc<GestureTracker>) -> Self {
        Self {
            gestures,
            state: Rc::new(RefCell::new(State::default())),
        }
    }
}

/// Strip `autoplay` from `media` and pause it unless a gesture started it.
fn handle_media(state: &mut State, gestures: &GestureTracker, page: &dyn Page, media: ElementId) {
    if !state.handled.insert(media) {
        return;
    }
    if let Some(value) = page.attribute(media, "autoplay") {
        page.remove_attribute(media, "autoplay");
        state
            .undo
            .push(move |page| page.set_attribute(media, "autoplay", &value));
    }
    if !page.is_paused(media) && !gestures.was_user_initiated() {
        page.pause(media);
    }
}

fn on_mutations(state: &Weak<RefCell<State>>, gestures: &GestureTracker, batch: &MutationBatch) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let Some(page) = state.borrow().page.clone() else {
        return;
    };
    let mut state = state.borrow_mut();
    for added in &batch.added {
        for media in page.media_in_subtree(*added) {
            handle_media(&mut state, gestures, page.as_ref(), media);
        }
    }
}

impl Rule for AutoplayBlock {
    fn id(&self) -> &str {
        AUTOPLAY_BLOCK
    }

    fn applies(&self, context: &RuleContext) -> bool {
        context.calm_active()
    }

    fn apply(&self, context: &RuleContext) -> Result<(), RuleError> {
        if self.state.borrow().page.is_some() {
            return Ok(());
        }
        let page = Rc::clone(context.page());

        let previous = page.playback_gate();
        page.set_playback_gate(Some(Rc::new(GestureGate {
            gestures: Rc::clone(&self.gestures),
            inner: previous.clone(),
        })));

        let mut state = self.state.borrow_mut();
        state.undo.push(move |page| page.set_playback_gate(previous));
        for media in page.media_elements() {
            handle_media(&mut state, &self.gestures, page.as_ref(), media);
        }

        let weak = Rc::downgrade(&self.state);
        let gestures = Rc::clone(&self.gestures);
        state.observer = Some(page.observe_mutations(Rc::new(move |batch: &MutationBatch| {
            on_mutations(&weak, &gestures, batch);
        })));
        state.page = Some(page);
        Ok(())
    }

    fn revert(&self) -> Result<(), RuleError> {
        let (page, mut undo, observer) = {
            let mut state = self.state.borrow_mut();
            state.handled.clear();
            (
                state.page.take(),
                std::mem::take(&mut state.undo),
                state.observer.take(),
            )
        };
        drop(observer);
        if let Some(page) = page {
            undo.unwind(page.as_ref());
        }
        Ok(())
    }

    fn quiesce(&self) {
        let observer = self.state.borrow_mut().observer.take();
        drop(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ElementSpec, MemoryPage};
    use crate::rules::{build_rule_context, CalmSnapshot};
    use chrono::Utc;
    use std::time::Duration;

    fn setup() -> (Rc<MemoryPage>, AutoplayBlock, RuleContext) {
        let page = MemoryPage::new("https://video.example.com/").unwrap();
        let dyn_page: Rc<dyn Page> = page.clone();
        let gestures = GestureTracker::attach(&dyn_page);
        let rule = AutoplayBlock::new(gestures);
        let snapshot = CalmSnapshot {
            calm_active: true,
            ..CalmSnapshot::default()
        };
        let ctx = build_rule_context(&dyn_page, &snapshot, Utc::now());
        (page, rule, ctx)
    }

    #[test]
    fn untrusted_play_is_rejected() {
        let (page, rule, ctx) = setup();
        let video = page.insert(None, ElementSpec::video());
        rule.apply(&ctx).unwrap();

        let err = page.request_play(video).unwrap_err();
        assert_eq!(err.reason, BLOCKED_REASON);
        assert!(page.is_paused(video));
    }

    #[test]
    fn play_right_after_a_gesture_is_allowed() {
        let (page, rule, ctx) = setup();
        let video = page.insert(None, ElementSpec::video());
        rule.apply(&ctx).unwrap();

        page.user_input();
        page.advance(Duration::from_millis(50));
        assert!(page.request_play(video).is_ok());

        page.advance(Duration::from_millis(200));
        page.pause(video);
        assert!(page.request_play(video).is_err());
    }

    #[test]
    fn existing_and_later_media_lose_autoplay() {
        let (page, rule, ctx) = setup();
        let playing = page.insert(None, ElementSpec::video().autoplay().playing());
        rule.apply(&ctx).unwrap();

        assert_eq!(page.attribute(playing, "autoplay"), None);
        assert!(page.is_paused(playing));

        let wrapper = page.insert(None, ElementSpec::new("div"));
        let late = page.insert(Some(wrapper), ElementSpec::audio().autoplay());
        assert!(page.attribute(late, "autoplay").is_some());
        page.flush_mutations();
        assert_eq!(page.attribute(late, "autoplay"), None);
    }

    #[test]
    fn apply_twice_then_revert_restores_page() {
        let (page, rule, ctx) = setup();
        page.insert(None, ElementSpec::video().autoplay());
        page.insert(None, ElementSpec::audio());
        page.flush_mutations();
        let before = page.snapshot();

        rule.apply(&ctx).unwrap();
        let applied = page.snapshot();
        rule.apply(&ctx).unwrap();
        assert_eq!(page.snapshot(), applied);

        rule.revert().unwrap();
        assert_eq!(page.snapshot(), before);
        assert!(page.playback_gate().is_none());
    }

    #[test]
    fn revert_without_apply_is_a_no_op() {
        let (page, rule, _ctx) = setup();
        let before = page.snapshot();
        rule.revert().unwrap();
        assert_eq!(page.snapshot(), before);
    }
}
