//! `audio-surprise-block`: sound never starts without a gesture.
//!
//! Audio-bearing media is muted and loses `autoplay` when first seen, unless
//! a gesture is inside the trust window at that moment. Play events that
//! arrive without a gesture mute the element as well; a trusted play gives
//! back the sound the rule took. The original `muted` state and `autoplay`
//! attribute are recorded before the first change.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use super::{Rule, RuleContext, UndoStack, AUDIO_SURPRISE_BLOCK};
use crate::error::RuleError;
use crate::page::{ElementId, GestureTracker, MutationBatch, Page, Subscription};

#[derive(Default)]
struct State {
    page: Option<Rc<dyn Page>>,
    tracked: HashSet<ElementId>,
    /// Audible before the rule muted them.
    muted_by_rule: HashSet<ElementId>,
    undo: UndoStack,
    observer: Option<Subscription>,
    play_listener: Option<Subscription>,
}

pub struct AudioSurpriseBlock {
    gestures: Rc<GestureTracker>,
    state: Rc<RefCell<State>>,
}

impl AudioSurpriseBlock {
    pub fn new(gestures: Rc<GestureTracker>) -> Self {
        Self {
            gestures,
            state: Rc::new(RefCell::new(State::default())),
        }
    }

    /// Media elements whose original state is on record.
    pub fn tracked_media(&self) -> usize {
        self.state.borrow().tracked.len()
    }
}

/// Record the original state of `media` once, then quiet it.
fn track(state: &mut State, page: &dyn Page, gestures: &GestureTracker, media: ElementId) {
    if state.tracked.contains(&media) || !page.has_audio(media) {
        return;
    }
    state.tracked.insert(media);

    let muted = page.is_muted(media);
    state.undo.push(move |page| page.set_muted(media, muted));
    if let Some(autoplay) = page.attribute(media, "autoplay") {
        page.remove_attribute(media, "autoplay");
        state
            .undo
            .push(move |page| page.set_attribute(media, "autoplay", &autoplay));
    }
    if !gestures.was_user_initiated() {
        if !muted {
            state.muted_by_rule.insert(media);
        }
        page.set_muted(media, true);
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
            track(&mut state, page.as_ref(), gestures, media);
        }
    }
}

fn on_play(state: &Weak<RefCell<State>>, gestures: &GestureTracker, media: ElementId) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let Some(page) = state.borrow().page.clone() else {
        return;
    };
    if gestures.was_user_initiated() {
        let unmute = state.borrow_mut().muted_by_rule.remove(&media);
        if unmute {
            page.set_muted(media, false);
            tracing::debug!(%media, "unmuted media played by the user");
        }
        return;
    }
    if page.is_muted(media) || !page.has_audio(media) {
        return;
    }
    {
        let mut state = state.borrow_mut();
        track(&mut state, page.as_ref(), gestures, media);
        state.muted_by_rule.insert(media);
    }
    page.set_muted(media, true);
    tracing::debug!(%media, "muted media that started without a gesture");
}

impl Rule for AudioSurpriseBlock {
    fn id(&self) -> &str {
        AUDIO_SURPRISE_BLOCK
    }

    fn applies(&self, context: &RuleContext) -> bool {
        context.calm_active()
    }

    fn apply(&self, context: &RuleContext) -> Result<(), RuleError> {
        if self.state.borrow().page.is_some() {
            return Ok(());
        }
        let page = Rc::clone(context.page());
        let mut state = self.state.borrow_mut();
        for media in page.media_elements() {
            track(&mut state, page.as_ref(), &self.gestures, media);
        }

        let weak = Rc::downgrade(&self.state);
        let gestures = Rc::clone(&self.gestures);
        state.observer = Some(page.observe_mutations(Rc::new(move |batch: &MutationBatch| {
            on_mutations(&weak, &gestures, batch);
        })));

        let weak = Rc::downgrade(&self.state);
        let gestures = Rc::clone(&self.gestures);
        state.play_listener = Some(page.on_play(Rc::new(move |media| {
            on_play(&weak, &gestures, media);
        })));
        state.page = Some(page);
        Ok(())
    }

    fn revert(&self) -> Result<(), RuleError> {
        let (page, mut undo, observer, play_listener) = {
            let mut state = self.state.borrow_mut();
            state.tracked.clear();
            state.muted_by_rule.clear();
            (
                state.page.take(),
                std::mem::take(&mut state.undo),
                state.observer.take(),
                state.play_listener.take(),
            )
        };
        drop(observer);
        drop(play_listener);
        if let Some(page) = page {
            undo.unwind(page.as_ref());
        }
        Ok(())
    }

    fn quiesce(&self) {
        let (observer, play_listener) = {
            let mut state = self.state.borrow_mut();
            (state.observer.take(), state.play_listener.take())
        };
        drop(observer);
        drop(play_listener);
    }
}
