//! In-memory page model.
//!
//! A small document tree with just enough behaviour for the rules: media
//! state, inline styles, layout numbers, timers, user input, and batched
//! mutation delivery. Hosts use it to simulate a page; tests use it to check
//! that every rule leaves the page exactly as it found it.
//!
//! Nothing here runs on its own. The owner drives time with [`advance`],
//! mutation delivery with [`flush_mutations`], and input with
//! [`user_input`] / [`click`] / [`request_play`].
//!
//! [`advance`]: MemoryPage::advance
//! [`flush_mutations`]: MemoryPage::flush_mutations
//! [`user_input`]: MemoryPage::user_input
//! [`click`]: MemoryPage::click
//! [`request_play`]: MemoryPage::request_play

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use url::Url;

use super::{
    ClickCallback, ElementId, InputCallback, MutationBatch, MutationCallback, Page, PlayCallback,
    PlaybackBlocked, PlaybackGate, Subscription,
};

/// Upper bound on delivery rounds per flush, in case callbacks keep
/// inserting nodes.
const MAX_FLUSH_ROUNDS: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    scroll_height: f64,
    client_height: f64,
    scroll_top: f64,
}

#[derive(Debug, Clone, Copy)]
struct MediaState {
    muted: bool,
    paused: bool,
    has_audio: bool,
}

struct Node {
    tag: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
    layout: Layout,
    media: Option<MediaState>,
    on_click: Option<ClickCallback>,
}

struct Timer {
    id: u64,
    due: Duration,
    callback: Box<dyn FnOnce()>,
}

struct PageState {
    location: Url,
    now: Duration,
    viewport_height: f64,
    nodes: BTreeMap<ElementId, Node>,
    next_node: u64,
    head: Option<ElementId>,
    body: ElementId,
    gate: Option<Rc<dyn PlaybackGate>>,
    play_listeners: Vec<(u64, PlayCallback)>,
    input_listeners: Vec<(u64, InputCallback)>,
    mutation_listeners: Vec<(u64, MutationCallback)>,
    timers: Vec<Timer>,
    next_handle: u64,
    pending: MutationBatch,
}

/// Description of an element to insert.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    layout: Layout,
    media: Option<MediaState>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            text: String::new(),
            layout: Layout::default(),
            media: None,
        }
    }

    /// Paused, unmuted video with an audio track.
    pub fn video() -> Self {
        Self {
            media: Some(MediaState {
                muted: false,
                paused: true,
                has_audio: true,
            }),
            ..Self::new("video")
        }
    }

    pub fn audio() -> Self {
        Self {
            media: Some(MediaState {
                muted: false,
                paused: true,
                has_audio: true,
            }),
            ..Self::new("audio")
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Content height and visible height of a scrollable element.
    pub fn scrollable(mut self, scroll_height: f64, client_height: f64) -> Self {
        self.layout.scroll_height = scroll_height;
        self.layout.client_height = client_height;
        self
    }

    pub fn autoplay(self) -> Self {
        self.attr("autoplay", "")
    }

    pub fn playing(mut self) -> Self {
        if let Some(media) = self.media.as_mut() {
            media.paused = false;
        }
        self
    }

    pub fn muted(mut self) -> Self {
        if let Some(media) = self.media.as_mut() {
            media.muted = true;
        }
        self.attr("muted", "")
    }

    /// Video without an audio track.
    pub fn silent(mut self) -> Self {
        if let Some(media) = self.media.as_mut() {
            media.has_audio = false;
        }
        self
    }
}

/// Externally observable state of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: ElementId,
    pub tag: String,
    pub parent: Option<ElementId>,
    pub attributes: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub text: String,
    pub scroll_top: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

/// Externally observable state of the whole page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub playback_gate: bool,
    pub play_listeners: usize,
    pub input_listeners: usize,
    pub mutation_listeners: usize,
    pub pending_timers: usize,
}

/// Single-threaded in-memory page.
pub struct MemoryPage {
    state: Rc<RefCell<PageState>>,
}

impl MemoryPage {
    /// Empty page (just a head and a body) at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` does not parse.
    pub fn new(url: &str) -> Result<Rc<Self>, url::ParseError> {
        let location = Url::parse(url)?;
        let mut state = PageState {
            location,
            now: Duration::ZERO,
            viewport_height: 800.0,
            nodes: BTreeMap::new(),
            next_node: 0,
            head: None,
            body: ElementId(0),
            gate: None,
            play_listeners: Vec::new(),
            input_listeners: Vec::new(),
            mutation_listeners: Vec::new(),
            timers: Vec::new(),
            next_handle: 0,
            pending: MutationBatch::default(),
        };
        let head = state.insert(None, ElementSpec::new("head"));
        let body = state.insert(None, ElementSpec::new("body"));
        state.head = Some(head);
        state.body = body;
        state.pending = MutationBatch::default();
        Ok(Rc::new(Self {
            state: Rc::new(RefCell::new(state)),
        }))
    }

    pub fn head(&self) -> Option<ElementId> {
        self.state.borrow().head
    }

    pub fn body(&self) -> ElementId {
        self.state.borrow().body
    }

    pub fn set_viewport_height(&self, height: f64) {
        self.state.borrow_mut().viewport_height = height;
    }

    /// Change the location, as a single-page-app navigation would.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` does not parse.
    pub fn navigate(&self, url: &str) -> Result<(), url::ParseError> {
        self.state.borrow_mut().location = Url::parse(url)?;
        Ok(())
    }

    /// Insert an element under `parent` (the body when `None`).
    pub fn insert(&self, parent: Option<ElementId>, spec: ElementSpec) -> ElementId {
        let mut state = self.state.borrow_mut();
        let parent = parent.unwrap_or(state.body);
        state.insert(Some(parent), spec)
    }

    pub fn children(&self, element: ElementId) -> Vec<ElementId> {
        self.state
            .borrow()
            .nodes
            .get(&element)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn text(&self, element: ElementId) -> Option<String> {
        self.state.borrow().nodes.get(&element).map(|n| n.text.clone())
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.state.borrow().nodes.contains_key(&element)
    }

    /// CSS text of every stylesheet in the head.
    pub fn stylesheets(&self) -> Vec<String> {
        let state = self.state.borrow();
        state
            .nodes
            .values()
            .filter(|n| n.tag == "style")
            .map(|n| n.text.clone())
            .collect()
    }

    /// Deliver queued mutation records to observers.
    pub fn flush_mutations(&self) {
        for _ in 0..MAX_FLUSH_ROUNDS {
            let (batch, listeners) = {
                let mut state = self.state.borrow_mut();
                let batch = std::mem::take(&mut state.pending);
                let listeners: Vec<MutationCallback> =
                    state.mutation_listeners.iter().map(|(_, l)| Rc::clone(l)).collect();
                (batch, listeners)
            };
            if batch.is_empty() {
                return;
            }
            for listener in listeners {
                listener(&batch);
            }
        }
        tracing::warn!("mutation delivery did not settle; remaining records dropped");
        self.state.borrow_mut().pending = MutationBatch::default();
    }

    /// Dispatch a genuine user input event.
    pub fn user_input(&self) {
        let listeners: Vec<InputCallback> = self
            .state
            .borrow()
            .input_listeners
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// A page script calls `play()` on `media`.
    ///
    /// # Errors
    ///
    /// Returns the gate's rejection when an installed playback gate refuses.
    pub fn request_play(&self, media: ElementId) -> Result<(), PlaybackBlocked> {
        let gate = self.state.borrow().gate.clone();
        if let Some(gate) = gate {
            gate.check(media)?;
        }
        let listeners: Vec<PlayCallback> = {
            let mut state = self.state.borrow_mut();
            match state.nodes.get_mut(&media).and_then(|n| n.media.as_mut()) {
                Some(m) => m.paused = false,
                None => return Ok(()),
            }
            state.play_listeners.iter().map(|(_, l)| Rc::clone(l)).collect()
        };
        for listener in listeners {
            listener(media);
        }
        Ok(())
    }

    /// User clicks `element`: counts as input, then runs its click handler.
    pub fn click(&self, element: ElementId) {
        self.user_input();
        let handler = self
            .state
            .borrow()
            .nodes
            .get(&element)
            .and_then(|n| n.on_click.clone());
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Move page time forward, running timers as they come due.
    pub fn advance(&self, by: Duration) {
        let target = self.state.borrow().now + by;
        loop {
            let due = {
                let mut state = self.state.borrow_mut();
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let timer = state.timers.remove(i);
                        state.now = state.now.max(timer.due);
                        Some(timer)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(timer) => (timer.callback)(),
                None => return,
            }
        }
    }

    pub fn snapshot(&self) -> PageSnapshot {
        let state = self.state.borrow();
        PageSnapshot {
            nodes: state
                .nodes
                .iter()
                .map(|(id, n)| NodeSnapshot {
                    id: *id,
                    tag: n.tag.clone(),
                    parent: n.parent,
                    attributes: n.attributes.clone(),
                    style: n.style.clone(),
                    text: n.text.clone(),
                    scroll_top: n.layout.scroll_top,
                    muted: n.media.map(|m| m.muted),
                    paused: n.media.map(|m| m.paused),
                })
                .collect(),
            playback_gate: state.gate.is_some(),
            play_listeners: state.play_listeners.len(),
            input_listeners: state.input_listeners.len(),
            mutation_listeners: state.mutation_listeners.len(),
            pending_timers: state.timers.len(),
        }
    }

    fn handle(&self) -> Weak<RefCell<PageState>> {
        Rc::downgrade(&self.state)
    }

    fn with_node<T: Default>(&self, element: ElementId, f: impl FnOnce(&Node) -> T) -> T {
        self.state.borrow().nodes.get(&element).map(f).unwrap_or_default()
    }

    fn with_node_mut(&self, element: ElementId, f: impl FnOnce(&mut Node)) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(&element) {
            f(node);
        }
    }
}

impl PageState {
    fn insert(&mut self, parent: Option<ElementId>, spec: ElementSpec) -> ElementId {
        let id = ElementId(self.next_node);
        self.next_node += 1;
        let node = Node {
            tag: spec.tag,
            parent,
            children: Vec::new(),
            attributes: spec.attributes.into_iter().collect(),
            style: BTreeMap::new(),
            text: spec.text,
            layout: spec.layout,
            media: spec.media,
            on_click: None,
        };
        self.nodes.insert(id, node);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(id);
        }
        self.pending.added.push(id);
        id
    }

    /// Detach `root` and its subtree, handing the nodes back so they are
    /// dropped outside the borrow.
    fn remove(&mut self, root: ElementId) -> Vec<Node> {
        let Some(parent) = self.nodes.get(&root).map(|n| n.parent) else {
            return Vec::new();
        };
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != root);
        }
        if self.head == Some(root) {
            self.head = None;
        }
        let mut removed = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children.iter().copied());
                removed.push(node);
            }
        }
        self.pending.removed.push(root);
        removed
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn matches(&self, node: &Node, selector: &SimpleSelector) -> bool {
        if let Some(tag) = &selector.tag {
            if !node.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        match &selector.attribute {
            None => true,
            Some(AttributeMatch::Present(name)) => node.attributes.contains_key(name),
            Some(AttributeMatch::Equals(name, value)) => {
                node.attributes.get(name).is_some_and(|v| v == value)
            }
            Some(AttributeMatch::Contains(name, value)) => {
                node.attributes.get(name).is_some_and(|v| v.contains(value.as_str()))
            }
        }
    }
}

/// The selector subset the memory page understands: `tag`, `[attr]`,
/// `[attr="v"]`, `[attr*="v"]`, and `tag[...]`.
struct SimpleSelector {
    tag: Option<String>,
    attribute: Option<AttributeMatch>,
}

enum AttributeMatch {
    Present(String),
    Equals(String, String),
    Contains(String, String),
}

fn parse_selector(raw: &str) -> Option<SimpleSelector> {
    let raw = raw.trim();
    let (tag, rest) = match raw.find('[') {
        Some(i) => (&raw[..i], Some(&raw[i..])),
        None => (raw, None),
    };
    let tag = (!tag.is_empty()).then(|| tag.to_string());
    if tag
        .as_deref()
        .is_some_and(|t| !t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        return None;
    }
    let attribute = match rest {
        None => None,
        Some(clause) => {
            let inner = clause.strip_prefix('[')?.strip_suffix(']')?;
            let unquote = |v: &str| v.trim().trim_matches('"').trim_matches('\'').to_string();
            if let Some((name, value)) = inner.split_once("*=") {
                Some(AttributeMatch::Contains(name.trim().to_string(), unquote(value)))
            } else if let Some((name, value)) = inner.split_once('=') {
                Some(AttributeMatch::Equals(name.trim().to_string(), unquote(value)))
            } else {
                Some(AttributeMatch::Present(inner.trim().to_string()))
            }
        }
    };
    if tag.is_none() && attribute.is_none() {
        return None;
    }
    Some(SimpleSelector { tag, attribute })
}

fn detach<T>(list: &mut Vec<(u64, T)>, id: u64) -> Vec<(u64, T)> {
    let (removed, kept) = std::mem::take(list).into_iter().partition(|(i, _)| *i == id);
    *list = kept;
    removed
}

impl Page for MemoryPage {
    fn location(&self) -> Url {
        self.state.borrow().location.clone()
    }

    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn viewport_height(&self) -> f64 {
        self.state.borrow().viewport_height
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Subscription {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_handle();
            let due = state.now + delay;
            state.timers.push(Timer { id, due, callback });
            id
        };
        let weak = self.handle();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let cancelled: Vec<Timer> = {
                    let mut state = state.borrow_mut();
                    let (cancelled, kept) =
                        std::mem::take(&mut state.timers).into_iter().partition(|t| t.id == id);
                    state.timers = kept;
                    cancelled
                };
                drop(cancelled);
            }
        })
    }

    fn query_selector_all(&self, selector: &str) -> Vec<ElementId> {
        let selectors: Vec<SimpleSelector> = selector
            .split(',')
            .filter_map(|s| {
                let parsed = parse_selector(s);
                if parsed.is_none() {
                    tracing::trace!(selector = s, "unsupported selector ignored");
                }
                parsed
            })
            .collect();
        let state = self.state.borrow();
        state
            .nodes
            .iter()
            .filter(|(_, node)| selectors.iter().any(|s| state.matches(node, s)))
            .map(|(id, _)| *id)
            .collect()
    }

    fn media_in_subtree(&self, root: ElementId) -> Vec<ElementId> {
        let state = self.state.borrow();
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = state.nodes.get(&id) {
                if node.media.is_some() {
                    found.push(id);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        found
    }

    fn remove_element(&self, element: ElementId) {
        let removed = self.state.borrow_mut().remove(element);
        drop(removed);
    }

    fn observe_mutations(&self, callback: MutationCallback) -> Subscription {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_handle();
            state.mutation_listeners.push((id, callback));
            id
        };
        let weak = self.handle();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = detach(&mut state.borrow_mut().mutation_listeners, id);
                drop(removed);
            }
        })
    }

    fn attribute(&self, element: ElementId, name: &str) -> Option<String> {
        self.with_node(element, |n| n.attributes.get(name).cloned())
    }

    fn set_attribute(&self, element: ElementId, name: &str, value: &str) {
        self.with_node_mut(element, |n| {
            n.attributes.insert(name.to_string(), value.to_string());
        });
    }

    fn remove_attribute(&self, element: ElementId, name: &str) {
        self.with_node_mut(element, |n| {
            n.attributes.remove(name);
        });
    }

    fn style_property(&self, element: ElementId, property: &str) -> Option<String> {
        self.with_node(element, |n| n.style.get(property).cloned())
    }

    fn set_style_property(&self, element: ElementId, property: &str, value: Option<&str>) {
        self.with_node_mut(element, |n| match value {
            Some(v) if !v.is_empty() => {
                n.style.insert(property.to_string(), v.to_string());
            }
            _ => {
                n.style.remove(property);
            }
        });
    }

    fn scroll_height(&self, element: ElementId) -> f64 {
        self.with_node(element, |n| n.layout.scroll_height)
    }

    fn client_height(&self, element: ElementId) -> f64 {
        self.with_node(element, |n| n.layout.client_height)
    }

    fn scroll_top(&self, element: ElementId) -> f64 {
        self.with_node(element, |n| n.layout.scroll_top)
    }

    fn set_scroll_top(&self, element: ElementId, value: f64) {
        self.with_node_mut(element, |n| {
            let max = (n.layout.scroll_height - n.layout.client_height).max(0.0);
            n.layout.scroll_top = value.clamp(0.0, max);
        });
    }

    fn media_elements(&self) -> Vec<ElementId> {
        let state = self.state.borrow();
        state
            .nodes
            .iter()
            .filter(|(_, n)| n.media.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    fn has_audio(&self, media: ElementId) -> bool {
        self.with_node(media, |n| n.media.is_some_and(|m| m.has_audio))
    }

    fn is_muted(&self, media: ElementId) -> bool {
        self.with_node(media, |n| n.media.is_some_and(|m| m.muted))
    }

    fn set_muted(&self, media: ElementId, muted: bool) {
        self.with_node_mut(media, |n| {
            if let Some(m) = n.media.as_mut() {
                m.muted = muted;
            }
        });
    }

    fn is_paused(&self, media: ElementId) -> bool {
        self.with_node(media, |n| n.media.map_or(true, |m| m.paused))
    }

    fn pause(&self, media: ElementId) {
        self.with_node_mut(media, |n| {
            if let Some(m) = n.media.as_mut() {
                m.paused = true;
            }
        });
    }

    fn playback_gate(&self) -> Option<Rc<dyn PlaybackGate>> {
        self.state.borrow().gate.clone()
    }

    fn set_playback_gate(&self, gate: Option<Rc<dyn PlaybackGate>>) {
        let previous = std::mem::replace(&mut self.state.borrow_mut().gate, gate);
        drop(previous);
    }

    fn on_play(&self, callback: PlayCallback) -> Subscription {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_handle();
            state.play_listeners.push((id, callback));
            id
        };
        let weak = self.handle();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = detach(&mut state.borrow_mut().play_listeners, id);
                drop(removed);
            }
        })
    }

    fn on_user_input(&self, callback: InputCallback) -> Subscription {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_handle();
            state.input_listeners.push((id, callback));
            id
        };
        let weak = self.handle();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = detach(&mut state.borrow_mut().input_listeners, id);
                drop(removed);
            }
        })
    }

    fn inject_stylesheet(&self, css: &str) -> Option<ElementId> {
        let mut state = self.state.borrow_mut();
        let head = state.head?;
        let spec = ElementSpec::new("style")
            .attr("data-overstim-guard", "true")
            .text(css);
        Some(state.insert(Some(head), spec))
    }

    fn append_button(&self, parent: ElementId, label: &str, on_click: ClickCallback) -> ElementId {
        let mut state = self.state.borrow_mut();
        let id = state.insert(Some(parent), ElementSpec::new("button").text(label));
        if let Some(node) = state.nodes.get_mut(&id) {
            node.on_click = Some(on_click);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn page() -> Rc<MemoryPage> {
        MemoryPage::new("https://video.example.com/watch?v=1").unwrap()
    }

    #[test]
    fn selectors_match_tags_and_attributes() {
        let page = page();
        let main = page.insert(None, ElementSpec::new("main"));
        let feed = page.insert(None, ElementSpec::new("div").attr("role", "feed"));
        let stream = page.insert(None, ElementSpec::new("section").attr("class", "home-stream big"));
        page.insert(None, ElementSpec::new("div").attr("class", "sidebar"));

        assert_eq!(page.query_selector_all("main"), vec![main]);
        assert_eq!(page.query_selector_all(r#"[role="feed"]"#), vec![feed]);
        assert_eq!(page.query_selector_all(r#"[class*="stream"]"#), vec![stream]);
        assert_eq!(
            page.query_selector_all(r#"main, [class*="stream"], div > p"#),
            vec![main, stream]
        );
    }

    #[test]
    fn mutations_are_batched_until_flushed() {
        let page = page();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = page.observe_mutations(Rc::new(move |batch: &MutationBatch| {
            sink.borrow_mut().push(batch.clone());
        }));

        let a = page.insert(None, ElementSpec::video());
        let b = page.insert(None, ElementSpec::audio());
        assert!(seen.borrow().is_empty());

        page.flush_mutations();
        page.remove_element(a);
        page.flush_mutations();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].added, vec![a, b]);
        assert_eq!(seen[1].removed, vec![a]);
    }

    #[test]
    fn timers_run_in_due_order_and_can_be_cancelled() {
        let page = page();
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());
        let _t1 = page.set_timeout(Duration::from_millis(50), Box::new(move || o1.borrow_mut().push(1)));
        let _t2 = page.set_timeout(Duration::from_millis(10), Box::new(move || o2.borrow_mut().push(2)));
        let t3 = page.set_timeout(Duration::from_millis(20), Box::new(move || o3.borrow_mut().push(3)));
        t3.cancel();

        page.advance(Duration::from_millis(30));
        assert_eq!(*order.borrow(), vec![2]);
        page.advance(Duration::from_millis(30));
        assert_eq!(*order.borrow(), vec![2, 1]);
        assert_eq!(page.now(), Duration::from_millis(60));
    }

    #[test]
    fn play_requests_consult_the_gate() {
        struct DenyAll;
        impl PlaybackGate for DenyAll {
            fn check(&self, media: ElementId) -> Result<(), PlaybackBlocked> {
                Err(PlaybackBlocked {
                    media,
                    reason: "test".into(),
                })
            }
        }

        let page = page();
        let video = page.insert(None, ElementSpec::video());
        let plays = Rc::new(Cell::new(0));
        let counter = plays.clone();
        let _sub = page.on_play(Rc::new(move |_| counter.set(counter.get() + 1)));

        page.set_playback_gate(Some(Rc::new(DenyAll)));
        assert!(page.request_play(video).is_err());
        assert!(page.is_paused(video));
        assert_eq!(plays.get(), 0);

        page.set_playback_gate(None);
        assert!(page.request_play(video).is_ok());
        assert!(!page.is_paused(video));
        assert_eq!(plays.get(), 1);
    }

    #[test]
    fn dropping_subscriptions_unregisters_listeners() {
        let page = page();
        let sub = page.on_user_input(Rc::new(|| {}));
        let _play = page.on_play(Rc::new(|_| {}));
        assert_eq!(page.snapshot().input_listeners, 1);
        drop(sub);
        let snap = page.snapshot();
        assert_eq!(snap.input_listeners, 0);
        assert_eq!(snap.play_listeners, 1);
    }

    #[test]
    fn stylesheet_injection_needs_a_head() {
        let page = page();
        assert!(page.inject_stylesheet("img { filter: none }").is_some());
        assert_eq!(page.stylesheets().len(), 1);

        page.remove_element(page.head().unwrap());
        assert!(page.inject_stylesheet("img { filter: none }").is_none());
    }
}
