//! End-to-end tests: clock host, push channel, page agent and all four rules
//! against an in-memory page.

use std::rc::Rc;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use overstim_core::page::{ElementSpec, Page};
use overstim_core::rules::{BLOCKED_REASON, SHOW_MORE_LABEL};
use overstim_core::storage::MemorySettingsStore;
use overstim_core::{
    ChannelTransport, ClockHost, LocalClockClient, MemoryPage, PageAgent, PageMessage, Request,
    ScheduleConfig, SolarCalculator, TimeSource, UserSettings,
};

struct ManualTime(Mutex<DateTime<Utc>>);

impl ManualTime {
    fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(at)))
    }

    fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 5, h, m, 0).unwrap()
}

struct World {
    host: Arc<ClockHost>,
    transport: Arc<ChannelTransport>,
    time: Arc<ManualTime>,
}

fn world(now: DateTime<Utc>) -> World {
    let settings = UserSettings {
        schedule: ScheduleConfig::fixed_in("22:00", "07:00", "UTC"),
        ..UserSettings::default()
    };
    let transport = Arc::new(ChannelTransport::new());
    let time = ManualTime::new(now);
    let host = Arc::new(ClockHost::with_sources(
        Arc::new(MemorySettingsStore::with_settings(settings)),
        transport.clone(),
        time.clone(),
        Arc::new(SolarCalculator),
    ));
    World {
        host,
        transport,
        time,
    }
}

struct Fixture {
    page: Rc<MemoryPage>,
    video: overstim_core::page::ElementId,
    audio: overstim_core::page::ElementId,
    feed: overstim_core::page::ElementId,
}

/// A busy page: autoplaying video, an audio element, a long feed and a
/// thumbnail image.
fn busy_page() -> Fixture {
    let page = MemoryPage::new("https://video.example.com/home").unwrap();
    page.set_viewport_height(800.0);
    let feed = page.insert(
        None,
        ElementSpec::new("div")
            .attr("role", "feed")
            .scrollable(12_000.0, 780.0),
    );
    let video = page.insert(Some(feed), ElementSpec::video().autoplay().playing());
    let audio = page.insert(None, ElementSpec::audio());
    page.insert(
        Some(feed),
        ElementSpec::new("img").attr("src", "https://cdn.example.com/thumbnail/1.jpg"),
    );
    page.flush_mutations();
    Fixture {
        page,
        video,
        audio,
        feed,
    }
}

#[tokio::test]
async fn test_four_rules_apply_at_night_and_revert_in_the_morning() {
    let world = world(at(23, 30));
    let mut rx = world.transport.connect();
    let fx = busy_page();
    let pristine = fx.page.snapshot();

    let agent = PageAgent::new(fx.page.clone(), LocalClockClient::new(world.host.clone()));
    agent.initialize().await;
    assert_eq!(agent.applied_rule_ids().len(), 4);

    // autoplay-block
    assert_eq!(fx.page.attribute(fx.video, "autoplay"), None);
    assert!(fx.page.is_paused(fx.video));
    let err = fx.page.request_play(fx.video).unwrap_err();
    assert_eq!(err.reason, BLOCKED_REASON);

    // infinite-scroll-block
    assert_eq!(
        fx.page.style_property(fx.feed, "height").as_deref(),
        Some("2000px")
    );
    let buttons: Vec<_> = fx
        .page
        .children(fx.feed)
        .into_iter()
        .filter(|c| fx.page.text(*c).as_deref() == Some(SHOW_MORE_LABEL))
        .collect();
    assert_eq!(buttons.len(), 1);

    // thumbnail-dimming
    assert_eq!(fx.page.stylesheets().len(), 1);

    // audio-surprise-block
    assert!(fx.page.is_muted(fx.audio));
    assert!(fx.page.is_muted(fx.video));

    // A user click is trusted for the autoplay gate.
    fx.page.click(buttons[0]);
    assert!(fx.page.request_play(fx.video).is_ok());

    // Morning: the clock flips, the host pushes, the page reverts.
    world.time.set(at(7, 0));
    world.host.clock().refresh();
    let message = rx.try_recv().unwrap();
    assert_eq!(
        message,
        PageMessage::CalmStateChanged {
            calm_active: false,
            overrides_by_domain: Default::default(),
            enabled_rule_ids: Default::default(),
        }
    );
    agent.handle_message(&message);
    assert!(agent.applied_rule_ids().is_empty());

    fx.page.pause(fx.video);
    fx.page.set_scroll_top(fx.feed, 0.0);
    fx.page.advance(std::time::Duration::from_secs(1));
    agent.teardown();
    fx.page.flush_mutations();

    let mut restored = fx.page.snapshot();
    // The paused video was playing before calm mode started; pausing is the
    // one change that is not undone.
    for node in restored.nodes.iter_mut().filter(|n| n.id == fx.video) {
        node.paused = Some(false);
    }
    assert_eq!(restored, pristine);
}

#[tokio::test]
async fn test_site_override_is_pushed_and_honoured() {
    let world = world(at(23, 0));
    let mut rx = world.transport.connect();
    let fx = busy_page();
    let agent = PageAgent::new(fx.page.clone(), LocalClockClient::new(world.host.clone()));
    agent.initialize().await;
    assert_eq!(agent.applied_rule_ids().len(), 4);

    world.host.handle(Request::ToggleSiteOverride {
        domain: "video.example.com".into(),
    });
    agent.handle_message(&rx.try_recv().unwrap());
    assert!(agent.applied_rule_ids().is_empty());
    assert_eq!(fx.page.attribute(fx.video, "autoplay").as_deref(), Some(""));

    world.host.handle(Request::ToggleSiteOverride {
        domain: "video.example.com".into(),
    });
    agent.handle_message(&rx.try_recv().unwrap());
    assert_eq!(agent.applied_rule_ids().len(), 4);
}

#[tokio::test]
async fn test_global_rule_selection_and_master_switch() {
    let world = world(at(1, 0));
    let mut rx = world.transport.connect();
    let fx = busy_page();
    let agent = PageAgent::new(fx.page.clone(), LocalClockClient::new(world.host.clone()));
    agent.initialize().await;

    for rule_id in ["autoplay-block", "infinite-scroll-block"] {
        world.host.handle(Request::ToggleRule {
            rule_id: rule_id.into(),
        });
        agent.handle_message(&rx.try_recv().unwrap());
    }
    assert_eq!(
        agent.applied_rule_ids(),
        vec!["thumbnail-dimming", "audio-surprise-block"]
    );
    assert!(fx.page.style_property(fx.feed, "height").is_none());

    world.host.handle(Request::SetEnabled { enabled: false });
    agent.handle_message(&rx.try_recv().unwrap());
    assert!(agent.applied_rule_ids().is_empty());

    // A fresh page in the same state sees calm mode off.
    let other = MemoryPage::new("https://other.example.com/").unwrap();
    let other_agent = PageAgent::new(other.clone(), LocalClockClient::new(world.host.clone()));
    other_agent.initialize().await;
    assert!(other_agent.applied_rule_ids().is_empty());
    assert!(other.playback_gate().is_none());
}
