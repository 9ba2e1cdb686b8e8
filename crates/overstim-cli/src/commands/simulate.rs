use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Args;
use overstim_core::error::TransportError;
use overstim_core::page::{ElementSpec, PageSnapshot};
use overstim_core::storage::MemorySettingsStore;
use overstim_core::{
    ChannelTransport, ClockClient, ClockHost, LocalClockClient, MemoryPage, PageAgent, Request,
    Response, SettingsStore, SolarCalculator, TimeSource, TomlSettingsStore,
};
use serde::Serialize;

use super::{print_json, CliResult};

#[derive(Args)]
pub struct SimulateArgs {
    /// Page address; its host is matched against site overrides
    #[arg(long, default_value = "https://www.example.com/")]
    pub url: String,
    /// Evaluate the schedule at this instant (RFC 3339) instead of now
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
    /// Treat calm mode as active regardless of the schedule
    #[arg(long)]
    pub calm: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Report {
    url: String,
    time: DateTime<Utc>,
    calm_active: bool,
    applied_rules: Vec<String>,
    restored: bool,
    page: PageSnapshot,
}

struct FixedTime(DateTime<Utc>);

impl TimeSource for FixedTime {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Reports calm mode as active whatever the clock says.
struct ForcedCalm(LocalClockClient);

#[async_trait(?Send)]
impl ClockClient for ForcedCalm {
    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        match self.0.request(request).await? {
            Response::CalmState {
                domain_override,
                current_time,
                enabled_rule_ids,
                ..
            } => Ok(Response::CalmState {
                calm_active: true,
                domain_override,
                current_time,
                enabled_rule_ids,
            }),
            other => Ok(other),
        }
    }
}

pub fn run(args: SimulateArgs) -> CliResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let report = runtime.block_on(simulate(&args))?;

    if args.json {
        return print_json(&report);
    }
    println!("Page:      {}", report.url);
    println!("Time:      {}", report.time.to_rfc3339());
    println!(
        "Calm mode: {}",
        if report.calm_active { "active" } else { "inactive" }
    );
    if report.applied_rules.is_empty() {
        println!("Applied:   none");
    } else {
        println!("Applied:   {}", report.applied_rules.join(", "));
    }
    println!(
        "Restored:  {}",
        if report.restored { "yes" } else { "no" }
    );
    Ok(())
}

async fn simulate(args: &SimulateArgs) -> Result<Report, Box<dyn std::error::Error>> {
    let settings = TomlSettingsStore::open()?.load_or_default();
    let time = args.at.unwrap_or_else(Utc::now);
    let host = Arc::new(ClockHost::with_sources(
        Arc::new(MemorySettingsStore::with_settings(settings)),
        Arc::new(ChannelTransport::new()),
        Arc::new(FixedTime(time)),
        Arc::new(SolarCalculator),
    ));

    let page = sample_page(&args.url)?;
    let pristine = page.snapshot();
    let client = LocalClockClient::new(host.clone());

    let (applied_rules, during) = if args.calm {
        run_agent(&page, ForcedCalm(client)).await
    } else {
        run_agent(&page, client).await
    };
    page.flush_mutations();

    Ok(Report {
        url: args.url.clone(),
        time,
        calm_active: args.calm || host.calm_active(),
        applied_rules,
        restored: page.snapshot() == pristine,
        page: during,
    })
}

/// Initialize an agent, capture the adapted page, then tear it down.
async fn run_agent<C: ClockClient>(page: &Rc<MemoryPage>, client: C) -> (Vec<String>, PageSnapshot) {
    let agent = PageAgent::new(page.clone(), client);
    agent.initialize().await;
    page.flush_mutations();
    let applied = agent.applied_rule_ids();
    let snapshot = page.snapshot();
    agent.teardown();
    (applied, snapshot)
}

/// A page with one of everything the rules touch.
fn sample_page(url: &str) -> Result<Rc<MemoryPage>, url::ParseError> {
    let page = MemoryPage::new(url)?;
    let feed = page.insert(
        None,
        ElementSpec::new("div")
            .attr("role", "feed")
            .scrollable(10_000.0, 760.0),
    );
    page.insert(Some(feed), ElementSpec::video().autoplay());
    page.insert(
        Some(feed),
        ElementSpec::new("img").attr("class", "thumbnail"),
    );
    page.insert(None, ElementSpec::audio().autoplay());
    page.flush_mutations();
    Ok(page)
}
