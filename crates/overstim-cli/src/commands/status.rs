use chrono::Local;
use clap::Args;
use overstim_core::protocol::ExtensionState;
use overstim_core::{Request, Response};

use super::{open_host, print_json, send, CliResult};

#[derive(Args)]
pub struct StatusArgs {
    /// Include the override for this site
    #[arg(long)]
    pub domain: Option<String>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs) -> CliResult {
    let host = open_host()?;
    let state = match send(&host, Request::GetExtensionState { domain: args.domain })? {
        Response::ExtensionState(state) => state,
        other => return Err(format!("unexpected response: {other:?}").into()),
    };

    if args.json {
        return print_json(&state);
    }
    print_human(&state);
    Ok(())
}

fn print_human(state: &ExtensionState) {
    let calm = if state.calm_active { "active" } else { "inactive" };
    println!("Calm mode:       {calm}");
    if !state.enabled {
        println!("Master switch:   off");
    }
    println!(
        "Schedule:        {}",
        super::schedule::describe(&state.schedule)
    );
    match state.next_transition_at {
        Some(at) => println!(
            "Next transition: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Next transition: none"),
    }
    println!("Rules:           {}", super::rules::describe(&state.enabled_rule_ids));
    if let Some(domain) = &state.domain {
        println!(
            "Site {domain}: {}",
            super::overrides::describe(state.domain_override.as_ref())
        );
    }
}
