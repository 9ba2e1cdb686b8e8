use std::collections::BTreeSet;

use clap::Subcommand;
use overstim_core::rules::{RuleId, BUILTIN_RULE_IDS};
use overstim_core::{Request, Response};

use super::{open_host, print_json, send, CliResult};

#[derive(Subcommand)]
pub enum RulesAction {
    /// List built-in rules and whether each is selected
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn one rule on or off for every site
    Toggle {
        /// Rule id, e.g. "thumbnail-dimming"
        rule_id: String,
    },
}

#[derive(serde::Serialize)]
struct RuleRow {
    id: &'static str,
    enabled: bool,
}

pub fn run(action: RulesAction) -> CliResult {
    let host = open_host()?;
    match action {
        RulesAction::List { json } => {
            let settings = host.settings();
            let rows: Vec<RuleRow> = BUILTIN_RULE_IDS
                .iter()
                .map(|&id| RuleRow {
                    id,
                    enabled: settings.rule_enabled(id),
                })
                .collect();
            if json {
                return print_json(&rows);
            }
            for row in rows {
                let mark = if row.enabled { "on " } else { "off" };
                println!("{mark}  {}", row.id);
            }
        }
        RulesAction::Toggle { rule_id } => {
            match send(&host, Request::ToggleRule { rule_id })? {
                Response::RuleToggled { rule_id, enabled } => {
                    let state = if enabled { "enabled" } else { "disabled" };
                    println!("{rule_id} {state}");
                }
                other => return Err(format!("unexpected response: {other:?}").into()),
            }
        }
    }
    Ok(())
}

/// Summary of the global selection; empty means every rule.
pub fn describe(enabled: &BTreeSet<RuleId>) -> String {
    if enabled.is_empty() {
        "all".to_string()
    } else {
        enabled.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
