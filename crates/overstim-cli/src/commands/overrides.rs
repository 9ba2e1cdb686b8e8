use clap::Subcommand;
use overstim_core::rules::{is_builtin, DomainOverride};
use overstim_core::{Request, Response, SettingsStore, TomlSettingsStore};

use super::{open_host, print_json, send, CliResult};

#[derive(Subcommand)]
pub enum OverrideAction {
    /// List every site override
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Switch calm mode off for a site, or back on if it already is
    Toggle {
        /// Site host name, e.g. "www.example.com"
        domain: String,
    },
    /// Run only the given rules on a site
    Allow {
        domain: String,
        /// Rule ids to keep active
        #[arg(required = true)]
        rule_ids: Vec<String>,
    },
    /// Remove a site override
    Clear { domain: String },
}

pub fn run(action: OverrideAction) -> CliResult {
    match action {
        OverrideAction::List { json } => {
            let settings = open_host()?.settings();
            if json {
                return print_json(&settings.domain_overrides);
            }
            if settings.domain_overrides.is_empty() {
                println!("no site overrides");
            }
            for (domain, value) in &settings.domain_overrides {
                println!("{domain}: {}", describe(Some(value)));
            }
        }
        OverrideAction::Toggle { domain } => {
            let host = open_host()?;
            match send(&host, Request::ToggleSiteOverride { domain })? {
                Response::SiteOverrideToggled { domain, overridden } => {
                    if overridden {
                        println!("calm mode off for {domain}");
                    } else {
                        println!("override removed for {domain}");
                    }
                }
                other => return Err(format!("unexpected response: {other:?}").into()),
            }
        }
        OverrideAction::Allow { domain, rule_ids } => {
            if let Some(unknown) = rule_ids.iter().find(|id| !is_builtin(id)) {
                return Err(format!("unknown rule id: {unknown}").into());
            }
            edit(|settings| {
                settings
                    .domain_overrides
                    .insert(domain.clone(), DomainOverride::allow(rule_ids));
            })?;
            println!("override set for {domain}");
        }
        OverrideAction::Clear { domain } => {
            let mut removed = false;
            edit(|settings| removed = settings.domain_overrides.remove(&domain).is_some())?;
            if removed {
                println!("override removed for {domain}");
            } else {
                println!("no override for {domain}");
            }
        }
    }
    Ok(())
}

/// Edit the stored settings directly; the protocol has no request for
/// allow-lists.
fn edit(change: impl FnOnce(&mut overstim_core::UserSettings)) -> CliResult {
    let store = TomlSettingsStore::open()?;
    let mut settings = store.load_or_default();
    change(&mut settings);
    store.save(&settings)?;
    Ok(())
}

/// Summary of a site's override.
pub fn describe(value: Option<&DomainOverride>) -> String {
    match value {
        None => "global defaults".to_string(),
        Some(o) if o.is_disabled() => "calm mode off".to_string(),
        Some(DomainOverride {
            allowed_rule_ids: Some(ids),
            ..
        }) => format!(
            "only {}",
            ids.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        Some(_) => "global defaults".to_string(),
    }
}
