//! Rule evaluation context.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::RuleId;
use crate::page::Page;

/// Per-domain override.
///
/// `enabled: Some(false)` turns every rule off for the domain. An
/// `allowed_rule_ids` list restricts the domain to those rules. With neither
/// set the global defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_rule_ids: Option<BTreeSet<RuleId>>,
}

impl DomainOverride {
    /// Override that switches the domain off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            allowed_rule_ids: None,
        }
    }

    /// Override that limits the domain to `ids`.
    pub fn allow<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RuleId>,
    {
        Self {
            enabled: None,
            allowed_rule_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }

    /// Whether this override lets rule `id` run.
    pub fn permits(&self, id: &str) -> bool {
        if self.is_disabled() {
            return false;
        }
        match &self.allowed_rule_ids {
            Some(allowed) => allowed.contains(id),
            None => true,
        }
    }
}

/// Calm state as delivered to a page host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalmSnapshot {
    pub calm_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_override: Option<DomainOverride>,
    /// Globally selected rules; empty selects every rule.
    #[serde(default)]
    pub enabled_rule_ids: BTreeSet<RuleId>,
}

impl CalmSnapshot {
    /// Fallback when the clock host cannot be reached.
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Immutable input to one round of rule evaluation.
#[derive(Clone)]
pub struct RuleContext {
    url: Url,
    domain: String,
    current_time: DateTime<Utc>,
    calm_active: bool,
    domain_override: Option<DomainOverride>,
    enabled_rule_ids: BTreeSet<RuleId>,
    page: Rc<dyn Page>,
}

impl RuleContext {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host name of the page, empty for host-less URLs.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn calm_active(&self) -> bool {
        self.calm_active
    }

    pub fn domain_override(&self) -> Option<&DomainOverride> {
        self.domain_override.as_ref()
    }

    pub fn enabled_rule_ids(&self) -> &BTreeSet<RuleId> {
        &self.enabled_rule_ids
    }

    /// Whether the global rule selection includes `id`.
    pub fn rule_selected(&self, id: &str) -> bool {
        self.enabled_rule_ids.is_empty() || self.enabled_rule_ids.contains(id)
    }

    pub fn page(&self) -> &Rc<dyn Page> {
        &self.page
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("url", &self.url.as_str())
            .field("domain", &self.domain)
            .field("current_time", &self.current_time)
            .field("calm_active", &self.calm_active)
            .field("domain_override", &self.domain_override)
            .field("enabled_rule_ids", &self.enabled_rule_ids)
            .finish_non_exhaustive()
    }
}

/// Build a fresh context from the page's current location and `snapshot`.
pub fn build_rule_context(
    page: &Rc<dyn Page>,
    snapshot: &CalmSnapshot,
    current_time: DateTime<Utc>,
) -> RuleContext {
    let url = page.location();
    let domain = url.host_str().unwrap_or_default().to_string();
    RuleContext {
        url,
        domain,
        current_time,
        calm_active: snapshot.calm_active,
        domain_override: snapshot.domain_override.clone(),
        enabled_rule_ids: snapshot.enabled_rule_ids.clone(),
        page: Rc::clone(page),
    }
}
