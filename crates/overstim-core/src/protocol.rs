//! Messages between the clock host and page hosts.
//!
//! Everything crossing the boundary is a plain serde value; nothing is
//! shared by reference. On the wire each message is a JSON object tagged by
//! its `type` field.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{CalmSnapshot, DomainOverride, RuleId};
use crate::schedule::ScheduleConfig;

/// Page host (or settings surface) to clock host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetCalmState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
    },
    UpdateSchedule {
        schedule: ScheduleConfig,
    },
    /// Flip the master switch.
    SetEnabled {
        enabled: bool,
    },
    ToggleRule {
        rule_id: RuleId,
    },
    ToggleSiteOverride {
        domain: String,
    },
    GetExtensionState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
    },
}

/// Clock host answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    CalmState {
        calm_active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain_override: Option<DomainOverride>,
        current_time: DateTime<Utc>,
        #[serde(default)]
        enabled_rule_ids: BTreeSet<RuleId>,
    },
    /// Outcome of a settings change.
    Ack {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RuleToggled {
        rule_id: RuleId,
        enabled: bool,
    },
    SiteOverrideToggled {
        domain: String,
        overridden: bool,
    },
    ExtensionState(ExtensionState),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack {
            ok: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Ack {
            ok: false,
            error: Some(message.into()),
        }
    }

    /// The calm snapshot carried by a `CalmState` response.
    pub fn calm_snapshot(&self) -> Option<CalmSnapshot> {
        match self {
            Response::CalmState {
                calm_active,
                domain_override,
                enabled_rule_ids,
                ..
            } => Some(CalmSnapshot {
                calm_active: *calm_active,
                domain_override: domain_override.clone(),
                enabled_rule_ids: enabled_rule_ids.clone(),
            }),
            _ => None,
        }
    }
}

/// Full picture for a settings surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionState {
    pub enabled: bool,
    pub calm_active: bool,
    pub schedule: ScheduleConfig,
    pub current_time: DateTime<Utc>,
    pub next_transition_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_override: Option<DomainOverride>,
    pub enabled_rule_ids: BTreeSet<RuleId>,
}

/// Clock host to page hosts, unsolicited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    CalmStateChanged {
        calm_active: bool,
        #[serde(default)]
        overrides_by_domain: BTreeMap<String, DomainOverride>,
        #[serde(default)]
        enabled_rule_ids: BTreeSet<RuleId>,
    },
}

impl PageMessage {
    /// What a page on `domain` should act on.
    pub fn snapshot_for(&self, domain: &str) -> CalmSnapshot {
        match self {
            PageMessage::CalmStateChanged {
                calm_active,
                overrides_by_domain,
                enabled_rule_ids,
            } => CalmSnapshot {
                calm_active: *calm_active,
                domain_override: overrides_by_domain.get(domain).cloned(),
                enabled_rule_ids: enabled_rule_ids.clone(),
            },
        }
    }
}
