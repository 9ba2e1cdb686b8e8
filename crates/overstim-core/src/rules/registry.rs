//! Rule registry and apply/revert lifecycle.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::{Rule, RuleContext, RuleId};
use crate::error::RuleError;
use crate::fault;

/// Owns the rules of one page and tracks which of them are applied.
///
/// `applied` is always a subset of the registered ids, and an id is in it
/// exactly when its last successful `apply` is newer than its last `revert`.
#[derive(Default)]
pub struct RuleRegistry {
    rules: IndexMap<RuleId, Rc<dyn Rule>>,
    applied: IndexSet<RuleId>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `rule`, replacing any rule with the same id.
    pub fn register(&mut self, rule: Rc<dyn Rule>) {
        let id = rule.id().to_string();
        if self.rules.contains_key(&id) {
            tracing::warn!(rule = %id, "rule already registered; replacing it");
            if self.applied.contains(&id) {
                self.revert_one(&id);
            }
        }
        self.rules.insert(id, rule);
    }

    /// Revert (if applied) and remove the rule with `id`.
    pub fn unregister(&mut self, id: &str) -> Option<Rc<dyn Rule>> {
        if self.applied.contains(id) {
            self.revert_one(id);
        }
        self.rules.shift_remove(id)
    }

    pub fn rule(&self, id: &str) -> Option<&Rc<dyn Rule>> {
        self.rules.get(id)
    }

    /// Registered rules in registration order.
    pub fn rules(&self) -> impl Iterator<Item = &Rc<dyn Rule>> {
        self.rules.values()
    }

    /// Applied rule ids in application order.
    pub fn applied_rule_ids(&self) -> Vec<&str> {
        self.applied.iter().map(String::as_str).collect()
    }

    pub fn is_applied(&self, id: &str) -> bool {
        self.applied.contains(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Bring the applied set in line with `context`.
    ///
    /// Precedence, strongest first: a domain override that disables the
    /// domain, the domain's allow-list, the global rule selection, then the
    /// rule's own `applies`.
    pub fn apply_rules(&mut self, context: &RuleContext) {
        let rules: Vec<(RuleId, Rc<dyn Rule>)> = self
            .rules
            .iter()
            .map(|(id, rule)| (id.clone(), Rc::clone(rule)))
            .collect();

        for (id, rule) in rules {
            let wanted = match admission(&id, rule.as_ref(), context) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::trace!(rule = %id, reason, "rule not admitted");
                    false
                }
            };

            if !wanted {
                if self.applied.contains(&id) {
                    self.revert_one(&id);
                }
                continue;
            }
            if self.applied.contains(&id) {
                continue;
            }

            match fault::guard(|| rule.apply(context)) {
                Ok(Ok(())) => {
                    tracing::debug!(rule = %id, domain = context.domain(), "rule applied");
                    self.applied.insert(id);
                }
                Ok(Err(e)) => {
                    tracing::error!(rule = %id, error = %e, "rule failed to apply");
                }
                Err(message) => {
                    tracing::error!(rule = %id, %message, "rule panicked while applying");
                }
            }
        }
    }

    /// Revert every applied rule, newest application first.
    pub fn revert_all(&mut self) {
        let ids: Vec<RuleId> = self.applied.iter().rev().cloned().collect();
        for id in ids {
            self.revert_one(&id);
        }
        self.applied.clear();
    }

    /// Revert everything, then apply against `context`.
    pub fn reapply(&mut self, context: &RuleContext) {
        self.revert_all();
        self.apply_rules(context);
    }

    /// Silence, revert and drop every rule.
    pub fn teardown(&mut self) {
        for rule in self.rules.values() {
            if let Err(message) = fault::guard(|| rule.quiesce()) {
                tracing::error!(rule = rule.id(), %message, "rule panicked while quiescing");
            }
        }
        self.revert_all();
        self.rules.clear();
    }

    /// Revert one rule. The id leaves the applied set whatever the outcome.
    fn revert_one(&mut self, id: &str) {
        self.applied.shift_remove(id);
        let Some(rule) = self.rules.get(id).cloned() else {
            return;
        };
        match fault::guard(|| rule.revert()) {
            Ok(Ok(())) => tracing::debug!(rule = %id, "rule reverted"),
            Ok(Err(e)) => tracing::error!(rule = %id, error = %e, "rule failed to revert"),
            Err(message) => tracing::error!(rule = %id, %message, "rule panicked while reverting"),
        }
    }
}

fn admission(id: &str, rule: &dyn Rule, context: &RuleContext) -> Result<(), &'static str> {
    if let Some(domain_override) = context.domain_override() {
        if domain_override.is_disabled() {
            return Err("domain disabled");
        }
        if !domain_override.permits(id) {
            return Err("not in domain allow-list");
        }
    }
    if !context.rule_selected(id) {
        return Err("not globally selected");
    }
    if !rule.applies(context) {
        return Err("does not apply");
    }
    Ok(())
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("applied", &self.applied)
            .finish()
    }
}

/// Shorthand used by rules to build their error values.
pub(crate) fn failed(rule: &str, message: impl Into<String>) -> RuleError {
    RuleError::Failed {
        rule: rule.to_string(),
        message: message.into(),
    }
}
