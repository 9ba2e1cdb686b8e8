//! TOML-backed user settings.
//!
//! Stored at `~/.config/overstim/settings.toml`:
//!
//! ```toml
//! enabled = true
//! enabled_rule_ids = []
//!
//! [schedule]
//! type = "fixed"
//! sleep_start = "22:00"
//! sleep_end = "07:00"
//!
//! [domain_overrides."news.example.com"]
//! enabled = false
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::{StorageError, ValidationError};
use crate::rules::{is_builtin, DomainOverride, RuleId, BUILTIN_RULE_IDS};
use crate::schedule::ScheduleConfig;

const SETTINGS_FILE: &str = "settings.toml";

/// Everything the user can configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Master switch; when off calm mode never activates.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Globally selected rules. Empty selects every rule.
    #[serde(default)]
    pub enabled_rule_ids: BTreeSet<RuleId>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub domain_overrides: BTreeMap<String, DomainOverride>,
}

fn default_true() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enabled_rule_ids: BTreeSet::new(),
            schedule: ScheduleConfig::default(),
            domain_overrides: BTreeMap::new(),
        }
    }
}

impl UserSettings {
    /// Check the schedule and every rule id mentioned.
    ///
    /// # Errors
    ///
    /// Returns the first invalid schedule field or unknown rule id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.schedule.validate()?;
        let mentioned = self.enabled_rule_ids.iter().chain(
            self.domain_overrides
                .values()
                .filter_map(|o| o.allowed_rule_ids.as_ref())
                .flatten(),
        );
        for id in mentioned {
            if !is_builtin(id) {
                return Err(ValidationError::UnknownRule(id.clone()));
            }
        }
        Ok(())
    }

    pub fn override_for(&self, domain: &str) -> Option<&DomainOverride> {
        self.domain_overrides.get(domain)
    }

    /// Whether rule `id` is in the global selection.
    pub fn rule_enabled(&self, id: &str) -> bool {
        self.enabled_rule_ids.is_empty() || self.enabled_rule_ids.contains(id)
    }

    /// Flip rule `id` in the global selection and return its new state.
    ///
    /// An empty selection means "all rules", so disabling from it selects
    /// every other built-in rule, and a selection that grows back to every
    /// built-in rule collapses to empty.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and when `id` is the only rule left enabled.
    pub fn toggle_rule(&mut self, id: &str) -> Result<bool, ValidationError> {
        if !is_builtin(id) {
            return Err(ValidationError::UnknownRule(id.to_string()));
        }
        if self.rule_enabled(id) {
            let remaining: BTreeSet<RuleId> = if self.enabled_rule_ids.is_empty() {
                BUILTIN_RULE_IDS
                    .iter()
                    .filter(|r| **r != id)
                    .map(|r| r.to_string())
                    .collect()
            } else {
                self.enabled_rule_ids
                    .iter()
                    .filter(|r| r.as_str() != id)
                    .cloned()
                    .collect()
            };
            if remaining.is_empty() {
                return Err(ValidationError::LastEnabledRule(id.to_string()));
            }
            self.enabled_rule_ids = remaining;
            Ok(false)
        } else {
            self.enabled_rule_ids.insert(id.to_string());
            if BUILTIN_RULE_IDS
                .iter()
                .all(|r| self.enabled_rule_ids.contains(*r))
            {
                self.enabled_rule_ids.clear();
            }
            Ok(true)
        }
    }

    /// Remove the override for `domain` if there is one, otherwise disable
    /// the domain. Returns whether the domain now has an override.
    pub fn toggle_site_override(&mut self, domain: &str) -> bool {
        if self.domain_overrides.remove(domain).is_some() {
            false
        } else {
            self.domain_overrides
                .insert(domain.to_string(), DomainOverride::disabled());
            true
        }
    }

    /// Get a value as a string by dot-separated key, e.g. `schedule.sleep_start`.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set an existing value by dot-separated key. The result is validated
    /// before it replaces `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting settings do not validate.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let invalid = |message: String| StorageError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        set_json_value_by_path(&mut json, key, value)?;
        let updated: UserSettings =
            serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate().map_err(|e| invalid(e.to_string()))?;
        *self = updated;
        Ok(())
    }
}

fn get_json_value_by_path<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    if key.is_empty() {
        return None;
    }

    let mut current = root;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn set_json_value_by_path(
    root: &mut serde_json::Value,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    let unknown = || StorageError::UnknownKey(key.to_string());
    let invalid = |message: String| StorageError::InvalidValue {
        key: key.to_string(),
        message,
    };

    let mut parts = key.split('.').peekable();
    if key.is_empty() {
        return Err(unknown());
    }

    let mut current = root;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    if let Ok(n) = value.parse::<i64>() {
                        serde_json::Value::Number(n.into())
                    } else if let Ok(n) = value.parse::<f64>() {
                        serde_json::Number::from_f64(n)
                            .map(serde_json::Value::Number)
                            .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as number")));
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        current = current.get_mut(part).ok_or_else(unknown)?;
    }

    Err(unknown())
}

/// Persistence seam for [`UserSettings`].
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<UserSettings>, StorageError>;

    fn save(&self, settings: &UserSettings) -> Result<(), StorageError>;

    /// Load, falling back to defaults when absent or unreadable.
    fn load_or_default(&self) -> UserSettings {
        match self.load() {
            Ok(Some(settings)) => settings,
            Ok(None) => UserSettings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "settings unreadable; using defaults");
                UserSettings::default()
            }
        }
    }
}

/// Settings stored as a TOML file.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    /// Store at the default location in the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn open() -> Result<Self, StorageError> {
        Ok(Self::with_path(data_dir()?.join(SETTINGS_FILE)))
    }

    /// Store at a custom path (for testing).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<Option<UserSettings>, StorageError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let settings: UserSettings = toml::from_str(&content)?;
        Ok(Some(settings))
    }

    fn save(&self, settings: &UserSettings) -> Result<(), StorageError> {
        let io_error = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = toml::to_string_pretty(settings)?;
        std::fs::write(&self.path, content).map_err(io_error)?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<UserSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: UserSettings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<UserSettings>, StorageError> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, settings: &UserSettings) -> Result<(), StorageError> {
        *self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, TomlSettingsStore) {
        let dir = TempDir::new().unwrap();
        let store = TomlSettingsStore::with_path(dir.path().join("nested").join(SETTINGS_FILE));
        (dir, store)
    }

    #[test]
    fn missing_file_loads_as_none_and_defaults() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());
        let settings = store.load_or_default();
        assert_eq!(settings, UserSettings::default());
        assert_eq!(settings.schedule, ScheduleConfig::fixed("22:00", "07:00"));
    }

    #[test]
    fn settings_roundtrip_through_toml() {
        let (_dir, store) = store();
        let mut settings = UserSettings {
            schedule: ScheduleConfig::sunset_sunrise(48.85, 2.35),
            ..UserSettings::default()
        };
        settings.toggle_site_override("news.example.com");
        settings.domain_overrides.insert(
            "video.example.com".into(),
            DomainOverride::allow(["autoplay-block"]),
        );
        settings.toggle_rule("thumbnail-dimming").unwrap();

        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), Some(settings));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "enabled = false\n").unwrap();

        let settings = store.load().unwrap().unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.schedule, ScheduleConfig::default());
        assert!(settings.domain_overrides.is_empty());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "enabled = [[[").unwrap();

        assert!(matches!(store.load(), Err(StorageError::Parse(_))));
        assert_eq!(store.load_or_default(), UserSettings::default());
    }

    #[test]
    fn toggle_rule_from_all_and_back() {
        let mut settings = UserSettings::default();
        assert!(!settings.toggle_rule("autoplay-block").unwrap());
        assert!(!settings.rule_enabled("autoplay-block"));
        assert!(settings.rule_enabled("thumbnail-dimming"));
        assert_eq!(settings.enabled_rule_ids.len(), 3);

        assert!(settings.toggle_rule("autoplay-block").unwrap());
        assert!(settings.enabled_rule_ids.is_empty());
    }

    #[test]
    fn toggle_rule_rejects_unknown_and_last() {
        let mut settings = UserSettings::default();
        assert_eq!(
            settings.toggle_rule("no-such-rule"),
            Err(ValidationError::UnknownRule("no-such-rule".into()))
        );

        settings.enabled_rule_ids = ["audio-surprise-block".to_string()].into();
        assert_eq!(
            settings.toggle_rule("audio-surprise-block"),
            Err(ValidationError::LastEnabledRule("audio-surprise-block".into()))
        );
    }

    #[test]
    fn toggle_site_override_flips() {
        let mut settings = UserSettings::default();
        assert!(settings.toggle_site_override("example.com"));
        assert!(settings.override_for("example.com").unwrap().is_disabled());
        assert!(!settings.toggle_site_override("example.com"));
        assert!(settings.override_for("example.com").is_none());
    }

    #[test]
    fn get_and_set_by_dot_path() {
        let mut settings = UserSettings::default();
        assert_eq!(settings.get("schedule.sleep_start").as_deref(), Some("22:00"));
        assert_eq!(settings.get("enabled").as_deref(), Some("true"));
        assert_eq!(settings.get("schedule.type").as_deref(), Some("fixed"));

        settings.set("schedule.sleep_start", "21:30").unwrap();
        settings.set("enabled", "false").unwrap();
        assert_eq!(settings.schedule, ScheduleConfig::fixed("21:30", "07:00"));
        assert!(!settings.enabled);
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut settings = UserSettings::default();
        assert!(matches!(
            settings.set("schedule.nonsense", "1"),
            Err(StorageError::UnknownKey(_))
        ));
        assert!(matches!(
            settings.set("enabled", "maybe"),
            Err(StorageError::InvalidValue { .. })
        ));
        assert!(matches!(
            settings.set("schedule.sleep_end", "22:00"),
            Err(StorageError::InvalidValue { .. })
        ));
        assert_eq!(settings, UserSettings::default());
    }

    #[test]
    fn validate_flags_unknown_rule_ids() {
        let mut settings = UserSettings::default();
        settings
            .domain_overrides
            .insert("example.com".into(), DomainOverride::allow(["bogus"]));
        assert_eq!(
            settings.validate(),
            Err(ValidationError::UnknownRule("bogus".into()))
        );
    }
}
