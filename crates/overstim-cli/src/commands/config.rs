use clap::Subcommand;
use overstim_core::{SettingsStore, TomlSettingsStore, UserSettings};

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a settings value
    Get {
        /// Dot-separated key (e.g. "enabled", "schedule.sleep_start")
        key: String,
    },
    /// Set a settings value
    Set {
        /// Dot-separated key
        key: String,
        /// New value
        value: String,
    },
    /// Print all settings
    List,
    /// Print the settings file location
    Path,
    /// Reset settings to defaults
    Reset,
}

pub fn run(action: ConfigAction) -> CliResult {
    let store = TomlSettingsStore::open()?;
    match action {
        ConfigAction::Get { key } => {
            let settings = store.load_or_default();
            match settings.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut settings = store.load_or_default();
            settings.set(&key, &value)?;
            store.save(&settings)?;
            println!("ok");
        }
        ConfigAction::List => print_json(&store.load_or_default())?,
        ConfigAction::Path => println!("{}", store.path().display()),
        ConfigAction::Reset => {
            store.save(&UserSettings::default())?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}
