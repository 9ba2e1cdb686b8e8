pub mod config;
pub mod overrides;
pub mod rules;
pub mod schedule;
pub mod simulate;
pub mod status;
pub mod watch;

use std::sync::Arc;

use overstim_core::{ChannelTransport, ClockHost, Request, Response, TomlSettingsStore};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Clock host over the settings file, with no pages connected.
pub fn open_host() -> Result<ClockHost, Box<dyn std::error::Error>> {
    let store = TomlSettingsStore::open()?;
    Ok(ClockHost::new(
        Arc::new(store),
        Arc::new(ChannelTransport::new()),
    ))
}

/// Send a request and turn a failed ack into an error.
pub fn send(host: &ClockHost, request: Request) -> Result<Response, Box<dyn std::error::Error>> {
    match host.handle(request) {
        Response::Ack {
            ok: false,
            error,
        } => Err(error.unwrap_or_else(|| "request rejected".into()).into()),
        response => Ok(response),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
