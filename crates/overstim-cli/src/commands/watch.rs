use std::sync::Arc;

use chrono::Local;
use clap::Args;
use overstim_core::{ChannelTransport, ClockHost, PageMessage, TomlSettingsStore};

use super::CliResult;

#[derive(Args)]
pub struct WatchArgs {
    /// Print each change as a JSON line
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: WatchArgs) -> CliResult {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch(args))
}

async fn watch(args: WatchArgs) -> CliResult {
    let transport = Arc::new(ChannelTransport::new());
    let host = ClockHost::new(Arc::new(TomlSettingsStore::open()?), transport.clone());
    let mut rx = transport.connect();
    host.start()?;

    let state = host.extension_state(None);
    if args.json {
        println!("{}", serde_json::to_string(&state)?);
    } else {
        println!(
            "{} calm mode {} (schedule: {})",
            Local::now().format("%H:%M:%S"),
            if state.calm_active { "active" } else { "inactive" },
            super::schedule::describe(&state.schedule)
        );
    }

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                print_message(&message, args.json)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    host.stop();
    Ok(())
}

fn print_message(message: &PageMessage, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string(message)?);
        return Ok(());
    }
    let PageMessage::CalmStateChanged { calm_active, .. } = message;
    println!(
        "{} calm mode {}",
        Local::now().format("%H:%M:%S"),
        if *calm_active { "started" } else { "ended" }
    );
    Ok(())
}
