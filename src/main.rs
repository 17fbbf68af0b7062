mod activity_log;
mod broker;
mod cancel;
mod commands;
mod config;
mod confirm;
mod console;
mod cursor;
mod demo;
mod display;
mod events;
mod explorer;
mod ipc;
mod listing;
mod logging;
mod notice;
mod session;
mod subject;
mod tail;
mod util;

use std::process::ExitCode;
use std::sync::Arc;

use futures::channel::mpsc;
use tracing::{error, info};

use crate::broker::{MemoryBroker, MemoryProvider};
use crate::config::ConsoleConfig;
use crate::console::Console;
use crate::events::UiEvent;

fn usage() {
    eprintln!("usage: natsdash [--demo] [--connect <profile>]");
    eprintln!();
    eprintln!("  --demo               start with an in-process broker holding sample streams");
    eprintln!("  --connect <profile>  connect to a saved profile on startup");
    eprintln!("  --version            print version and exit");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  NATSDASH_CONFIG_DIR     profile directory");
    eprintln!("  NATSDASH_LOG_DIR        activity and diagnostics log directory");
    eprintln!("  NATSDASH_FETCH_WAIT_MS  fetch wait per navigation step (default 1000)");
    eprintln!("  NATSDASH_POLL_MS        activity tail poll interval (default 100)");
    eprintln!("  NATSDASH_LOG            diagnostics filter (default info)");
}

fn main() -> ExitCode {
    let mut config = ConsoleConfig::from_env();
    let mut connect_to = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--demo" => config.demo = true,
            "--connect" => match args.next() {
                Some(name) => connect_to = Some(name),
                None => {
                    usage();
                    return ExitCode::FAILURE;
                }
            },
            "--version" | "-V" => {
                println!(
                    "natsdash {} ({})",
                    env!("NATSDASH_VERSION"),
                    env!("NATSDASH_COMMIT")
                );
                return ExitCode::SUCCESS;
            }
            "--help" | "-h" => {
                usage();
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("unknown argument: {other}");
                usage();
                return ExitCode::FAILURE;
            }
        }
    }

    let diagnostics = logging::init(&config.log_dir);
    info!(
        version = env!("NATSDASH_VERSION"),
        commit = env!("NATSDASH_COMMIT"),
        demo = config.demo,
        "natsdash starting"
    );

    let broker = Arc::new(MemoryBroker::new());
    let demo_profile = if config.demo {
        if let Err(e) = demo::seed(&broker) {
            error!(error = %e, "demo seed failed");
            eprintln!("failed to seed demo broker: {e}");
            return ExitCode::FAILURE;
        }
        connect_to.get_or_insert_with(|| demo::DEMO_PROFILE.to_string());
        Some(demo::demo_profile())
    } else {
        None
    };

    let (tx, rx) = mpsc::unbounded::<UiEvent>();
    ipc::spawn_stdin_reader(tx.clone());
    ipc::spawn_socket_listener(tx.clone());
    ipc::spawn_ticker(tx.clone(), ipc::TICK_INTERVAL);

    println!(
        "natsdash v{} ({}); type 'help' for commands",
        env!("NATSDASH_VERSION"),
        env!("NATSDASH_COMMIT")
    );
    if let Some(path) = &diagnostics {
        println!("diagnostics: {}", path.display());
    }

    let mut console = Console::new(
        config,
        Arc::new(MemoryProvider::new(broker)),
        demo_profile,
        tx,
        Box::new(std::io::stdout()),
    );
    if let Some(name) = connect_to {
        if let Err(e) = console.connect(&name) {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }

    match console.run(rx) {
        Ok(()) => {
            info!("natsdash stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "console failed");
            eprintln!("natsdash: {e}");
            ExitCode::FAILURE
        }
    }
}
