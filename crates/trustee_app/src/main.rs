//! Trustee host: reads line commands from stdin and prints service events.

mod commands;
mod config;
mod logging;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use trustee_core::Request;
use trustee_engine::{
    ensure_data_dir, MemoryDatabase, ServiceEvent, ServiceParts, SnapshotFile, TrusteeService,
};
use trustee_logging::{trustee_info, trustee_warn};

use crate::commands::{parse_line, Input};
use crate::config::{AppConfig, CONFIG_FILENAME};

const STORE_FILENAME: &str = "trustee.json";
const EVENT_POLL: Duration = Duration::from_millis(50);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let config = AppConfig::load(&config_path)?;
    ensure_data_dir(&config.data_dir)
        .with_context(|| format!("cannot use data directory {}", config.data_dir.display()))?;
    logging::initialize(config.log_destination, config.level()?, &config.data_dir);
    trustee_info!("Starting with data directory {}", config.data_dir.display());

    let db = MemoryDatabase::with_snapshot(SnapshotFile::new(config.data_dir.join(STORE_FILENAME)));
    let trustee_config = config.trustee_config();
    let parts = ServiceParts::new(Arc::new(db), &trustee_config)
        .context("cannot set up networking")?;
    let service = TrusteeService::start(trustee_config, parts)?;

    run(&service);
    service.shutdown();
    trustee_info!("Stopped");
    Ok(())
}

fn run(service: &TrusteeService) {
    let lines = spawn_stdin_reader();
    let mut pending = false;
    loop {
        match lines.try_recv() {
            Ok(line) => match parse_line(&line) {
                Ok(Some(Input::Command(command))) => {
                    service.submit(Request::new(command));
                    pending = true;
                }
                Ok(Some(Input::ShowNotifications(shown))) => service.set_show_notifications(shown),
                Ok(Some(Input::Quit)) => break,
                Ok(None) => {}
                Err(err) => eprintln!("error: {err:#}"),
            },
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => break,
        }
        if let Some(event) = service.recv_event_timeout(EVENT_POLL) {
            pending &= !print_event(&event);
        }
    }

    // Let already submitted work report before shutting down.
    while pending {
        match service.recv_event_timeout(DRAIN_TIMEOUT) {
            Some(event) => pending = !print_event(&event),
            None => {
                trustee_warn!("No events for {:?}; shutting down anyway", DRAIN_TIMEOUT);
                break;
            }
        }
    }
}

/// Returns `true` for the idle marker.
fn print_event(event: &ServiceEvent) -> bool {
    match event {
        ServiceEvent::Status(event) => {
            println!("{event}");
            false
        }
        ServiceEvent::Idle => true,
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
