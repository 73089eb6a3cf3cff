//! Tally terminal: line-driven inventory device.
//!
//! Reads commands from stdin and drives one [`SessionManager`]. Endpoints
//! come from `TALLY_API_URL` / `TALLY_HUB_URL`, the bearer token from
//! `TALLY_TOKEN`; logging honours `RUST_LOG` (default `info`).

mod commands;

use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use commands::{Command, USAGE};
use tally_core::{default_conditions, FeedbackTone};
use tally_sync::{
    HttpInventoryApi, HubClient, InventoryApi, SessionError, SessionManager, SessionRole,
    StaticToken, StoreHandle, TallyConfig, TokenProvider,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TallyConfig::from_env();
    info!(
        "Starting tally terminal (api {}, hub {})",
        config.api.base_url, config.hub.url
    );

    let tokens: Arc<dyn TokenProvider> = Arc::new(match config.token.clone() {
        Some(token) => StaticToken::new(token),
        None => {
            warn!("TALLY_TOKEN is not set, connecting anonymously");
            StaticToken::anonymous()
        }
    });
    let api = match HttpInventoryApi::new(&config.api, Arc::clone(&tokens)) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!("Invalid API configuration: {e}");
            std::process::exit(1);
        }
    };
    let channel = Arc::new(HubClient::new(config.hub.clone(), tokens));
    let store = StoreHandle::new();
    let manager = SessionManager::new(
        api.clone(),
        Arc::clone(&channel),
        store.clone(),
        config.session.clone(),
    );

    tokio::spawn(report_changes(store));

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Could not read stdin: {e}");
                break;
            }
        };
        match commands::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(&manager, api.as_ref(), command).await,
            Err(message) => println!("{message}"),
        }
    }

    channel.disconnect().await;
    info!("Tally terminal stopped");
}

/// Print the completion line whenever the scanned set changes.
async fn report_changes(store: StoreHandle) {
    let mut changes = store.changes();
    while changes.changed().await.is_ok() {
        if store.is_loading().await {
            continue;
        }
        println!("  [sync] {}", store.completion().await);
    }
}

async fn execute(manager: &SessionManager, api: &dyn InventoryApi, command: Command) {
    match command {
        Command::Start { zone, group } => match manager.start_session(zone, group).await {
            Ok(ticket) => println!(
                "Inventory {} started. Invitation code: {}",
                ticket.session_id,
                ticket.invitation_code.as_deref().unwrap_or("-")
            ),
            Err(e) => println!("{e}"),
        },
        Command::Join(code) => match manager.join_session(&code).await {
            Ok(joined) => println!(
                "Joined inventory {} in zone {}",
                joined.session_id, joined.zone_id
            ),
            Err(e) => println!("{e}"),
        },
        Command::Scan { code, state } => match manager.submit_scan(&code, state).await {
            Ok(outcome) => {
                let feedback = outcome.feedback();
                let marker = match feedback.tone {
                    FeedbackTone::Success => "ok",
                    FeedbackTone::Warning => "!!",
                    FeedbackTone::Error => "xx",
                    FeedbackTone::Info => "..",
                };
                println!("[{marker}] {}", feedback.message);
            }
            Err(SessionError::Submission(e)) => println!("[xx] {}", e.user_message()),
            Err(e) => println!("{e}"),
        },
        Command::Conditions => {
            let conditions = api.item_conditions().await.unwrap_or_else(|e| {
                warn!("Could not load item conditions, using defaults: {e}");
                default_conditions()
            });
            for condition in conditions {
                println!("  {:>2}  {}", condition.id, condition.name);
            }
        }
        Command::Status => print_status(manager).await,
        Command::Finish {
            observations,
            force,
        } => {
            let report = manager.completion().await;
            if !report.is_complete {
                if !force {
                    println!(
                        "Inventory incomplete: {report}. Use `finish! [observations]` to close it anyway."
                    );
                    return;
                }
                warn!("Closing incomplete inventory: {report}");
            }
            match manager.finish_session(&observations).await {
                Ok(()) => println!("Inventory finished ({report})"),
                Err(e) => println!("{e}"),
            }
        }
        Command::Reset => {
            manager.reset().await;
            println!("Session cleared");
        }
        Command::Help => println!("{USAGE}"),
        Command::Quit => {}
    }
}

async fn print_status(manager: &SessionManager) {
    let Some(session) = manager.active_session() else {
        println!("No active inventory");
        return;
    };
    let role = match &session.role {
        SessionRole::Host {
            invitation_code: Some(code),
        } => format!("host, code {code}"),
        SessionRole::Host { .. } => "host".to_string(),
        SessionRole::Guest => "guest".to_string(),
    };
    println!(
        "Inventory {} in zone {} ({role}), channel {:?}",
        session.session_id,
        session.zone_id,
        manager.channel().state()
    );

    let store = manager.store();
    if let Some(message) = store.catalog_error().await {
        println!("  {message}");
    }
    for category in store.derived_view().await.categories {
        println!(
            "  {} {}/{}",
            category.name, category.scanned_count, category.expected_count
        );
        for item in category.items {
            let mark = if item.completed { 'x' } else { ' ' };
            println!("    [{mark}] {} {}", item.code, item.name);
        }
    }
    println!("  {}", manager.completion().await);
}
