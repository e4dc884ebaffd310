// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod demo_agent;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colloquy_core::{Event, EventBus, EventLog, InMemoryEventStore, ModeratorController, SessionConfig, SessionManager};
use colloquy_model::MockModelClient;
use demo_agent::ModelAgent;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};

const BUILTIN_SCENARIO: &str = r#"
id: builtin-debate
topic: "Should the team adopt a four-day work week?"
phases:
  - id: opening
    speaking_order: round-robin
  - id: rebuttal
    speaking_order: free
    allow_interrupt: true
rules:
  min_rounds: 1
  max_rounds: 4
  speak_interval_ms: 0
  no_progress_timeout_ms: 30000
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::ShowConfig { scenario } => show_config(scenario.as_deref()),
        Commands::Run {
            scenario,
            agents,
            max_rounds,
            no_stream,
        } => run_demo(scenario.as_deref(), agents, max_rounds, no_stream).await,
    }
}

fn load_scenario(path: Option<&std::path::Path>) -> anyhow::Result<colloquy_config::Scenario> {
    match path {
        Some(path) => colloquy_config::load_scenario(path)
            .with_context(|| format!("loading scenario {}", path.display())),
        None => colloquy_config::load_scenario_str(BUILTIN_SCENARIO).context("loading built-in scenario"),
    }
}

fn show_config(scenario: Option<&std::path::Path>) -> anyhow::Result<()> {
    let scenario = load_scenario(scenario)?;
    println!("{}", serde_yaml::to_string(&scenario)?);
    Ok(())
}

async fn run_demo(
    scenario_path: Option<&std::path::Path>,
    agent_names: Vec<String>,
    max_rounds: Option<u32>,
    no_stream: bool,
) -> anyhow::Result<()> {
    let scenario = load_scenario(scenario_path)?;

    let agent_names = if agent_names.is_empty() {
        vec!["alice".to_string(), "bob".to_string()]
    } else {
        agent_names
    };

    let event_log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new())));
    let event_bus = Arc::new(EventBus::new());
    let moderator = Arc::new(ModeratorController::new(event_log.clone(), event_bus.clone()));
    let manager = SessionManager::new(moderator, event_log.clone(), event_bus.clone());

    // Subscribe before the session is created so no early event is missed.
    let subscription = event_bus.subscribe()?;
    let mut receiver = subscription.receiver;

    let agents = agent_names
        .iter()
        .map(|name| {
            let model = Arc::new(MockModelClient::new(name.clone()));
            let system_prompt = format!(
                "You are {name}, a participant in a moderated discussion on: {}",
                scenario.topic
            );
            Arc::new(ModelAgent::new(name.clone(), name.clone(), "participant", None, system_prompt, model))
                as Arc<dyn colloquy_core::Agent>
        })
        .collect();

    let session_id = manager
        .create(SessionConfig {
            topic: scenario.topic.clone(),
            scenario,
            agents,
            max_rounds,
            enable_streaming: if no_stream { Some(false) } else { None },
        })
        .await
        .context("creating session")?;

    println!("session {session_id} created, starting discussion\n");
    manager.start(&session_id).await.context("starting session")?;

    while let Some(event) = receiver.recv().await {
        if event.session_id != session_id {
            continue;
        }
        print_event(&event);
        if matches!(
            event.event_type,
            colloquy_core::EventType::SessionEnd | colloquy_core::EventType::SessionAborted
        ) {
            break;
        }
    }

    manager.delete(&session_id).await.context("tearing down session")?;
    Ok(())
}

fn print_event(event: &Event) {
    let text = event.content.as_text().unwrap_or_default();
    println!("[{:>4}] {:<10} {}: {}", event.sequence, format!("{:?}", event.event_type), event.speaker, text);
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
