//! Thin demonstration CLI over the agent-world core (spec.md §6 "External
//! Interfaces").
//!
//! Not a production daemon: a single-process harness that wires one world,
//! one agent, the C5 subscribers, and a stdout event printer, then drives
//! one human-sent message through the full pipeline. Grounded on the
//! teacher's `main.rs` (parse args, init tracing, build the runtime, run)
//! scaled down to this core's much narrower external surface — there is no
//! TUI or chat transport here, only the bus itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentworld_agent::{Agent, Runtime, World};
use agentworld_config::{AppConfig, DEFAULT_SHELL_TIMEOUT_MS};
use agentworld_exec::ShellCmdTool;
use agentworld_llm::{LlmResponse, ScriptedLlmClient};
use agentworld_memory::InMemoryStorage;
use clap::Parser;
use tracing::info;

/// Runs one message through a single-agent world and prints every event
/// emitted on the bus as it happens.
#[derive(Parser, Debug)]
#[command(name = "agentworld", version, about = "Agent World event-and-orchestration core")]
struct Cli {
    /// Message to publish as the human sender.
    #[arg(long, default_value = "hello")]
    message: String,

    /// Id of the single demo agent.
    #[arg(long, default_value = "assistant")]
    agent_id: String,

    /// Scripted text the demo LLM client returns for the agent's one reply.
    #[arg(long, default_value = "Hello! How can I help?")]
    reply: String,

    /// Directory shell_cmd is scoped to.
    #[arg(long, default_value = ".")]
    working_directory: PathBuf,

    /// How long to let the pipeline run before exiting.
    #[arg(long, default_value_t = 300)]
    wait_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::default());

    let mut world = World::new("demo-world", "Demo World");
    world.tools.register(Box::new(ShellCmdTool::new(cli.working_directory.clone(), DEFAULT_SHELL_TIMEOUT_MS)));
    world.add_agent(Agent::new(cli.agent_id.clone(), cli.agent_id.clone(), "assistant", "scripted", "demo")).await;
    let world = Arc::new(world);

    let storage = Arc::new(InMemoryStorage::new());
    let llm = Arc::new(ScriptedLlmClient::new(vec![LlmResponse::text(cli.reply.clone())]));
    let runtime = Arc::new(Runtime::new(storage, llm));

    for channel in agentworld_bus::events::ALL_CHANNELS {
        let _sub = world.bus.on(channel, |event: agentworld_bus::Event| async move {
            println!("{event:?}");
            Ok(())
        });
    }

    let _persistence = agentworld_runtime::bind_persistence_subscriber(Arc::clone(&world), Arc::clone(&runtime), config);
    let _binding = agentworld_runtime::bind_agent(Arc::clone(&world), Arc::clone(&runtime), cli.agent_id.clone());
    let _title_listener = agentworld_runtime::bind_world_activity_listener(Arc::clone(&world), Arc::clone(&runtime));

    info!(agent_id = %cli.agent_id, message = %cli.message, "publishing demo message");
    agentworld_runtime::publish_message(&world, &cli.message, "human", None, None, None);

    tokio::time::sleep(Duration::from_millis(cli.wait_ms)).await;
    Ok(())
}
