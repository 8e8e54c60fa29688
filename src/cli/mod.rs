use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod envelope;
pub mod run;
pub mod schema;

use config::ConfigArgs;
use envelope::EnvelopeArgs;
use run::RunArgs;
use schema::SchemaArgs;

use service_adaptor::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "service-adaptor",
    about = "Routes service calls to pluggable auth, messaging, storage, contact, shop and push backends",
    version = "0.2.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the adaptor
    Run(RunArgs),

    /// Emit JSON‐Schema
    Schema(SchemaArgs),

    /// Handle configuration
    Config(ConfigArgs),

    /// Inspect message envelopes
    Envelope(EnvelopeArgs),
}

#[derive(Clone)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self { root, config_manager }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
        Commands::Envelope(args) => envelope::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Run(RunArgs::default_runtime())
}
