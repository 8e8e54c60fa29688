mod cli;

use std::{env, path::PathBuf};

use clap::Parser;
use cli::{Cli, CliContext, default_command, execute};
use service_adaptor::config::{ConfigManager, EnvConfigManager};

/// Resolve the adaptor root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("SERVICE_ADAPTOR_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./service_adaptor")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    let env_file = root.join("config").join(".env");
    let context = CliContext::new(root, ConfigManager(EnvConfigManager::new(env_file)));

    execute(&context, cli.command.unwrap_or_else(default_command)).await
}
