use clap::{Args, Subcommand};

use super::CliContext;
use service_adaptor::config::BrokerConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Add { key: String, value: String },
    Update { key: String, value: String },
    Delete { key: String },
    /// Print the broker settings in effect
    Show,
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config_manager.0;
    match args.command {
        ConfigCommands::Add { key, value } => {
            match config.set(&key, &value).await {
                Ok(_) => println!("✅ Config added."),
                Err(err) => eprintln!("❌ Config could not be added: {err}"),
            }
            Ok(())
        }
        ConfigCommands::Update { key, value } => {
            match config.set(&key, &value).await {
                Ok(_) => println!("✅ Config updated."),
                Err(err) => eprintln!("❌ Config could not be updated: {err}"),
            }
            Ok(())
        }
        ConfigCommands::Delete { key } => {
            config.del(&key).await?;
            Ok(())
        }
        ConfigCommands::Show => {
            let broker = BrokerConfig::load(&context.config_manager).await?;
            println!("{}", serde_json::to_string_pretty(&broker)?);
            Ok(())
        }
    }
}
