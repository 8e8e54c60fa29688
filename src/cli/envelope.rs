use std::{fs, path::PathBuf};

use adaptor_plugin::param_array::infer_schema;
use adaptor_plugin::{MessageField, Param, PluginMessage};
use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::Value;

use super::CliContext;

#[derive(Args, Debug)]
pub struct EnvelopeArgs {
    #[command(subcommand)]
    pub command: EnvelopeCommands,
}

#[derive(Subcommand, Debug)]
pub enum EnvelopeCommands {
    /// Check that a file holds a well-formed envelope and describe it
    Validate { file: PathBuf },
}

pub async fn execute(args: EnvelopeArgs, _context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        EnvelopeCommands::Validate { file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            for line in describe(&text)? {
                println!("{line}");
            }
            println!("✅ Envelope is valid.");
            Ok(())
        }
    }
}

/// Decode `text` and list its fields, flagging arrays whose row schema
/// cannot be recovered reliably.
fn describe(text: &str) -> anyhow::Result<Vec<String>> {
    let msg = PluginMessage::deserialize(text)?;
    let mut lines = Vec::new();
    for field in MessageField::ALL {
        let value = msg.get_value(field);
        if !value.is_null() {
            lines.push(format!("{field}: {value:?}"));
        }
    }

    let raw: Value = serde_json::from_str(text)?;
    for (which, slot, params) in [
        ("man_param", "mandatory", msg.params()),
        ("opt_param", "optional", msg.opt_params()),
    ] {
        for (index, param) in params {
            match param {
                Param::Value(value) => lines.push(format!("{slot} {index}: {value:?}")),
                Param::Array(array) => {
                    let rows = raw[which][index.to_string()].as_array().cloned().unwrap_or_default();
                    let guess = infer_schema(&rows);
                    let warning = if guess.is_lossy() { " (schema cannot be recovered)" } else { "" };
                    lines.push(format!(
                        "{slot} {index}: array `{}` with {} rows{warning}",
                        array.schema_tags(),
                        array.len()
                    ));
                }
            }
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_scalars_and_arrays() {
        let text = r#"{"ctx_id":"tenant-1","func_id":"chat","man_param":{"0":"hello","1":[{"1":"alice","2":true}]},"opt_param":{"0":[]},"req_id":7}"#;
        let lines = describe(text).unwrap();
        assert!(lines.contains(&r#"ctx_id: String("tenant-1")"#.to_string()));
        assert!(lines.contains(&"req_id: Number(7)".to_string()));
        assert!(lines.contains(&"mandatory 1: array `sb` with 1 rows".to_string()));
        assert!(lines.contains(&"optional 0: array `` with 0 rows (schema cannot be recovered)".to_string()));
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(describe("[1, 2]").is_err());
        assert!(describe("{not json").is_err());
    }
}
