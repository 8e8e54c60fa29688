// src/schema.rs

use std::{fs, path::Path};

use adaptor_plugin::message::WireMessage;
use adaptor_plugin::{ContextInfo, PluginError};
use anyhow::Error;
use schemars::{JsonSchema, schema_for};

use crate::broker::{ConnectRequest, ContextSummary};
use crate::config::BrokerConfig;

fn write_one<T: JsonSchema>(out_dir: &Path, file_name: &str) -> Result<(), Error> {
    let schema = schema_for!(T);
    let json = serde_json::to_string_pretty(&schema)?;
    fs::write(out_dir.join(file_name), json)?;
    Ok(())
}

/// Write the JSON schemas of everything that crosses the adaptor boundary
/// into `out_dir`. Returns the file names written.
pub fn write_schema(out_dir: &Path) -> Result<Vec<&'static str>, Error> {
    fs::create_dir_all(out_dir)?;

    let files = [
        "envelope.schema.json",
        "connect-request.schema.json",
        "context-info.schema.json",
        "context-summary.schema.json",
        "broker-config.schema.json",
        "plugin-error.schema.json",
    ];
    write_one::<WireMessage>(out_dir, files[0])?;
    write_one::<ConnectRequest>(out_dir, files[1])?;
    write_one::<ContextInfo>(out_dir, files[2])?;
    write_one::<ContextSummary>(out_dir, files[3])?;
    write_one::<BrokerConfig>(out_dir, files[4])?;
    write_one::<PluginError>(out_dir, files[5])?;

    Ok(files.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_every_schema() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("schemas");
        let files = write_schema(&out).unwrap();
        for file in files {
            let text = fs::read_to_string(out.join(file)).unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert!(value.is_object(), "{file} is not a schema object");
        }
        let envelope = fs::read_to_string(out.join("envelope.schema.json")).unwrap();
        assert!(envelope.contains("man_param"));
    }
}
