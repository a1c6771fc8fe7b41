use std::path::PathBuf;

use anyhow::Context;
use veritas::{load_parameters_from_path, model::ParameterSchema};

use super::{
    ConfigArgs,
    progress::{display_name, with_spinner},
};

pub fn handle_schema(
    path: PathBuf,
    output: PathBuf,
    config_args: ConfigArgs,
) -> anyhow::Result<()> {
    let config = config_args.load()?;
    let parameters = with_spinner("Loading", "Loaded", &display_name(&path), || {
        load_parameters_from_path(&path, &config).with_context(|| format!("Failed to load {}", path.display()))
    })?;

    let schema = ParameterSchema::from_parameters(&parameters);
    schema.save(&output).with_context(|| format!("Failed to write schema to {}", output.display()))?;
    println!("Schema with {} parameters written to {}", schema.len(), output.display());
    Ok(())
}
