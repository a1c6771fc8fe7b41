use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use console::Style;
use veritas::{
    ConversionConfig, ParameterMap, SavedModule,
    model::{LABELS, ParameterSchema, build_skeleton, validate_parameters},
    parameters::total_size_in_bytes,
    verify_checkpoint, write_checkpoint,
};

use super::{
    ConfigArgs,
    progress::{display_name, with_spinner},
};

/// Reads the written checkpoint back; a file that does not match is deleted.
fn verify_or_remove(
    output: &Path,
    parameters: &ParameterMap,
    config: &ConversionConfig,
) -> anyhow::Result<()> {
    if let Err(error) = verify_checkpoint(output, parameters, &config.output_wrapper_key, config) {
        if let Err(remove_error) = fs::remove_file(output) {
            tracing::warn!(path = %output.display(), %remove_error, "Failed to remove unverified checkpoint");
        }
        return Err(error).with_context(|| format!("Failed to verify {}", output.display()));
    }
    Ok(())
}

pub fn handle_convert(
    saved_module: PathBuf,
    output: PathBuf,
    config_args: ConfigArgs,
    schema_path: Option<PathBuf>,
    num_classes: Option<usize>,
) -> anyhow::Result<()> {
    let config = config_args.load()?;
    let module = SavedModule::open(&saved_module)
        .with_context(|| format!("{} is not a saved module", saved_module.display()))?;

    let parameters = with_spinner("Resolving", "Resolved", &display_name(&saved_module), || {
        module
            .load_parameters(&config)
            .with_context(|| format!("Failed to resolve {}", saved_module.display()))
    })?;

    if let Some(schema_path) = &schema_path {
        let schema = ParameterSchema::from_file(schema_path)
            .with_context(|| format!("Failed to load schema from {}", schema_path.display()))?;
        let num_classes = num_classes.unwrap_or(LABELS.len());
        let skeleton = build_skeleton(&schema, num_classes, &config.classifier_head)?;
        validate_parameters(&skeleton, &parameters)
            .with_context(|| format!("{} does not fit {}", saved_module.display(), schema_path.display()))?;
        tracing::info!(schema = %schema_path.display(), num_classes, "Parameters match schema");
    }

    with_spinner("Writing", "Wrote", &display_name(&output), || {
        write_checkpoint(&output, &parameters, &config.output_wrapper_key)
            .with_context(|| format!("Failed to write {}", output.display()))
    })?;

    with_spinner("Verifying", "Verified", &display_name(&output), || {
        verify_or_remove(&output, &parameters, &config)
    })?;

    let style_bold = Style::new().bold();
    println!(
        "{} parameters ({:.1} MiB) written to {} under {:?}",
        style_bold.apply_to(parameters.len()),
        total_size_in_bytes(&parameters) as f64 / (1024.0 * 1024.0),
        output.display(),
        config.output_wrapper_key,
    );
    Ok(())
}
