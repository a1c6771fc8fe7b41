use std::path::PathBuf;

use anyhow::Context;
use console::Style;
use veritas::{
    ParameterMap, load_parameters_from_path,
    parameters::{total_num_elements, total_size_in_bytes},
};

use super::{
    ConfigArgs,
    progress::{display_name, with_spinner},
};

fn format_table(parameters: &ParameterMap) -> Vec<String> {
    let name_width = parameters.keys().map(String::len).max().unwrap_or(0);
    parameters
        .iter()
        .map(|(name, tensor)| {
            let data_type = tensor.data_type().to_string();
            format!("{name:<name_width$}  {data_type:<4}  {:?}", tensor.shape())
        })
        .collect()
}

pub fn handle_inspect(
    path: PathBuf,
    config_args: ConfigArgs,
) -> anyhow::Result<()> {
    let config = config_args.load()?;
    let parameters = with_spinner("Loading", "Loaded", &display_name(&path), || {
        load_parameters_from_path(&path, &config).with_context(|| format!("Failed to load {}", path.display()))
    })?;

    for line in format_table(&parameters) {
        println!("{line}");
    }
    let style_dim = Style::new().dim();
    println!(
        "{}",
        style_dim.apply_to(format!(
            "{} parameters, {} elements, {} bytes",
            parameters.len(),
            total_num_elements(&parameters),
            total_size_in_bytes(&parameters),
        ))
    );
    Ok(())
}
