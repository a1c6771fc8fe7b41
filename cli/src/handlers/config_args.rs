use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use veritas::{ConversionConfig, ElementTypePolicy};

/// Conversion settings shared by every subcommand. Flags override the file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON file with conversion settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Read unknown storage types as f32 instead of failing
    #[arg(long)]
    pub lenient: bool,
    /// Accept references that list the device before the storage index
    #[arg(long)]
    pub accept_device_first: bool,
    /// Top-level key to unwrap, in addition to the configured ones
    #[arg(long, value_name = "KEY")]
    pub wrapper_key: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> anyhow::Result<ConversionConfig> {
        let mut config = match &self.config {
            Some(path) => ConversionConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ConversionConfig::default(),
        };
        if self.lenient {
            config.element_types = ElementTypePolicy::Lenient;
        }
        if self.accept_device_first {
            config.accept_device_first_layout = true;
        }
        if let Some(key) = &self.wrapper_key {
            if !config.is_wrapper_key(key) {
                config.wrapper_keys.push(key.clone());
            }
        }
        tracing::debug!(?config, "Conversion config");
        Ok(config)
    }
}
