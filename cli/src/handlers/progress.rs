use std::path::Path;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

pub fn display_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Style::new().bold().apply_to(name).to_string()
}

/// Runs `work` behind a spinner labelled `{action}: {name}`.
pub fn with_spinner<T>(
    action: &str,
    done: &str,
    name: &str,
    work: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.enable_steady_tick(std::time::Duration::from_millis(100));
    progress_bar.set_style(spinner_style(&format!("{{spinner:.green}} {action}: {{msg}}")));
    progress_bar.set_message(name.to_string());

    let result = work();
    match &result {
        Ok(_) => {
            progress_bar.set_style(spinner_style(&format!("{done}: {{msg}}")));
            progress_bar.finish_with_message(name.to_string());
        },
        Err(_) => progress_bar.finish_and_clear(),
    }
    result
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
