//! Progress indicators for long-running operations

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Create a spinner for indeterminate operations. Hidden when stderr is not
/// a terminal.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if !std::io::stderr().is_terminal() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Spinner shown while one addon is converged
pub struct AddonProgress {
    pb: ProgressBar,
    addon: String,
}

impl AddonProgress {
    pub fn new(addon: &str) -> Self {
        Self {
            pb: create_spinner(&format!("Updating {}", addon)),
            addon: addon.to_string(),
        }
    }

    pub fn finish_success(&self) {
        self.pb.finish_and_clear();
    }

    pub fn finish_error(&self) {
        self.pb
            .finish_with_message(format!("✗ {} failed", self.addon));
    }
}
