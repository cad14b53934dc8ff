//! Spinner helpers using indicatif, for round trips that place a
//! command on a host and wait for it (create, run, snapshot).

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(SPINNER)
            .template("{spinner:.cyan} {msg}")
            .expect("invalid spinner template"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_success(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::default_spinner().template("{prefix} {msg}").expect("invalid spinner template"));
    pb.set_prefix("✓");
    pb.finish_with_message(msg.to_string());
}

pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::default_spinner().template("{prefix} {msg}").expect("invalid spinner template"));
    pb.set_prefix("✗");
    pb.finish_with_message(msg.to_string());
}
