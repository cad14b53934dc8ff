//! `fluidsh completions ...` — generate shell completion scripts.

use clap::CommandFactory;
use clap_complete::{generate, Shell};

pub fn run(shell: Shell) {
    let mut cmd = crate::Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
