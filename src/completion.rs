//! # Shell Completion Module
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! fieldplay completion bash > ~/.local/share/bash-completion/completions/fieldplay
//!
//! # Generate zsh completions
//! fieldplay completion zsh > ~/.config/zsh/completions/_fieldplay
//! ```

use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell to stdout
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    write_completions(gen, cmd, &mut io::stdout());
}

/// Generate shell completions into any writer
pub fn write_completions<G: Generator>(gen: G, cmd: &mut Command, out: &mut dyn Write) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, out);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}
