//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `fieldplay` binary.
//!
//! ## Commands
//!
//! - `simulate`: Run a seeded listening session and report what the field learned
//! - `distribution`: Print one probability field for a given context
//! - `config`: Show or initialize the configuration file
//! - `completion`: Generate shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! fieldplay simulate --tracks 20 --steps 2000 --seed 7
//! fieldplay distribution --hour 22 --energy 0.8 --flow 0.2
//! fieldplay completion fish > ~/.config/fish/completions/fieldplay.fish
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser)]
#[command(name = "fieldplay")]
#[command(about = "Fieldplay: behaviour-weighted playback queues driven by a probability field")]
#[command(version)]
pub struct Args {
    /// Configuration file to use instead of the platform default
    #[arg(long, global = true, env = "FIELDPLAY_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Where the tracks come from.
#[derive(ClapArgs, Debug, Clone)]
pub struct PlaylistArgs {
    /// Playlist JSON file (a playlist object or a bare array of tracks)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub playlist: Option<PathBuf>,

    /// Size of the synthetic catalogue used when no playlist is given
    #[arg(long, default_value = "12")]
    pub tracks: usize,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Simulate a listening session
    ///
    /// Plays the playlist on an in-memory transport with a synthetic listener
    /// who occasionally skips, pauses and changes the volume, then prints the
    /// learned weights, play counts, behaviour metrics and clock state.
    Simulate {
        #[command(flatten)]
        source: PlaylistArgs,

        /// Number of simulated steps
        #[arg(long, default_value = "720")]
        steps: usize,

        /// Seconds of playback per step
        #[arg(long, default_value = "5.0")]
        step_seconds: f64,

        /// Seed for both the engine and the synthetic listener
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Chance per step that the listener skips
        #[arg(long, default_value = "0.02")]
        skip_chance: f64,

        /// Hour of day (0-23) at which the session starts
        #[arg(long, default_value = "19", value_parser = clap::value_parser!(u32).range(0..24))]
        start_hour: u32,

        /// Play in a shuffled order
        #[arg(long)]
        shuffle: bool,

        /// Stop at the end of the queue instead of wrapping
        #[arg(long)]
        no_repeat: bool,

        /// Step through the queue instead of drawing from the probability field
        #[arg(long)]
        deterministic: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the probability field for one listening context
    Distribution {
        #[command(flatten)]
        source: PlaylistArgs,

        /// Hour of day (0-23)
        #[arg(long, default_value = "12", value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,

        /// Listener energy in [0, 1]
        #[arg(long, default_value = "0.5")]
        energy: f64,

        /// Listening flow in [0, 1]; below 0.3 the field is jittered
        #[arg(long, default_value = "0.5")]
        flow: f64,

        /// Seed for the low-flow jitter
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print the field as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration and where it is read from
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Generate shell completions
    ///
    /// Outputs completion script for the specified shell to stdout.
    /// Redirect to appropriate file in your shell's completion directory.
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_simulate_defaults() {
        let args = Args::try_parse_from(["fieldplay", "simulate"]).expect("parse");
        match args.command {
            Command::Simulate {
                source,
                steps,
                seed,
                deterministic,
                ..
            } => {
                assert!(source.playlist.is_none());
                assert_eq!(source.tracks, 12);
                assert_eq!(steps, 720);
                assert_eq!(seed, 42);
                assert!(!deterministic);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_hour_out_of_range_is_rejected() {
        assert!(Args::try_parse_from(["fieldplay", "distribution", "--hour", "24"]).is_err());
    }
}
