// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "colloquy", version, about = "Coordination engine for multi-agent deliberation sessions")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). Respects RUST_LOG if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a discussion session to completion and print its event timeline.
    ///
    /// Without `--scenario`, runs a small built-in two-phase debate so the
    /// engine can be exercised with no files on disk. Agents are backed by
    /// `MockModelClient`, one call per turn.
    Run {
        /// Path to a scenario YAML file. Falls back to a built-in scenario.
        #[arg(long, short = 's')]
        scenario: Option<PathBuf>,

        /// Participant names. Defaults to two agents, "alice" and "bob".
        #[arg(long = "agent", value_name = "NAME")]
        agents: Vec<String>,

        /// Override the scenario's maxRounds.
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Disable streaming turn delivery even if the scenario enables it.
        #[arg(long)]
        no_stream: bool,
    },

    /// Parse and validate a scenario file, printing the resolved rules.
    ShowConfig {
        /// Path to a scenario YAML file. Falls back to the built-in scenario.
        #[arg(long, short = 's')]
        scenario: Option<PathBuf>,
    },
}
