//! Thin command-line front-end over the core services.
//!
//! Read-mostly: every command calls the repositories and services directly
//! and performs no writes outside them.

pub mod commands;
pub mod display;

use clap::{Parser, Subcommand};

/// caw — coordinated agent workflows.
#[derive(Debug, Parser)]
#[command(name = "caw", version, about = "Orchestrates fleets of AI coding agents")]
pub struct Cli {
    /// Transport for the tool surface (stdio | http)
    #[arg(long, global = true, env = "CAW_TRANSPORT")]
    pub transport: Option<String>,

    /// Port when transport is http
    #[arg(long, global = true, env = "CAW_PORT")]
    pub port: Option<u16>,

    /// Where the database lives (global | per-repo)
    #[arg(long, global = true, env = "CAW_DB_MODE")]
    pub db_mode: Option<String>,

    /// Repository the process works against
    #[arg(long, global = true, env = "CAW_REPO_PATH")]
    pub repo_path: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize the .caw directory and database
    Init,

    /// Inspect workflows
    Workflow {
        #[command(subcommand)]
        command: commands::WorkflowCommand,
    },

    /// Inspect tasks
    Task {
        #[command(subcommand)]
        command: commands::TaskCommand,
    },

    /// Inspect sessions
    Session {
        #[command(subcommand)]
        command: commands::SessionCommand,
    },

    /// Run a workflow's task graph to completion
    Run {
        /// Workflow id (wf_...)
        workflow_id: String,

        /// Cycle-mode override (auto | hitl | off)
        #[arg(long)]
        cycle: Option<String>,
    },
}
