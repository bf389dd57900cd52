//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ferroctl - declarative client for the Ferro control plane.
#[derive(Parser, Debug)]
#[command(name = "ferroctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Control-plane API base URL.
    #[arg(long, global = true, env = "FERRO_API_URL")]
    pub api_url: Option<String>,

    /// API token for authentication.
    #[arg(long, global = true, env = "FERRO_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update every resource declared in a file.
    Apply {
        /// Resource file (YAML multi-document or JSON list).
        #[arg(short, long)]
        filename: PathBuf,
    },

    /// Remove every resource declared in a file.
    Remove {
        /// Resource file (YAML multi-document or JSON list).
        #[arg(short, long)]
        filename: PathBuf,
    },

    /// Get one resource, or list a collection.
    Get {
        /// Resource kind (e.g. ModelDeployment or model-deployment).
        kind: String,

        /// Resource name; lists the collection when omitted.
        name: Option<String>,
    },

    /// Delete a resource by name.
    Delete {
        /// Resource kind (e.g. ModelRoute or model-route).
        kind: String,

        /// Resource name.
        name: Option<String>,

        /// Resource file to take the name from instead.
        #[arg(short, long)]
        filename: Option<PathBuf>,

        /// Do not fail when the resource is already absent.
        #[arg(long)]
        ignore_not_found: bool,
    },

    /// Scale a model deployment.
    Scale {
        /// Deployment name.
        name: String,

        /// New replica count.
        #[arg(long)]
        replicas: u32,

        /// Waiting behavior.
        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Block until a resource reaches its terminal state.
    Wait {
        /// Resource kind (e.g. ModelTraining or model-training).
        kind: String,

        /// Resource name.
        name: String,

        /// Waiting behavior.
        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Stream live enclave topology events.
    WatchEnclaves {
        /// Restrict to the given enclave names (repeatable).
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// Request an asynchronous image build and wait for its result.
    Build {
        /// Model name to package.
        #[arg(long)]
        model_name: String,

        /// Model version to package.
        #[arg(long)]
        model_version: String,

        /// Tag for the resulting image.
        #[arg(long)]
        image_tag: Option<String>,

        /// Push the image to the registry after building.
        #[arg(long)]
        push: bool,

        /// Number of poll attempts before giving up.
        #[arg(long, default_value = "60")]
        retries: u32,

        /// Seconds between polls.
        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },
}

/// Arguments shared by commands that wait on remote operations.
#[derive(Args, Debug, Clone, Copy)]
pub struct WaitArgs {
    /// Do not wait for the operation to finish.
    #[arg(long)]
    pub no_wait: bool,

    /// Wait bound in seconds.
    #[arg(long, default_value = "300")]
    pub timeout: u64,

    /// Seconds between status polls.
    #[arg(long, default_value = "5")]
    pub poll_interval: u64,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
