//! Command-line surface.
//!
//! clap derive structs for the deploy/rollback command families and the
//! platform inspection group. Exit-code semantics live with the command
//! implementations; this file only shapes the arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "armada",
    version,
    about = "Multi-platform package deployment orchestrator",
    long_about = "Drives a source project through validate -> build -> deploy -> verify\nacross npm, PyPI, crates.io, Docker Hub and friends, with a durable\ntransaction record and cross-registry rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory for transactions, descriptors and logs
    #[arg(long, global = true, env = "ARMADA_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a package to one or more registries
    Deploy {
        /// Package name (also the default working-tree directory name)
        package: String,

        /// Version to release; omitted means "read from the manifest"
        #[arg(long)]
        version: Option<String>,

        /// Target platforms, comma-separated (e.g. npm,pypi,cargo)
        #[arg(long, required = true)]
        targets: String,

        /// Pipeline topology: standard, parallel or staged
        #[arg(long, default_value = "standard")]
        pipeline: String,

        /// Working tree path (defaults to ./{package}, then .)
        #[arg(long)]
        tree: Option<String>,

        /// Stop scheduling targets after the first failure (standard only)
        #[arg(long)]
        fail_fast: bool,

        /// Force auto-rollback of completed platforms on failure
        #[arg(long, conflicts_with = "no_auto_rollback")]
        auto_rollback: bool,

        /// Never auto-rollback, even when policy would
        #[arg(long)]
        no_auto_rollback: bool,

        /// Abort when any target registry health-checks as down
        #[arg(long)]
        strict_health: bool,

        /// Bounded worker count for the parallel topology
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Hard cap on post-deploy verify polling (e.g. 90s, 5m)
        #[arg(long)]
        verify_cap: Option<String>,

        /// Print the deployment plan and exit without deploying
        #[arg(long)]
        dry_run: bool,
    },

    /// Show one deployment transaction
    DeployStatus {
        /// Transaction id
        id: String,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List recent deployment transactions
    DeployHistory {
        /// How many transactions to show
        #[arg(default_value = "10")]
        n: usize,

        /// Only show transactions for this package
        #[arg(long)]
        package: Option<String>,
    },

    /// Request cooperative cancellation of a running deployment
    DeployCancel {
        /// Transaction id
        id: String,
    },

    /// Re-run a deployment as a new transaction
    DeployRetry {
        /// Transaction id of the deployment to retry
        id: String,

        /// Restrict the retry to these targets (comma-separated);
        /// defaults to the platforms that did not complete
        #[arg(long)]
        targets: Option<String>,

        /// Working tree path (defaults to ./{package}, then .)
        #[arg(long)]
        tree: Option<String>,
    },

    /// Roll back a deployment across its registries
    Rollback {
        /// Deployment transaction id
        id: String,

        /// Restrict rollback to these targets (comma-separated)
        #[arg(long)]
        targets: Option<String>,

        /// Rollback mode: automated or manual
        #[arg(long, default_value = "automated")]
        mode: String,

        /// Allow rollback methods that require confirmation
        #[arg(long = "yes", short = 'y')]
        confirm: bool,
    },

    /// Show one rollback transaction
    RollbackStatus {
        /// Rollback transaction id
        id: String,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Confirm a rollback against registry metadata
    RollbackVerify {
        /// Rollback transaction id
        id: String,
    },

    /// Inspect loaded platform descriptors
    Platforms {
        #[command(subcommand)]
        command: PlatformCommands,
    },
}

#[derive(Subcommand)]
pub enum PlatformCommands {
    /// List loaded platform descriptors
    List,

    /// Probe one registry's health endpoint
    Health {
        /// Platform name (e.g. npm)
        name: String,
    },

    /// Re-validate one descriptor file
    Validate {
        /// Platform name (e.g. npm)
        name: String,
    },
}
