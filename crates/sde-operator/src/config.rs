//! Command line and environment configuration

use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

use sde_controller::{CleanupSettings, CleanupStrategy};

/// SDE operator - retires the oldest versioned databases of each environment
#[derive(Parser, Debug)]
#[command(name = "sde-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the Sde CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Only watch Sde resources in this namespace
    #[arg(long, env = "SDE_WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Cleanup settings
    #[command(flatten)]
    pub cleanup: CleanupArgs,
}

/// Strategy names accepted on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Delegate drops to a Job running the cleanup script
    Job,
    /// Drop databases from the operator process
    Direct,
}

impl From<StrategyArg> for CleanupStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Job => CleanupStrategy::Job,
            StrategyArg::Direct => CleanupStrategy::Direct,
        }
    }
}

/// Settings shared by every reconcile pass
#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// How surplus databases are retired
    #[arg(long, env = "SDE_CLEANUP_STRATEGY", value_enum, default_value_t = StrategyArg::Job)]
    pub strategy: StrategyArg,

    /// Container image of the cleanup Job
    #[arg(long, env = "SDE_CLEANUP_IMAGE", default_value = "postgres:12")]
    pub cleanup_image: String,

    /// Engine kind passed to the cleanup script
    #[arg(long, env = "SDE_DATABASE_ENGINE", default_value = "postgres")]
    pub engine: String,

    /// Prefix of managed database names
    #[arg(long, env = "SDE_DATABASE_PREFIX", default_value = "sde_")]
    pub database_prefix: String,

    /// Optional third script argument (admin database)
    #[arg(long, env = "SDE_CLEANUP_EXTRA_ARG", default_value = "")]
    pub extra_arg: String,

    /// Seconds between polls of a running cleanup Job
    #[arg(
        long,
        env = "SDE_JOB_POLL_SECS",
        default_value_t = 15,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub job_poll_secs: u64,

    /// Deadline in seconds for one direct cleanup pass
    #[arg(
        long,
        env = "SDE_PASS_TIMEOUT_SECS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub pass_timeout_secs: u64,
}

impl CleanupArgs {
    /// Convert into controller settings
    pub fn into_settings(self) -> CleanupSettings {
        CleanupSettings {
            strategy: self.strategy.into(),
            image: self.cleanup_image,
            engine: self.engine,
            database_prefix: self.database_prefix,
            extra_arg: self.extra_arg,
            job_poll_interval: Duration::from_secs(self.job_poll_secs),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
        }
    }
}
