//! Cleanup strategy selection

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default retry-after delay while the cleanup Job runs
pub const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default deadline for a direct cleanup pass
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(120);

/// How surplus databases are retired
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CleanupStrategy {
    /// Provision the script ConfigMap and a Job, then poll the Job
    #[default]
    Job,
    /// Connect to the data store from the controller and drop in-process
    Direct,
}

impl FromStr for CleanupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "job" => Ok(CleanupStrategy::Job),
            "direct" => Ok(CleanupStrategy::Direct),
            other => Err(format!(
                "unknown cleanup strategy '{}', expected 'job' or 'direct'",
                other
            )),
        }
    }
}

impl fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStrategy::Job => f.write_str("job"),
            CleanupStrategy::Direct => f.write_str("direct"),
        }
    }
}

/// Operator-wide cleanup settings shared by every pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Which strategy reconcile passes use
    pub strategy: CleanupStrategy,
    /// Container image of the cleanup Job
    pub image: String,
    /// Engine kind passed to the cleanup script
    pub engine: String,
    /// Prefix of managed database names
    pub database_prefix: String,
    /// Optional third script argument, the admin database; may be empty
    pub extra_arg: String,
    /// Retry-after delay while the Job has not completed
    pub job_poll_interval: Duration,
    /// Deadline for one direct pass, connect through last drop
    pub pass_timeout: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            strategy: CleanupStrategy::default(),
            image: "postgres:12".to_string(),
            engine: "postgres".to_string(),
            database_prefix: "sde_".to_string(),
            extra_arg: String::new(),
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            pass_timeout: DEFAULT_PASS_TIMEOUT,
        }
    }
}
