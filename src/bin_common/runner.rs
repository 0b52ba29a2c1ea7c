//! Binary runner utilities
//!
//! Banner, periodic status reporting and graceful shutdown for long-running
//! binaries.

use std::time::Duration;
use tracing::info;

/// Configuration for running a binary application
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name of the binary (for logging)
    pub name: String,
    /// How often the binary logs a status line
    pub status_interval_secs: u64,
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status_interval_secs: 60,
        }
    }

    pub fn with_status_interval(mut self, secs: u64) -> Self {
        self.status_interval_secs = secs;
        self
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

/// A long-running binary with a banner, a main loop and a shutdown summary
#[allow(async_fn_in_trait)]
pub trait BinaryRunner {
    /// Run until shutdown; returns a one-line summary for the shutdown banner
    async fn run(&mut self) -> anyhow::Result<Option<String>>;

    fn config(&self) -> &RunConfig;

    fn print_banner(&self) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("Starting {}", config.name);
        info!("Press Ctrl+C to stop");
        info!("========================================");
        info!("");
    }

    fn print_shutdown(&self, summary: Option<&str>) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("{} stopped gracefully", config.name);
        if let Some(summary) = summary {
            info!("{}", summary);
        }
        info!("========================================");
    }

    /// Banner, run, shutdown banner
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.print_banner();
        let summary = self.run().await?;
        self.print_shutdown(summary.as_deref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_builder() {
        let config = RunConfig::new("test-binary").with_status_interval(15);

        assert_eq!(config.name, "test-binary");
        assert_eq!(config.status_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_status_interval_never_zero() {
        let config = RunConfig::new("default").with_status_interval(0);
        assert_eq!(config.status_interval(), Duration::from_secs(1));
        assert_eq!(RunConfig::new("default").status_interval_secs, 60);
    }
}
