/// Engine-wide configuration.
///
/// Bundles the recognized options from the design's configuration
/// section: the host table's capacity hint, the anti-entropy scheduling
/// parameters, and the shutdown drain grace period.
use crate::host_table::HostTableConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HostMeshConfig {
    /// Initial capacity hint for the live and tombstone maps.
    pub hosts_expected: usize,
    /// Delay before the first anti-entropy advertisement is sent.
    pub anti_entropy_initial_delay: Duration,
    /// Interval between anti-entropy advertisements.
    pub anti_entropy_period: Duration,
    /// Bound on how long `deactivate` waits for in-flight work to drain.
    pub executor_shutdown_grace: Duration,
}

impl HostMeshConfig {
    pub fn host_table_config(&self) -> HostTableConfig {
        HostTableConfig {
            hosts_expected: self.hosts_expected,
        }
    }
}

impl Default for HostMeshConfig {
    fn default() -> Self {
        Self {
            hosts_expected: 64,
            anti_entropy_initial_delay: Duration::from_secs(5),
            anti_entropy_period: Duration::from_secs(5),
            executor_shutdown_grace: Duration::from_secs(5),
        }
    }
}
