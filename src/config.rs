//! Construction-time configuration for the core. A plain struct rather
//! than a CLI-parsed one: the core is embedded into a host application,
//! not run as its own binary.

use std::time::Duration;

/// Recognized at core construction. Field defaults match the deployed
/// terminal fleet's baseline configuration.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub confirmation_timeout: Duration,
    pub hold_duration: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub command_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            confirmation_timeout: Duration::from_secs(15),
            hold_duration: Duration::from_secs(5),
            cache_capacity: 8,
            cache_ttl: Duration::from_secs(4 * 60 * 60),
            command_timeout: Duration::from_millis(500),
        }
    }
}
