use std::time::Duration;

use conduit_core::Address;

use crate::transport::send::SendDefaults;

/// Bus-level configuration for the receive endpoint and outbound defaults.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Address this bus receives on; also the source address of its replies.
    pub input_address: Address,
    /// Maximum number of receives in flight; further messages wait on the queue.
    pub max_concurrent_receives: u32,
    /// Upper bound for one receive, including pending replies and faults.
    pub receive_timeout_ms: u64,
    /// Durability flag stamped on outbound messages before the send pipe runs.
    pub default_durable: bool,
    /// Time-to-live stamped on outbound messages; `None` never expires.
    pub default_time_to_live: Option<Duration>,
    pub log: LogConfig,
}

impl BusConfig {
    #[must_use]
    pub fn send_defaults(&self) -> SendDefaults {
        SendDefaults {
            durable: self.default_durable,
            time_to_live: self.default_time_to_live,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            input_address: Address::from_static("loopback://localhost/input"),
            max_concurrent_receives: 1000,
            receive_timeout_ms: 30_000,
            default_durable: true,
            default_time_to_live: None,
            log: LogConfig::default(),
        }
    }
}

/// Subscriber settings used by [`crate::logging::init_tracing`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
