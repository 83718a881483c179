//! Session configuration.
//!
//! [`SidebandConfig`] is built once with [`SidebandConfigBuilder`] and passed
//! by reference to every component that needs a bound or a buffer size.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use moniker_sideband::SidebandConfig;
//!
//! let config = SidebandConfig::builder()
//!     .connect_timeout(Duration::from_secs(2))
//!     .max_payload_size(1024 * 1024)
//!     .build();
//!
//! assert_eq!(config.connect_timeout(), Duration::from_secs(2));
//! assert_eq!(config.control_timeout(), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default bound on sideband Open (connect + handshake).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on each control-channel call.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the write-half shutdown performed by Close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default read buffer capacity.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Immutable configuration of a sideband session.
#[derive(Debug, Clone)]
pub struct SidebandConfig {
    connect_timeout: Duration,
    control_timeout: Duration,
    close_timeout: Duration,
    max_payload_size: u32,
    read_buffer_size: usize,
}

impl SidebandConfig {
    pub fn builder() -> SidebandConfigBuilder {
        SidebandConfigBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn control_timeout(&self) -> Duration {
        self.control_timeout
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}

impl Default for SidebandConfig {
    fn default() -> Self {
        SidebandConfigBuilder::new().build()
    }
}

/// Builder for [`SidebandConfig`].
#[derive(Debug, Clone)]
pub struct SidebandConfigBuilder {
    config: SidebandConfig,
}

impl SidebandConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SidebandConfig {
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                control_timeout: DEFAULT_CONTROL_TIMEOUT,
                close_timeout: DEFAULT_CLOSE_TIMEOUT,
                max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
                read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            },
        }
    }

    /// Bound on connecting to the sideband endpoint and completing the handshake.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Bound on each control-channel call, negotiation included.
    ///
    /// Default: 10 seconds
    pub fn control_timeout(mut self, timeout: Duration) -> Self {
        self.config.control_timeout = timeout;
        self
    }

    /// Bound on flushing and shutting down the write half during Close.
    ///
    /// Default: 1 second
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Largest frame payload accepted from the remote.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Initial capacity of the receive buffer.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    pub fn build(self) -> SidebandConfig {
        self.config
    }
}

impl Default for SidebandConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
