//! Configuration for voxfile
//!
//! Centralized configuration with sensible defaults.

use crate::codec::packet::DATA_PACKET_MAX;

/// Configuration for an ImageFile instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Writer Configuration
    // -------------------------------------------------------------------------
    /// Target logical size of a data packet (in bytes, including the packet
    /// header). Clamped to the format maximum of 64 KiB. Smaller packets mean
    /// more framing overhead but finer-grained seeks.
    pub packet_size_target: usize,

    // -------------------------------------------------------------------------
    // Reader Configuration
    // -------------------------------------------------------------------------
    /// Verify the CRC32 of every page as it is read.
    /// Disabling trades integrity checking for read throughput.
    pub verify_checksums: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size_target: DATA_PACKET_MAX,
            verify_checksums: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Target packet size clamped to the format maximum
    pub(crate) fn effective_packet_size(&self) -> usize {
        self.packet_size_target.min(DATA_PACKET_MAX).max(64)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the target logical data packet size (bytes)
    pub fn packet_size_target(mut self, size: usize) -> Self {
        self.config.packet_size_target = size;
        self
    }

    /// Enable or disable per-page checksum verification on read
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
