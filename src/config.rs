//! Node configuration.
//!
//! All tunables the relay engine and the secure channel read are collected
//! in [`NodeConfig`] and injected at construction. Loading them from files
//! or the environment is left to the embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ceiling on the number of hops an envelope may record.
pub const DEFAULT_MAX_HOPS: usize = 32;

/// Default lifetime of an envelope before relays drop it.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default lifetime of a learned routing-table edge (one day).
pub const DEFAULT_ROUTE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between dedup-cache and routing-table sweeps.
pub const DEFAULT_DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default capacity of the delivery and decrypted-message event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the inbound frame queue shared by all transports.
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Smallest Diffie-Hellman prime (in bits) accepted from a peer's offer.
pub const DEFAULT_MIN_DH_PRIME_BITS: u64 = 512;

/// Largest Diffie-Hellman prime (in bits) accepted from a peer's offer.
pub const DEFAULT_MAX_DH_PRIME_BITS: u64 = 4096;

/// How far ahead of the local clock an envelope timestamp may be.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Configuration for a relay node.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use starwave_core::config::NodeConfig;
///
/// let config = NodeConfig::default()
///     .with_max_hops(8)
///     .with_message_ttl(Duration::from_secs(60));
/// assert_eq!(config.max_hops, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Maximum number of hops an envelope may carry.
    pub max_hops: usize,
    /// Envelopes older than this are dropped.
    pub message_ttl: Duration,
    /// Routing-table edges older than this are garbage collected.
    pub route_expiration: Duration,
    /// How often the dedup cache and routing table are swept.
    pub dedup_sweep_interval: Duration,
    /// Capacity of the broadcast channels used for application events.
    pub event_buffer: usize,
    /// Capacity of the queue transports push inbound frames into.
    pub inbound_buffer: usize,
    /// Minimum prime size accepted in a peer's handshake offer.
    pub min_dh_prime_bits: u64,
    /// Maximum prime size accepted in a peer's handshake offer.
    pub max_dh_prime_bits: u64,
    /// Envelopes dated further than this into the future are dropped.
    pub max_clock_skew: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            message_ttl: DEFAULT_MESSAGE_TTL,
            route_expiration: DEFAULT_ROUTE_EXPIRATION,
            dedup_sweep_interval: DEFAULT_DEDUP_SWEEP_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            min_dh_prime_bits: DEFAULT_MIN_DH_PRIME_BITS,
            max_dh_prime_bits: DEFAULT_MAX_DH_PRIME_BITS,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }
}

impl NodeConfig {
    /// Sets the hop ceiling.
    #[must_use]
    pub const fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Sets the envelope time-to-live.
    #[must_use]
    pub const fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    /// Sets the routing-table edge expiration window.
    #[must_use]
    pub const fn with_route_expiration(mut self, expiration: Duration) -> Self {
        self.route_expiration = expiration;
        self
    }

    /// Sets the sweep interval for the dedup cache and routing table.
    #[must_use]
    pub const fn with_dedup_sweep_interval(mut self, interval: Duration) -> Self {
        self.dedup_sweep_interval = interval;
        self
    }

    /// Sets the capacity of the application event channels.
    #[must_use]
    pub const fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Sets the capacity of the inbound frame queue.
    #[must_use]
    pub const fn with_inbound_buffer(mut self, capacity: usize) -> Self {
        self.inbound_buffer = capacity;
        self
    }

    /// Sets the minimum accepted Diffie-Hellman prime size.
    #[must_use]
    pub const fn with_min_dh_prime_bits(mut self, bits: u64) -> Self {
        self.min_dh_prime_bits = bits;
        self
    }

    /// Sets the maximum accepted Diffie-Hellman prime size.
    #[must_use]
    pub const fn with_max_dh_prime_bits(mut self, bits: u64) -> Self {
        self.max_dh_prime_bits = bits;
        self
    }

    /// Sets how far into the future an envelope timestamp may lie.
    #[must_use]
    pub const fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }
}
