//! Private address allocation
//!
//! Addresses are drawn at random from `a.b.X.Y` inside the configured /16,
//! with `X` in `third_octet` and `Y` in `fourth_octet`. Reservations live in
//! the `ip` scope of the snapshot store, one key per address.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use ipnet::Ipv4Net;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::errors::VoltexError;
use crate::storage::snapshot::Scope;

/// Snapshot scope holding reserved addresses
pub const IP_SCOPE: &str = "ip";

/// Allocator options
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// /16 network the addresses belong to
    pub subnet: Ipv4Net,

    /// Candidate range of the third octet. Starts above the octets reserved
    /// for infrastructure (gateway, proxy, auth service).
    pub third_octet: RangeInclusive<u8>,

    /// Candidate range of the fourth octet
    pub fourth_octet: RangeInclusive<u8>,

    /// Colliding candidates tolerated before giving up
    pub max_attempts: u32,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            subnet: Ipv4Net::new(Ipv4Addr::new(172, 20, 0, 0), 16).expect("16 is a valid prefix length"),
            third_octet: 2..=251,
            fourth_octet: 0..=254,
            max_attempts: 65_536,
        }
    }
}

impl AllocatorOptions {
    /// Options for `subnet`, which must be a /16: candidates keep its first
    /// two octets and draw the last two
    pub fn new(subnet: Ipv4Net, max_attempts: u32) -> Result<Self, VoltexError> {
        if subnet.prefix_len() != 16 {
            return Err(VoltexError::ConfigError(format!(
                "Container subnet {} must be a /16",
                subnet
            )));
        }
        Ok(Self {
            subnet: subnet.trunc(),
            max_attempts,
            ..Self::default()
        })
    }
}

/// Hands out and releases private container addresses
pub struct AddressAllocator {
    scope: Scope,
    options: AllocatorOptions,
    rng: Mutex<StdRng>,
}

impl AddressAllocator {
    pub fn new(scope: Scope, options: AllocatorOptions) -> Self {
        Self::with_rng(scope, options, StdRng::from_entropy())
    }

    /// Deterministic allocator for tests
    pub fn with_seed(scope: Scope, options: AllocatorOptions, seed: u64) -> Self {
        Self::with_rng(scope, options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(scope: Scope, options: AllocatorOptions, rng: StdRng) -> Self {
        Self {
            scope,
            options,
            rng: Mutex::new(rng),
        }
    }

    fn candidate(&self) -> String {
        let [a, b, _, _] = self.options.subnet.network().octets();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let c = rng.gen_range(self.options.third_octet.clone());
        let d = rng.gen_range(self.options.fourth_octet.clone());
        Ipv4Addr::new(a, b, c, d).to_string()
    }

    /// Reserve an address and persist the reservation before returning it.
    ///
    /// A `forced` address is reserved and returned as-is, without any
    /// collision check.
    pub async fn allocate(&self, forced: Option<&str>) -> Result<String, VoltexError> {
        if let Some(address) = forced {
            info!("Reserving pinned address {}", address);
            self.scope.set(address, &true).await?;
            return Ok(address.to_string());
        }

        for attempt in 1..=self.options.max_attempts {
            let address = self.candidate();
            if self.scope.has(&address).await {
                debug!("Address {} taken (attempt {})", address, attempt);
                continue;
            }
            self.scope.set(&address, &true).await?;
            info!("Allocated address {}", address);
            return Ok(address);
        }

        warn!(
            "Address pool {} exhausted after {} attempts",
            self.options.subnet, self.options.max_attempts
        );
        Err(VoltexError::AllocationExhausted {
            attempts: self.options.max_attempts,
        })
    }

    /// Drop the reservation of `address`; unknown addresses are ignored
    pub async fn release(&self, address: &str) -> Result<(), VoltexError> {
        self.scope.delete(address).await?;
        info!("Released address {}", address);
        Ok(())
    }

    /// Whether `address` is currently reserved
    pub async fn is_reserved(&self, address: &str) -> bool {
        self.scope.has(address).await
    }
}
