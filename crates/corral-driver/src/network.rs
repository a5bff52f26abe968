//! Network endpoint assignment.
//!
//! Addresses are leased from an IPv4 subnet. The network and broadcast
//! addresses are never handed out and the first host address is kept for
//! the gateway.

use crate::error::{DriverError, Result};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Pool of container addresses within one subnet.
#[derive(Debug)]
pub struct AddressPool {
    network: u32,
    prefix_len: u8,
    leased: Mutex<BTreeSet<u32>>,
}

impl AddressPool {
    /// Create a pool for `base/prefix_len`.
    ///
    /// Host bits set in `base` are ignored. Prefixes longer than /30 leave no
    /// usable container addresses and are rejected.
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if !(8..=30).contains(&prefix_len) {
            return Err(DriverError::Config(format!(
                "subnet prefix must be between 8 and 30, got {prefix_len}"
            )));
        }
        let mask = u32::MAX << (32 - prefix_len);
        Ok(Self {
            network: u32::from(base) & mask,
            prefix_len,
            leased: Mutex::new(BTreeSet::new()),
        })
    }

    /// The gateway address (first host in the subnet).
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network + 1)
    }

    fn subnet(&self) -> String {
        format!("{}/{}", Ipv4Addr::from(self.network), self.prefix_len)
    }

    fn host_range(&self) -> std::ops::Range<u32> {
        let size = 1u32 << (32 - self.prefix_len);
        // skip network, gateway; stop before broadcast
        (self.network + 2)..(self.network + size - 1)
    }

    /// Lease the lowest free address.
    pub fn lease(&self) -> Result<Ipv4Addr> {
        let mut leased = self
            .leased
            .lock()
            .map_err(|_| DriverError::Config("address pool lock poisoned".into()))?;
        let free = self
            .host_range()
            .find(|candidate| !leased.contains(candidate))
            .ok_or_else(|| DriverError::NetworkExhausted(self.subnet()))?;
        leased.insert(free);
        Ok(Ipv4Addr::from(free))
    }

    /// Return an address to the pool. Unknown addresses are ignored.
    pub fn release(&self, addr: Ipv4Addr) {
        if let Ok(mut leased) = self.leased.lock() {
            leased.remove(&u32::from(addr));
        }
    }

    /// Number of addresses currently leased.
    pub fn leased_count(&self) -> usize {
        self.leased.lock().map(|l| l.len()).unwrap_or(0)
    }
}
