//! Address pool allocation.
//!
//! The pool owns the set of addresses it may hand out and the set of
//! addresses clients have declined. Who holds what lives in the
//! [`LeaseStore`]; the pool only reads it when choosing an address.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::{ClientId, LeaseStore};

#[derive(Debug, Clone, Default)]
pub struct AddressPool {
    addresses: BTreeSet<Ipv4Addr>,
    declined: BTreeSet<Ipv4Addr>,
}

impl AddressPool {
    pub fn new(addresses: BTreeSet<Ipv4Addr>) -> Self {
        Self {
            addresses,
            declined: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pool_addresses())
    }

    /// True if `ip` is a pool address, declined or not.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.addresses.contains(&ip)
    }

    /// # Errors
    ///
    /// Returns [`Error::AddressOutOfRange`] if `ip` is not a pool address.
    pub fn ensure_contains(&self, ip: Ipv4Addr) -> Result<()> {
        if self.addresses.contains(&ip) {
            Ok(())
        } else {
            Err(Error::AddressOutOfRange(ip))
        }
    }

    /// True if `ip` is in the pool, not declined, and held by no lease.
    pub fn is_free(&self, store: &LeaseStore, ip: Ipv4Addr) -> bool {
        self.is_usable(ip) && store.holder(ip).is_none()
    }

    /// Like [`is_free`](Self::is_free), but an address already held by
    /// `client_id` counts as free for that client.
    pub fn is_available_to(&self, store: &LeaseStore, ip: Ipv4Addr, client_id: &ClientId) -> bool {
        self.is_usable(ip)
            && store
                .holder(ip)
                .is_none_or(|lease| &lease.client_id == client_id)
    }

    fn is_usable(&self, ip: Ipv4Addr) -> bool {
        self.addresses.contains(&ip) && !self.declined.contains(&ip)
    }

    /// Picks an address for `client_id`.
    ///
    /// In order of preference: the address of the client's Offered or Bound
    /// lease; `requested` if it is free; the client's previous address if it
    /// is still free; the lowest free address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when no address qualifies.
    pub fn allocate(
        &self,
        store: &LeaseStore,
        client_id: &ClientId,
        requested: Option<Ipv4Addr>,
    ) -> Result<Ipv4Addr> {
        let previous = store.get_by_client(client_id);

        if let Some(lease) = previous
            && lease.is_active()
            && self.is_usable(lease.ip)
        {
            return Ok(lease.ip);
        }

        if let Some(ip) = requested
            && self.is_free(store, ip)
        {
            return Ok(ip);
        }

        if let Some(lease) = previous
            && self.is_free(store, lease.ip)
        {
            return Ok(lease.ip);
        }

        self.addresses
            .iter()
            .copied()
            .find(|ip| self.is_free(store, *ip))
            .ok_or(Error::PoolExhausted)
    }

    /// Takes `ip` out of service until [`release`](Self::release) is called.
    ///
    /// Returns false if `ip` is not a pool address.
    pub fn decline(&mut self, ip: Ipv4Addr) -> bool {
        if !self.addresses.contains(&ip) {
            return false;
        }
        self.declined.insert(ip);
        true
    }

    /// Returns a declined address to service.
    ///
    /// Returns false if `ip` was not declined.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        self.declined.remove(&ip)
    }

    pub fn declined(&self) -> &BTreeSet<Ipv4Addr> {
        &self.declined
    }

    pub fn size(&self) -> usize {
        self.addresses.len()
    }

    pub fn free_count(&self, store: &LeaseStore) -> usize {
        self.addresses
            .iter()
            .filter(|ip| self.is_free(store, **ip))
            .count()
    }
}
