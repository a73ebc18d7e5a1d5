//! Lease records and the in-memory lease table.
//!
//! The table is keyed by IP address with a secondary index by client
//! identifier. Each address carries at most one record and each client at
//! most one record, whatever its state. Records in the [`LeaseState::Expiring`]
//! and [`LeaseState::Released`] states are kept only as hints so a returning
//! client can be offered its previous address; they never hold the address.
//!
//! # Thread Safety
//!
//! [`LeaseStore`] is a plain owned structure. The engine wraps it together
//! with the pool in a single async mutex, so every read-modify-write on a
//! given address is serialized.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::num::ParseIntError;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity a lease is bound to.
///
/// Taken from option 61 when the client sends one, otherwise the hardware
/// type followed by the hardware address. Serialized as colon-separated hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ClientId(Vec<u8>);

impl ClientId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ClientId {
    type Error = ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value
            .split(':')
            .map(|part| u8::from_str_radix(part, 16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Where a lease is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// Reserved by an OFFER, waiting for the client's REQUEST.
    Offered,
    /// Confirmed by an ACK.
    Bound,
    /// Duration elapsed; the address is free again.
    Expiring,
    /// Given back by the client; the address is free again.
    Released,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offered => "offered",
            Self::Bound => "bound",
            Self::Expiring => "expiring",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// A time-bounded grant of one address to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub client_id: ClientId,
    pub state: LeaseState,
    /// When the current state began (offer sent, or last ACK).
    pub started_at: DateTime<Utc>,
    /// Lease length, or the offer hold window while `Offered`.
    pub duration_secs: u32,
    /// Transaction that created or last renewed the lease.
    pub xid: u32,
    /// Client-provided hostname (option 12), sanitized.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Lease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + TimeDelta::seconds(i64::from(self.duration_secs))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Offered and Bound leases hold their address.
    pub fn is_active(&self) -> bool {
        matches!(self.state, LeaseState::Offered | LeaseState::Bound)
    }

    /// Seconds left before expiry, or 0.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

/// The lease table.
#[derive(Debug, Default)]
pub struct LeaseStore {
    by_ip: HashMap<Ipv4Addr, Lease>,
    by_client: HashMap<ClientId, Ipv4Addr>,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `lease` as the whole record for its address.
    ///
    /// A stale hint left at the address by another client is discarded, as
    /// is the client's own record at a different address. Returns the record
    /// previously stored at the address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationConflict`] if another client holds the
    /// address with an Offered or Bound lease. The table is unchanged.
    pub fn put(&mut self, lease: Lease) -> Result<Option<Lease>> {
        if let Some(existing) = self.by_ip.get(&lease.ip)
            && existing.client_id != lease.client_id
            && existing.is_active()
        {
            return Err(Error::AllocationConflict(lease.ip));
        }

        if let Some(&old_ip) = self.by_client.get(&lease.client_id)
            && old_ip != lease.ip
        {
            self.by_ip.remove(&old_ip);
        }

        let previous = self.by_ip.insert(lease.ip, lease.clone());
        if let Some(previous) = &previous
            && previous.client_id != lease.client_id
        {
            self.by_client.remove(&previous.client_id);
        }
        self.by_client.insert(lease.client_id, lease.ip);

        Ok(previous)
    }

    pub fn get_by_ip(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.by_ip.get(&ip)
    }

    pub fn get_by_client(&self, client_id: &ClientId) -> Option<&Lease> {
        self.by_client
            .get(client_id)
            .and_then(|ip| self.by_ip.get(ip))
    }

    /// The lease holding `ip`, if any. Hints are not returned.
    pub fn holder(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.by_ip.get(&ip).filter(|lease| lease.is_active())
    }

    pub fn remove(&mut self, ip: Ipv4Addr) -> Option<Lease> {
        let lease = self.by_ip.remove(&ip)?;
        if self.by_client.get(&lease.client_id) == Some(&ip) {
            self.by_client.remove(&lease.client_id);
        }
        Some(lease)
    }

    /// Reclaims leases whose time is up.
    ///
    /// Offered leases past the hold window are removed; Bound leases past
    /// their duration become Expiring. Returns the freed addresses in
    /// ascending order.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<Ipv4Addr> {
        let mut freed: Vec<Ipv4Addr> = self
            .by_ip
            .values()
            .filter(|lease| lease.is_active() && lease.is_expired(now))
            .map(|lease| lease.ip)
            .collect();
        freed.sort();

        for ip in &freed {
            let offered = self
                .by_ip
                .get(ip)
                .is_some_and(|lease| lease.state == LeaseState::Offered);
            if offered {
                self.remove(*ip);
            } else if let Some(lease) = self.by_ip.get_mut(ip) {
                lease.state = LeaseState::Expiring;
            }
        }

        freed
    }

    /// All records, hints included, ordered by address.
    pub fn leases(&self) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self.by_ip.values().cloned().collect();
        leases.sort_by_key(|lease| lease.ip);
        leases
    }

    pub fn active_count(&self) -> usize {
        self.by_ip.values().filter(|lease| lease.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client_id(mac: &[u8; 6]) -> ClientId {
        let mut id = vec![1u8];
        id.extend_from_slice(mac);
        ClientId::new(id)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn lease(ip: [u8; 4], client: &ClientId, state: LeaseState, duration_secs: u32) -> Lease {
        Lease {
            ip: Ipv4Addr::from(ip),
            client_id: client.clone(),
            state,
            started_at: t0(),
            duration_secs,
            xid: 1,
            hostname: None,
        }
    }

    #[test]
    fn test_client_id_display_and_parse() {
        let id = make_client_id(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(id.to_string(), "01:aa:bb:cc:dd:ee:ff");
        assert_eq!(ClientId::try_from(id.to_string()).unwrap(), id);
        assert!(ClientId::try_from("zz:01".to_string()).is_err());
    }

    #[test]
    fn test_lease_timing() {
        let client = make_client_id(&[1, 2, 3, 4, 5, 6]);
        let bound = lease([10, 0, 0, 10], &client, LeaseState::Bound, 3600);
        assert_eq!(bound.expires_at(), t0() + TimeDelta::seconds(3600));
        assert!(!bound.is_expired(t0() + TimeDelta::seconds(3599)));
        assert!(bound.is_expired(t0() + TimeDelta::seconds(3600)));
        assert_eq!(bound.remaining_seconds(t0() + TimeDelta::seconds(600)), 3000);
        assert_eq!(bound.remaining_seconds(t0() + TimeDelta::seconds(9000)), 0);
        assert!(bound.is_active());
        assert!(!lease([10, 0, 0, 10], &client, LeaseState::Released, 0).is_active());
    }

    #[test]
    fn test_put_and_lookup() {
        let mut store = LeaseStore::new();
        let client = make_client_id(&[1, 2, 3, 4, 5, 6]);
        let record = lease([10, 0, 0, 10], &client, LeaseState::Offered, 30);

        assert!(store.put(record.clone()).unwrap().is_none());
        assert_eq!(store.get_by_ip(record.ip), Some(&record));
        assert_eq!(store.get_by_client(&client), Some(&record));
        assert_eq!(store.holder(record.ip), Some(&record));
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_put_replaces_whole_record() {
        let mut store = LeaseStore::new();
        let client = make_client_id(&[1, 2, 3, 4, 5, 6]);
        let offered = lease([10, 0, 0, 10], &client, LeaseState::Offered, 30);
        store.put(offered.clone()).unwrap();

        let bound = Lease {
            xid: 2,
            ..lease([10, 0, 0, 10], &client, LeaseState::Bound, 3600)
        };
        let previous = store.put(bound.clone()).unwrap();
        assert_eq!(previous, Some(offered));
        assert_eq!(store.get_by_ip(bound.ip), Some(&bound));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_conflict_with_other_client() {
        let mut store = LeaseStore::new();
        let client_a = make_client_id(&[0xaa; 6]);
        let client_b = make_client_id(&[0xbb; 6]);
        store
            .put(lease([10, 0, 0, 10], &client_a, LeaseState::Bound, 3600))
            .unwrap();

        let result = store.put(lease([10, 0, 0, 10], &client_b, LeaseState::Offered, 30));
        assert!(matches!(result, Err(Error::AllocationConflict(ip)) if ip == Ipv4Addr::new(10, 0, 0, 10)));
        assert_eq!(store.get_by_ip(Ipv4Addr::new(10, 0, 0, 10)).unwrap().client_id, client_a);
        assert!(store.get_by_client(&client_b).is_none());
    }

    #[test]
    fn test_put_over_stale_hint() {
        let mut store = LeaseStore::new();
        let client_a = make_client_id(&[0xaa; 6]);
        let client_b = make_client_id(&[0xbb; 6]);
        store
            .put(lease([10, 0, 0, 10], &client_a, LeaseState::Released, 3600))
            .unwrap();

        store
            .put(lease([10, 0, 0, 10], &client_b, LeaseState::Offered, 30))
            .unwrap();
        assert!(store.get_by_client(&client_a).is_none());
        assert_eq!(store.get_by_client(&client_b).unwrap().ip, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_client_moving_drops_old_record() {
        let mut store = LeaseStore::new();
        let client = make_client_id(&[1, 2, 3, 4, 5, 6]);
        store
            .put(lease([10, 0, 0, 10], &client, LeaseState::Bound, 3600))
            .unwrap();
        store
            .put(lease([10, 0, 0, 11], &client, LeaseState::Offered, 30))
            .unwrap();

        assert!(store.get_by_ip(Ipv4Addr::new(10, 0, 0, 10)).is_none());
        assert_eq!(store.get_by_client(&client).unwrap().ip, Ipv4Addr::new(10, 0, 0, 11));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut store = LeaseStore::new();
        let client = make_client_id(&[1, 2, 3, 4, 5, 6]);
        store
            .put(lease([10, 0, 0, 10], &client, LeaseState::Bound, 3600))
            .unwrap();

        assert!(store.remove(Ipv4Addr::new(10, 0, 0, 10)).is_some());
        assert!(store.remove(Ipv4Addr::new(10, 0, 0, 10)).is_none());
        assert!(store.get_by_client(&client).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_due() {
        let mut store = LeaseStore::new();
        let client_a = make_client_id(&[0xaa; 6]);
        let client_b = make_client_id(&[0xbb; 6]);
        let client_c = make_client_id(&[0xcc; 6]);
        store
            .put(lease([10, 0, 0, 10], &client_a, LeaseState::Offered, 30))
            .unwrap();
        store
            .put(lease([10, 0, 0, 11], &client_b, LeaseState::Bound, 60))
            .unwrap();
        store
            .put(lease([10, 0, 0, 12], &client_c, LeaseState::Bound, 3600))
            .unwrap();

        assert!(store.expire_due(t0() + TimeDelta::seconds(10)).is_empty());

        let freed = store.expire_due(t0() + TimeDelta::seconds(60));
        assert_eq!(
            freed,
            vec![Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 11)]
        );
        assert!(store.get_by_ip(Ipv4Addr::new(10, 0, 0, 10)).is_none());
        let expiring = store.get_by_client(&client_b).unwrap();
        assert_eq!(expiring.state, LeaseState::Expiring);
        assert!(store.holder(Ipv4Addr::new(10, 0, 0, 11)).is_none());
        assert_eq!(store.active_count(), 1);

        assert!(store.expire_due(t0() + TimeDelta::seconds(120)).is_empty());
    }

    #[test]
    fn test_lease_serde() {
        let client = make_client_id(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let record = Lease {
            hostname: Some("laptop".to_string()),
            ..lease([10, 0, 0, 10], &client, LeaseState::Bound, 3600)
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"01:aa:bb:cc:dd:ee:ff\""));
        assert!(json.contains("\"bound\""));
        let decoded: Lease = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
