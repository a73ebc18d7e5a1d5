//! The DHCP transaction state machine.
//!
//! Every inbound message is handled on its own; there are no per-client
//! session objects. What a client has been offered or granted is looked up
//! in the lease table by client identifier each time, so retransmitted,
//! duplicated, or reordered messages need no extra bookkeeping.
//!
//! The lease table and the pool sit behind one [`tokio::sync::Mutex`].
//! A handler takes it for its whole read-modify-write, as does the periodic
//! expiry sweep, so two transactions can never both win the same address.
//!
//! ```text
//!            DISCOVER                 REQUEST (matching)
//!   (none) -----------> Offered ------------------------> Bound
//!     ^                    |                                |
//!     |   hold elapsed     |        duration elapsed        |
//!     +--------------------+     RELEASE / DECLINE          |
//!     +-----------------------------------------------------+
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Config, sanitize_hostname};
use crate::error::Error;
use crate::lease::{ClientId, Lease, LeaseState, LeaseStore};
use crate::options::{DhcpOption, MessageType, OptionCode};
use crate::packet::{BOOTREQUEST, DhcpPacket};
use crate::persist::LeaseSnapshot;
use crate::pool::AddressPool;

/// Options that are sent whether or not the client listed them in option 55.
const ALWAYS_SENT: [OptionCode; 7] = [
    OptionCode::SubnetMask,
    OptionCode::Router,
    OptionCode::LeaseTime,
    OptionCode::MessageType,
    OptionCode::ServerIdentifier,
    OptionCode::RenewalTime,
    OptionCode::RebindingTime,
];

/// Allocation attempts per DISCOVER before giving up as exhausted.
const DISCOVER_ATTEMPTS: usize = 2;

#[derive(Debug)]
struct Bindings {
    store: LeaseStore,
    pool: AddressPool,
}

/// Address usage figures for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    pub size: usize,
    pub active: usize,
    pub free: usize,
    pub declined: usize,
}

/// Decides the reply, if any, to each client message.
#[derive(Debug)]
pub struct Engine {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    state: Mutex<Bindings>,
}

impl Engine {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails
    /// [`Config::validate`].
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>) -> crate::Result<Self> {
        config.validate()?;
        let pool = AddressPool::from_config(&config);
        Ok(Self {
            config,
            clock,
            state: Mutex::new(Bindings {
                store: LeaseStore::new(),
                pool,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Processes one decoded client message and returns the reply to send.
    ///
    /// `None` means no reply: the message was not a BOOTREQUEST, carried no
    /// message type, lacked a client identity, was addressed to another
    /// server, or the message type defines no response.
    pub async fn handle(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        if packet.op != BOOTREQUEST {
            debug!("Dropping non-BOOTREQUEST packet (op {})", packet.op);
            return None;
        }

        let mac = packet.format_mac();
        let Some(message_type) = packet.message_type() else {
            debug!("Dropping packet without message type from {}", mac);
            return None;
        };

        info!("{} from {} (xid {:#010x})", message_type, mac, packet.xid);

        if message_type == MessageType::Inform {
            return Some(self.inform(packet));
        }

        let Some(client_id) = packet.client_id() else {
            debug!("Dropping {} without client identity", message_type);
            return None;
        };

        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let bindings = &mut *guard;

        for ip in bindings.store.expire_due(now) {
            debug!("Lease on {} expired", ip);
        }

        match message_type {
            MessageType::Discover => self.discover(bindings, packet, &client_id, now),
            MessageType::Request => self.request(bindings, packet, &client_id, now),
            MessageType::Release => {
                self.release(bindings, packet, &client_id);
                None
            }
            MessageType::Decline => {
                self.decline(bindings, packet, &client_id);
                None
            }
            other => {
                debug!("Ignoring {} from {}", other, mac);
                None
            }
        }
    }

    fn discover(
        &self,
        bindings: &mut Bindings,
        packet: &DhcpPacket,
        client_id: &ClientId,
        now: DateTime<Utc>,
    ) -> Option<DhcpPacket> {
        let mac = packet.format_mac();
        let requested = packet.requested_ip();

        for _ in 0..DISCOVER_ATTEMPTS {
            let ip = match bindings.pool.allocate(&bindings.store, client_id, requested) {
                Ok(ip) => ip,
                Err(error) => {
                    warn!("Cannot offer an address to {}: {}", mac, error);
                    return None;
                }
            };

            match self.record_offer(bindings, packet, client_id, ip, now) {
                Ok(()) => {
                    let lease_time = self.negotiate_lease_time(packet);
                    let options = self.finish_options(self.lease_options(lease_time), packet);
                    let offer = DhcpPacket::create_reply(
                        packet,
                        MessageType::Offer,
                        ip,
                        self.config.server_ip,
                        options,
                    );
                    info!("OFFER {} to {}", ip, mac);
                    return Some(offer);
                }
                // Only reachable if the store and pool disagree about a holder.
                Err(Error::AllocationConflict(ip)) => {
                    warn!("Address {} taken while offering to {}, retrying", ip, mac);
                }
                Err(error) => {
                    warn!("Cannot record offer for {}: {}", mac, error);
                    return None;
                }
            }
        }

        warn!("Pool exhausted, cannot offer IP to {}", mac);
        None
    }

    fn record_offer(
        &self,
        bindings: &mut Bindings,
        packet: &DhcpPacket,
        client_id: &ClientId,
        ip: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> crate::Result<()> {
        let existing = bindings.store.get_by_client(client_id);

        // A bound client probing with DISCOVER keeps its lease as is.
        if let Some(lease) = existing
            && lease.ip == ip
            && lease.state == LeaseState::Bound
        {
            return Ok(());
        }

        let hostname = packet
            .hostname()
            .map(sanitize_hostname)
            .or_else(|| existing.and_then(|lease| lease.hostname.clone()));

        bindings.store.put(Lease {
            ip,
            client_id: client_id.clone(),
            state: LeaseState::Offered,
            started_at: now,
            duration_secs: self.config.offer_hold_seconds,
            xid: packet.xid,
            hostname,
        })?;
        Ok(())
    }

    fn request(
        &self,
        bindings: &mut Bindings,
        packet: &DhcpPacket,
        client_id: &ClientId,
        now: DateTime<Utc>,
    ) -> Option<DhcpPacket> {
        let mac = packet.format_mac();

        if let Some(server_id) = packet.server_identifier()
            && server_id != self.config.server_ip
        {
            if let Some(lease) = bindings.store.get_by_client(client_id)
                && lease.state == LeaseState::Offered
            {
                let ip = lease.ip;
                bindings.store.remove(ip);
                debug!("Withdrew offer of {} to {}", ip, mac);
            }
            info!("REQUEST from {} is for different server {}", mac, server_id);
            return None;
        }

        let Some(address) = packet.requested_ip().or(
            (!packet.ciaddr.is_unspecified()).then_some(packet.ciaddr),
        ) else {
            debug!("REQUEST from {} names no address", mac);
            return None;
        };

        if let Err(error) = bindings.pool.ensure_contains(address) {
            return Some(self.nak(packet, &error.to_string()));
        }

        if !bindings.pool.is_available_to(&bindings.store, address, client_id) {
            return Some(self.nak(packet, &format!("{} is not available", address)));
        }

        let Some(current) = bindings
            .store
            .get_by_client(client_id)
            .filter(|lease| lease.ip == address && lease.is_active())
            .cloned()
        else {
            return Some(self.nak(packet, &format!("no offer or lease for {}", address)));
        };

        let lease_time = self.negotiate_lease_time(packet);
        let lease = Lease {
            ip: address,
            client_id: client_id.clone(),
            state: LeaseState::Bound,
            started_at: now,
            duration_secs: lease_time,
            xid: packet.xid,
            hostname: packet.hostname().map(sanitize_hostname).or(current.hostname),
        };

        if let Err(error) = bindings.store.put(lease) {
            return Some(self.nak(packet, &error.to_string()));
        }

        let options = self.finish_options(self.lease_options(lease_time), packet);
        let ack = DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            address,
            self.config.server_ip,
            options,
        );

        info!("ACK {} to {} (lease: {} seconds)", address, mac, lease_time);

        Some(ack)
    }

    fn release(&self, bindings: &mut Bindings, packet: &DhcpPacket, client_id: &ClientId) {
        let mac = packet.format_mac();

        if self.for_other_server(packet) {
            debug!("RELEASE from {} is for a different server", mac);
            return;
        }

        let Some(lease) = bindings
            .store
            .get_by_client(client_id)
            .filter(|lease| lease.ip == packet.ciaddr && lease.state == LeaseState::Bound)
            .cloned()
        else {
            debug!("RELEASE from {} for {} matches no lease", mac, packet.ciaddr);
            return;
        };

        let ip = lease.ip;
        let released = Lease {
            state: LeaseState::Released,
            ..lease
        };
        match bindings.store.put(released) {
            Ok(_) => info!("RELEASE from {} for {}", mac, ip),
            Err(error) => warn!("RELEASE from {} failed: {}", mac, error),
        }
    }

    fn decline(&self, bindings: &mut Bindings, packet: &DhcpPacket, client_id: &ClientId) {
        let mac = packet.format_mac();

        if self.for_other_server(packet) {
            debug!("DECLINE from {} is for a different server", mac);
            return;
        }

        let Some(declined_ip) = packet.requested_ip() else {
            debug!("DECLINE from {} names no address", mac);
            return;
        };

        let owned = bindings
            .store
            .get_by_client(client_id)
            .is_some_and(|lease| lease.ip == declined_ip && lease.is_active());

        if !owned {
            warn!(
                "DECLINE from {} for {} rejected - IP not associated with this client",
                mac, declined_ip
            );
            return;
        }

        bindings.store.remove(declined_ip);
        bindings.pool.decline(declined_ip);
        warn!(
            "DECLINE from {} for {} - marked IP as unavailable",
            mac, declined_ip
        );
    }

    fn inform(&self, packet: &DhcpPacket) -> DhcpPacket {
        let options = self.finish_options(self.inform_options(), packet);
        let ack = DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            Ipv4Addr::UNSPECIFIED,
            self.config.server_ip,
            options,
        );

        info!("INFORM response to {}", packet.format_mac());

        ack
    }

    fn nak(&self, packet: &DhcpPacket, reason: &str) -> DhcpPacket {
        let mut options = vec![DhcpOption::ServerIdentifier(self.config.server_ip)];
        if let Some(client_id) = packet.client_identifier() {
            options.push(DhcpOption::ClientIdentifier(client_id.to_vec()));
        }
        if let Some(relay_info) = packet.relay_agent_info() {
            options.push(DhcpOption::RelayAgentInfo(relay_info.to_vec()));
        }

        let mut nak = DhcpPacket::create_reply(
            packet,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            options,
        );
        // A relay must broadcast the NAK onto the client's segment.
        if !packet.giaddr.is_unspecified() {
            nak.set_broadcast();
        }

        warn!("NAK to {}: {}", packet.format_mac(), reason);

        nak
    }

    fn for_other_server(&self, packet: &DhcpPacket) -> bool {
        packet
            .server_identifier()
            .is_some_and(|server_id| server_id != self.config.server_ip)
    }

    fn negotiate_lease_time(&self, packet: &DhcpPacket) -> u32 {
        let max_lease = self.config.lease_duration_seconds;
        let min_lease = self.config.min_lease_seconds.min(max_lease);
        match packet.requested_lease_time() {
            Some(requested) => requested.clamp(min_lease, max_lease),
            None => max_lease,
        }
    }

    fn common_options(&self, options: &mut Vec<DhcpOption>) {
        options.push(DhcpOption::SubnetMask(self.config.subnet_mask));

        if let Some(gateway) = self.config.gateway {
            options.push(DhcpOption::Router(vec![gateway]));
        }

        if !self.config.dns_servers.is_empty() {
            options.push(DhcpOption::DnsServer(self.config.dns_servers.clone()));
        }

        if let Some(ref domain) = self.config.domain_name {
            options.push(DhcpOption::DomainName(domain.clone()));
        }

        options.push(DhcpOption::BroadcastAddress(self.config.calculate_broadcast()));

        if let Some(mtu) = self.config.mtu {
            options.push(DhcpOption::InterfaceMtu(mtu));
        }
    }

    fn lease_options(&self, lease_time: u32) -> Vec<DhcpOption> {
        let mut options = vec![
            DhcpOption::ServerIdentifier(self.config.server_ip),
            DhcpOption::LeaseTime(lease_time),
        ];

        self.common_options(&mut options);

        options.push(DhcpOption::RenewalTime(self.config.renewal_time(lease_time)));
        options.push(DhcpOption::RebindingTime(
            self.config.rebinding_time(lease_time),
        ));

        options
    }

    fn inform_options(&self) -> Vec<DhcpOption> {
        let mut options = vec![DhcpOption::ServerIdentifier(self.config.server_ip)];
        self.common_options(&mut options);
        options
    }

    /// Applies option 55, appends requested custom options, and echoes the
    /// client identifier and relay agent information.
    fn finish_options(&self, options: Vec<DhcpOption>, packet: &DhcpPacket) -> Vec<DhcpOption> {
        let prl = packet.parameter_request_list();

        let mut options = filter_options_by_prl(options, prl);

        if let Some(prl) = prl {
            options.extend(
                self.config
                    .custom_options
                    .iter()
                    .filter(|custom| prl.contains(&custom.code))
                    .map(|custom| DhcpOption::Unknown(custom.code, custom.data.clone())),
            );
        }

        if let Some(client_id) = packet.client_identifier() {
            options.push(DhcpOption::ClientIdentifier(client_id.to_vec()));
        }
        if let Some(relay_info) = packet.relay_agent_info() {
            options.push(DhcpOption::RelayAgentInfo(relay_info.to_vec()));
        }

        options
    }

    /// Runs the expiry sweep outside of message handling.
    pub async fn reclaim_expired(&self) -> Vec<Ipv4Addr> {
        let now = self.clock.now();
        let mut bindings = self.state.lock().await;
        let freed = bindings.store.expire_due(now);
        for ip in &freed {
            info!("Reclaimed {}", ip);
        }
        freed
    }

    /// Returns a declined address to service. False if it was not declined.
    pub async fn clear_declined(&self, ip: Ipv4Addr) -> bool {
        let mut bindings = self.state.lock().await;
        let cleared = bindings.pool.release(ip);
        if cleared {
            info!("Cleared decline on {}", ip);
        }
        cleared
    }

    pub async fn leases(&self) -> Vec<Lease> {
        self.state.lock().await.store.leases()
    }

    pub async fn lease_for(&self, client_id: &ClientId) -> Option<Lease> {
        self.state.lock().await.store.get_by_client(client_id).cloned()
    }

    pub async fn declined(&self) -> Vec<Ipv4Addr> {
        self.state.lock().await.pool.declined().iter().copied().collect()
    }

    pub async fn usage(&self) -> PoolUsage {
        let bindings = self.state.lock().await;
        PoolUsage {
            size: bindings.pool.size(),
            active: bindings.store.active_count(),
            free: bindings.pool.free_count(&bindings.store),
            declined: bindings.pool.declined().len(),
        }
    }

    /// Bound leases and declined addresses, for persisting.
    pub async fn snapshot(&self) -> LeaseSnapshot {
        let bindings = self.state.lock().await;
        LeaseSnapshot {
            leases: bindings
                .store
                .leases()
                .into_iter()
                .filter(|lease| lease.state == LeaseState::Bound)
                .collect(),
            declined: bindings.pool.declined().iter().copied().collect(),
        }
    }

    /// Loads persisted state. Leases that are not Bound, have expired, or
    /// fall outside the pool are skipped. Returns the number restored.
    pub async fn restore(&self, snapshot: LeaseSnapshot) -> usize {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let bindings = &mut *guard;

        for ip in snapshot.declined {
            if !bindings.pool.decline(ip) {
                debug!("Ignoring persisted decline of {} outside the pool", ip);
            }
        }

        let mut restored = 0;
        for lease in snapshot.leases {
            if lease.state != LeaseState::Bound
                || lease.is_expired(now)
                || !bindings.pool.contains(lease.ip)
            {
                debug!("Skipping persisted lease on {}", lease.ip);
                continue;
            }
            let ip = lease.ip;
            match bindings.store.put(lease) {
                Ok(_) => restored += 1,
                Err(error) => warn!("Skipping persisted lease on {}: {}", ip, error),
            }
        }

        restored
    }
}

fn filter_options_by_prl(
    options: Vec<DhcpOption>,
    parameter_request_list: Option<&[u8]>,
) -> Vec<DhcpOption> {
    let Some(prl) = parameter_request_list else {
        return options;
    };

    options
        .into_iter()
        .filter(|opt| {
            let code = opt.option_code();
            ALWAYS_SENT.iter().any(|always| *always as u8 == code) || prl.contains(&code)
        })
        .collect()
}
