//! DHCP options as defined in RFC 2132.
//!
//! Each option on the wire is a code byte, a length byte, and `length`
//! bytes of value. Options the server understands are decoded into typed
//! [`DhcpOption`] variants; everything else is kept verbatim as
//! [`DhcpOption::Unknown`] so it survives a decode/encode cycle untouched.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3046: DHCP Relay Agent Information Option (Option 82)

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Options carry a 1-byte length, so at most 63 IPv4 addresses fit in one.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

const MAX_OPTION_LEN: usize = 255;

/// Option codes this server decodes into typed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DnsServer = 6,
    Hostname = 12,
    DomainName = 15,
    InterfaceMtu = 26,
    BroadcastAddress = 28,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    OptionOverload = 52,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    RenewalTime = 58,
    RebindingTime = 59,
    ClientIdentifier = 61,
    RelayAgentInfo = 82,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Pad,
            1 => Self::SubnetMask,
            3 => Self::Router,
            6 => Self::DnsServer,
            12 => Self::Hostname,
            15 => Self::DomainName,
            26 => Self::InterfaceMtu,
            28 => Self::BroadcastAddress,
            50 => Self::RequestedIpAddress,
            51 => Self::LeaseTime,
            52 => Self::OptionOverload,
            53 => Self::MessageType,
            54 => Self::ServerIdentifier,
            55 => Self::ParameterRequestList,
            58 => Self::RenewalTime,
            59 => Self::RebindingTime,
            61 => Self::ClientIdentifier,
            82 => Self::RelayAgentInfo,
            255 => Self::End,
            other => return Err(other),
        })
    }
}

/// DHCP message types (Option 53), RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with an address offer.
    Offer = 2,
    /// Client request for offered parameters, or a renewal.
    Request = 3,
    /// Client reports the address is already in use.
    Decline = 4,
    /// Server commits the lease.
    Ack = 5,
    /// Server refuses the request; client restarts at DISCOVER.
    Nak = 6,
    /// Client gives the address back.
    Release = 7,
    /// Client asks for configuration only.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => return Err(other),
        })
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// Option overload flags (Option 52), RFC 2132 §9.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    /// The `file` field holds options.
    File = 1,
    /// The `sname` field holds options.
    Sname = 2,
    /// Both fields hold options.
    Both = 3,
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

/// A decoded DHCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    /// Router addresses; the first is the default gateway.
    Router(Vec<Ipv4Addr>),
    DnsServer(Vec<Ipv4Addr>),
    Hostname(String),
    DomainName(String),
    InterfaceMtu(u16),
    BroadcastAddress(Ipv4Addr),
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds.
    LeaseTime(u32),
    OptionOverload(OverloadFlag),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    /// T1 in seconds.
    RenewalTime(u32),
    /// T2 in seconds.
    RebindingTime(u32),
    ClientIdentifier(Vec<u8>),
    /// Opaque relay sub-options, echoed back to the relay.
    RelayAgentInfo(Vec<u8>),
    /// Any other code, carried as raw bytes.
    Unknown(u8, Vec<u8>),
}

fn invalid(what: &str) -> Error {
    Error::InvalidPacket(format!("Invalid {} length", what))
}

fn ipv4(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().map_err(|_| invalid(what))?;
    Ok(Ipv4Addr::from(octets))
}

fn ipv4_list(data: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return Err(invalid(what));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

fn seconds(data: &[u8], what: &str) -> Result<u32> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| invalid(what))?;
    Ok(u32::from_be_bytes(bytes))
}

fn single_byte(data: &[u8], what: &str) -> Result<u8> {
    match data {
        [value] => Ok(*value),
        _ => Err(invalid(what)),
    }
}

fn tlv(code: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len().min(MAX_OPTION_LEN);
    let mut result = Vec::with_capacity(len + 2);
    result.push(code);
    result.push(len as u8);
    result.extend_from_slice(&data[..len]);
    result
}

fn address_bytes(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs
        .iter()
        .take(MAX_ADDRESSES_PER_OPTION)
        .flat_map(|addr| addr.octets())
        .collect()
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        let code = match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask,
            Self::Router(_) => OptionCode::Router,
            Self::DnsServer(_) => OptionCode::DnsServer,
            Self::Hostname(_) => OptionCode::Hostname,
            Self::DomainName(_) => OptionCode::DomainName,
            Self::InterfaceMtu(_) => OptionCode::InterfaceMtu,
            Self::BroadcastAddress(_) => OptionCode::BroadcastAddress,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress,
            Self::LeaseTime(_) => OptionCode::LeaseTime,
            Self::OptionOverload(_) => OptionCode::OptionOverload,
            Self::MessageType(_) => OptionCode::MessageType,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList,
            Self::RenewalTime(_) => OptionCode::RenewalTime,
            Self::RebindingTime(_) => OptionCode::RebindingTime,
            Self::ClientIdentifier(_) => OptionCode::ClientIdentifier,
            Self::RelayAgentInfo(_) => OptionCode::RelayAgentInfo,
            Self::Unknown(code, _) => return *code,
        };
        code as u8
    }

    /// Decodes one option value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] when a known option carries a value
    /// of the wrong size, or for Pad/End which have no value.
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        let option = match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Self::SubnetMask(ipv4(data, "subnet mask")?),
            Ok(OptionCode::Router) => Self::Router(ipv4_list(data, "router")?),
            Ok(OptionCode::DnsServer) => Self::DnsServer(ipv4_list(data, "DNS server")?),
            // Non-UTF-8 names stay raw so they re-encode unchanged.
            Ok(OptionCode::Hostname) => match std::str::from_utf8(data) {
                Ok(name) => Self::Hostname(name.to_string()),
                Err(_) => Self::Unknown(code, data.to_vec()),
            },
            Ok(OptionCode::DomainName) => match std::str::from_utf8(data) {
                Ok(name) => Self::DomainName(name.to_string()),
                Err(_) => Self::Unknown(code, data.to_vec()),
            },
            Ok(OptionCode::InterfaceMtu) => {
                let bytes: [u8; 2] = data.try_into().map_err(|_| invalid("MTU"))?;
                Self::InterfaceMtu(u16::from_be_bytes(bytes))
            }
            Ok(OptionCode::BroadcastAddress) => {
                Self::BroadcastAddress(ipv4(data, "broadcast address")?)
            }
            Ok(OptionCode::RequestedIpAddress) => {
                Self::RequestedIpAddress(ipv4(data, "requested IP address")?)
            }
            Ok(OptionCode::LeaseTime) => Self::LeaseTime(seconds(data, "lease time")?),
            Ok(OptionCode::OptionOverload) => {
                let value = single_byte(data, "option overload")?;
                let flag = OverloadFlag::try_from(value).map_err(|value| {
                    Error::InvalidPacket(format!("Invalid option overload value: {}", value))
                })?;
                Self::OptionOverload(flag)
            }
            Ok(OptionCode::MessageType) => {
                let value = single_byte(data, "message type")?;
                let message_type = MessageType::try_from(value).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Self::MessageType(message_type)
            }
            Ok(OptionCode::ServerIdentifier) => {
                Self::ServerIdentifier(ipv4(data, "server identifier")?)
            }
            Ok(OptionCode::ParameterRequestList) => Self::ParameterRequestList(data.to_vec()),
            Ok(OptionCode::RenewalTime) => Self::RenewalTime(seconds(data, "renewal time")?),
            Ok(OptionCode::RebindingTime) => Self::RebindingTime(seconds(data, "rebinding time")?),
            Ok(OptionCode::ClientIdentifier) => Self::ClientIdentifier(data.to_vec()),
            Ok(OptionCode::RelayAgentInfo) => Self::RelayAgentInfo(data.to_vec()),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => {
                return Err(Error::InvalidPacket(
                    "Pad/End should not be parsed as options".to_string(),
                ));
            }
            Err(unknown_code) => Self::Unknown(unknown_code, data.to_vec()),
        };
        Ok(option)
    }

    /// Encodes the option as code + length + value.
    ///
    /// Values longer than 255 bytes are truncated; address lists are capped
    /// at 63 entries.
    pub fn encode(&self) -> Vec<u8> {
        let code = self.option_code();
        match self {
            Self::SubnetMask(addr)
            | Self::BroadcastAddress(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => tlv(code, &addr.octets()),
            Self::Router(addrs) | Self::DnsServer(addrs) => tlv(code, &address_bytes(addrs)),
            Self::Hostname(name) | Self::DomainName(name) => tlv(code, name.as_bytes()),
            Self::InterfaceMtu(mtu) => tlv(code, &mtu.to_be_bytes()),
            Self::LeaseTime(time) | Self::RenewalTime(time) | Self::RebindingTime(time) => {
                tlv(code, &time.to_be_bytes())
            }
            Self::OptionOverload(flag) => tlv(code, &[*flag as u8]),
            Self::MessageType(message_type) => tlv(code, &[*message_type as u8]),
            Self::ParameterRequestList(data)
            | Self::ClientIdentifier(data)
            | Self::RelayAgentInfo(data)
            | Self::Unknown(_, data) => tlv(code, data),
        }
    }
}
