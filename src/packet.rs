//! BOOTP/DHCP message codec per RFC 2131.
//!
//! A message is a fixed 236-byte BOOTP header, the 4-byte magic cookie,
//! then TLV options up to an End marker.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +---------------+---------------+---------------+---------------+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |          ciaddr / yiaddr / siaddr / giaddr (4 each)           |
//! +---------------------------------------------------------------+
//! |     chaddr (16)  |  sname (64)  |  file (128)                 |
//! +---------------------------------------------------------------+
//! |                 magic cookie (4) = 99.130.83.99               |
//! +---------------------------------------------------------------+
//! |                       options (variable)                      |
//! +---------------------------------------------------------------+
//! ```

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::lease::ClientId;
use crate::options::{DhcpOption, MessageType, OptionCode, OverloadFlag};

/// Identifies the vendor area as DHCP options rather than plain BOOTP.
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const CHADDR_OFFSET: usize = 28;
const CHADDR_SIZE: usize = 16;
const SNAME_OFFSET: usize = CHADDR_OFFSET + CHADDR_SIZE;
const SNAME_SIZE: usize = 64;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_SIZE;
const FILE_SIZE: usize = 128;

/// Length of the fixed BOOTP header.
pub const BOOTP_HEADER_SIZE: usize = FILE_OFFSET + FILE_SIZE;

/// Header plus magic cookie; anything shorter is rejected.
pub const DHCP_FIXED_HEADER_SIZE: usize = BOOTP_HEADER_SIZE + DHCP_MAGIC_COOKIE.len();

/// Encoded messages are padded to this size for BOOTP relay compatibility.
pub const DHCP_MIN_PACKET_SIZE: usize = 300;

/// Relay agents increment hops; more than this indicates a loop.
const MAX_HOPS: u8 = 16;

const BROADCAST_FLAG: u16 = 0x8000;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

/// A decoded DHCP message, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    /// [`BOOTREQUEST`] or [`BOOTREPLY`].
    pub op: u8,
    pub htype: u8,
    /// Significant bytes of `chaddr`, at most 16.
    pub hlen: u8,
    pub hops: u8,
    /// Client-chosen transaction id, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    /// Bit 15 is the broadcast flag.
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    /// Relay agent address; non-zero when the message came through a relay.
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    /// Options in wire order, overloaded `file`/`sname` options appended.
    pub options: Vec<DhcpOption>,
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

impl DhcpPacket {
    /// Decodes a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the datagram is shorter than 240
    /// bytes, the magic cookie is wrong, hops exceed 16, `hlen` is
    /// inconsistent, or an option is truncated or badly sized.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        if data[BOOTP_HEADER_SIZE..DHCP_FIXED_HEADER_SIZE] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let (op, htype, hlen, hops) = (data[0], data[1], data[2], data[3]);

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "Hop count {} exceeds maximum {}",
                hops, MAX_HOPS
            )));
        }

        if hlen as usize > CHADDR_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Hardware address length {} exceeds {}",
                hlen, CHADDR_SIZE
            )));
        }

        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} for Ethernet (expected {})",
                hlen, HLEN_ETHERNET
            )));
        }

        let mut chaddr = [0u8; CHADDR_SIZE];
        chaddr.copy_from_slice(&data[CHADDR_OFFSET..SNAME_OFFSET]);
        let mut sname = [0u8; SNAME_SIZE];
        sname.copy_from_slice(&data[SNAME_OFFSET..FILE_OFFSET]);
        let mut file = [0u8; FILE_SIZE];
        file.copy_from_slice(&data[FILE_OFFSET..BOOTP_HEADER_SIZE]);

        let mut options = Self::parse_options(&data[DHCP_FIXED_HEADER_SIZE..])?;

        // Overloaded fields are folded into the option list and cleared, so
        // the decoded message re-encodes as a plain packet.
        let overload = options.iter().find_map(|opt| match opt {
            DhcpOption::OptionOverload(flag) => Some(*flag),
            _ => None,
        });
        if let Some(flag) = overload {
            options.retain(|opt| !matches!(opt, DhcpOption::OptionOverload(_)));
            if matches!(flag, OverloadFlag::File | OverloadFlag::Both) {
                options.extend(Self::parse_options(&file)?);
                file = [0u8; FILE_SIZE];
            }
            if matches!(flag, OverloadFlag::Sname | OverloadFlag::Both) {
                options.extend(Self::parse_options(&sname)?);
                sname = [0u8; SNAME_SIZE];
            }
        }

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ipv4_at(data, 12),
            yiaddr: ipv4_at(data, 16),
            siaddr: ipv4_at(data, 20),
            giaddr: ipv4_at(data, 24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            let Some(&length) = data.get(index + 1) else {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            };
            let value_start = index + 2;
            let value_end = value_start + length as usize;

            let Some(value) = data.get(value_start..value_end) else {
                return Err(Error::InvalidPacket(format!(
                    "Option {} data truncated",
                    code
                )));
            };

            options.push(DhcpOption::parse(code, value)?);
            index = value_end;
        }

        Ok(options)
    }

    /// Encodes the message for transmission, padded to at least 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(576);

        packet.extend_from_slice(&[self.op, self.htype, self.hlen, self.hops]);
        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            packet.extend_from_slice(&addr.octets());
        }

        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);
        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }
        packet.push(OptionCode::End as u8);

        if packet.len() < DHCP_MIN_PACKET_SIZE {
            packet.resize(DHCP_MIN_PACKET_SIZE, 0);
        }

        packet
    }

    fn find_option<'a, T>(&'a self, pick: impl Fn(&'a DhcpOption) -> Option<T>) -> Option<T> {
        self.options.iter().find_map(pick)
    }

    /// Option 53. `None` means plain BOOTP, which this server ignores.
    pub fn message_type(&self) -> Option<MessageType> {
        self.find_option(|opt| match opt {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    /// Option 50.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.find_option(|opt| match opt {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Option 54.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.find_option(|opt| match opt {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Option 61, raw.
    pub fn client_identifier(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::ClientIdentifier(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    /// Option 82, raw. Relays expect it back unchanged.
    pub fn relay_agent_info(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::RelayAgentInfo(info) => Some(info.as_slice()),
            _ => None,
        })
    }

    /// Option 12.
    pub fn hostname(&self) -> Option<&str> {
        self.find_option(|opt| match opt {
            DhcpOption::Hostname(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Option 55: codes the client wants in the reply.
    pub fn parameter_request_list(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::ParameterRequestList(params) => Some(params.as_slice()),
            _ => None,
        })
    }

    /// Option 51 as sent by the client.
    pub fn requested_lease_time(&self) -> Option<u32> {
        self.find_option(|opt| match opt {
            DhcpOption::LeaseTime(time) => Some(*time),
            _ => None,
        })
    }

    /// The `hlen` significant bytes of `chaddr`.
    pub fn chaddr_bytes(&self) -> &[u8] {
        &self.chaddr[..(self.hlen as usize).min(CHADDR_SIZE)]
    }

    /// Hardware address as `aa:bb:cc:dd:ee:ff`.
    pub fn format_mac(&self) -> String {
        self.chaddr_bytes()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The identity leases are keyed by.
    ///
    /// Option 61 when present and non-empty, otherwise `htype` followed by
    /// the hardware address. Returns `None` when the client supplied neither
    /// (no option 61 and an empty or all-zero `chaddr`).
    pub fn client_id(&self) -> Option<ClientId> {
        if let Some(id) = self.client_identifier()
            && !id.is_empty()
        {
            return Some(ClientId::new(id.to_vec()));
        }

        let hardware = self.chaddr_bytes();
        if hardware.iter().all(|byte| *byte == 0) {
            return None;
        }

        let mut id = Vec::with_capacity(hardware.len() + 1);
        id.push(self.htype);
        id.extend_from_slice(hardware);
        Some(ClientId::new(id))
    }

    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    pub fn set_broadcast(&mut self) {
        self.flags |= BROADCAST_FLAG;
    }

    /// Builds an OFFER, ACK, or NAK answering `request`.
    ///
    /// Option 53 is placed first. `xid`, `flags`, `giaddr`, `chaddr`,
    /// `htype` and `hlen` are copied from the request; `ciaddr` is echoed
    /// only in ACKs, as RFC 2131 table 3 requires.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = Vec::with_capacity(options.len() + 1);
        all_options.push(DhcpOption::MessageType(message_type));
        all_options.extend(options);

        let ciaddr = if message_type == MessageType::Ack {
            request.ciaddr
        } else {
            Ipv4Addr::UNSPECIFIED
        };

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; SNAME_SIZE],
            file: [0u8; FILE_SIZE],
            options: all_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];
        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet
    }

    fn with_options(options: &[DhcpOption]) -> Vec<u8> {
        let mut packet = header();
        for option in options {
            packet.extend_from_slice(&option.encode());
        }
        packet.push(OptionCode::End as u8);
        packet
    }

    #[test]
    fn test_parse_header_fields() {
        let mut data = with_options(&[DhcpOption::MessageType(MessageType::Discover)]);
        data[3] = 5;
        data[8..10].copy_from_slice(&1234u16.to_be_bytes());
        data[12..16].copy_from_slice(&[10, 0, 0, 1]);
        data[16..20].copy_from_slice(&[10, 0, 0, 2]);
        data[20..24].copy_from_slice(&[10, 0, 0, 3]);
        data[24..28].copy_from_slice(&[10, 0, 0, 4]);
        data[44..52].copy_from_slice(b"testname");

        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.hops, 5);
        assert_eq!(packet.xid, 0x12345678);
        assert_eq!(packet.secs, 1234);
        assert!(packet.is_broadcast());
        assert_eq!(packet.ciaddr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(packet.yiaddr, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(packet.siaddr, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(packet.giaddr, Ipv4Addr::new(10, 0, 0, 4));
        assert_eq!(&packet.sname[..8], b"testname");
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_encode_then_parse_preserves_message() {
        let data = with_options(&[
            DhcpOption::MessageType(MessageType::Request),
            DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 100)),
            DhcpOption::Hostname("laptop".to_string()),
            DhcpOption::Unknown(250, vec![9, 9]),
        ]);
        let packet = DhcpPacket::parse(&data).unwrap();

        let encoded = packet.encode();
        assert!(encoded.len() >= DHCP_MIN_PACKET_SIZE);
        assert_eq!(DhcpPacket::parse(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_encode_offsets() {
        let packet = DhcpPacket {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 3,
            xid: 0x12345678,
            secs: 999,
            flags: 0x8000,
            ciaddr: Ipv4Addr::new(192, 168, 1, 10),
            yiaddr: Ipv4Addr::new(192, 168, 1, 20),
            siaddr: Ipv4Addr::new(192, 168, 1, 1),
            giaddr: Ipv4Addr::new(192, 168, 2, 1),
            chaddr: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![DhcpOption::MessageType(MessageType::Offer)],
        };

        let encoded = packet.encode();
        assert_eq!(&encoded[0..4], &[BOOTREPLY, HTYPE_ETHERNET, HLEN_ETHERNET, 3]);
        assert_eq!(&encoded[4..8], &0x12345678u32.to_be_bytes());
        assert_eq!(&encoded[8..10], &999u16.to_be_bytes());
        assert_eq!(&encoded[10..12], &0x8000u16.to_be_bytes());
        assert_eq!(&encoded[12..16], &[192, 168, 1, 10]);
        assert_eq!(&encoded[16..20], &[192, 168, 1, 20]);
        assert_eq!(&encoded[20..24], &[192, 168, 1, 1]);
        assert_eq!(&encoded[24..28], &[192, 168, 2, 1]);
        assert_eq!(&encoded[28..34], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&encoded[236..240], &DHCP_MAGIC_COOKIE);
        assert_eq!(&encoded[240..243], &[53, 1, 2]);
        assert_eq!(encoded[243], OptionCode::End as u8);
        assert_eq!(encoded.len(), DHCP_MIN_PACKET_SIZE);
    }

    #[test]
    fn test_invalid_packets() {
        assert!(DhcpPacket::parse(&[0u8; 100]).is_err());
        assert!(DhcpPacket::parse(&[0u8; 239]).is_err());

        let mut bad_cookie = header();
        bad_cookie[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(DhcpPacket::parse(&bad_cookie).is_err());
    }

    #[test]
    fn test_hlen_validation() {
        let mut packet = header();
        packet[2] = 7;
        assert!(DhcpPacket::parse(&packet).is_err());

        packet[1] = 6;
        packet[2] = 17;
        assert!(DhcpPacket::parse(&packet).is_err());

        packet[2] = 16;
        assert!(DhcpPacket::parse(&packet).is_ok());
    }

    #[test]
    fn test_hops_limit() {
        let mut packet = header();
        packet[3] = 17;
        assert!(DhcpPacket::parse(&packet).is_err());
        packet[3] = 16;
        assert!(DhcpPacket::parse(&packet).is_ok());
    }

    #[test]
    fn test_pad_bytes_skipped() {
        let mut packet = header();
        packet.extend_from_slice(&[0, 0, 0, 53, 1, 1, 0, 0, 255]);
        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.options, vec![DhcpOption::MessageType(MessageType::Discover)]);
    }

    #[test]
    fn test_options_without_end_marker() {
        let mut packet = header();
        packet.extend_from_slice(&[53, 1, 3]);
        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.message_type(), Some(MessageType::Request));
    }

    #[test]
    fn test_truncated_option_length() {
        let mut packet = header();
        packet.push(OptionCode::LeaseTime as u8);
        assert!(DhcpPacket::parse(&packet).is_err());
    }

    #[test]
    fn test_truncated_option_data() {
        let mut packet = header();
        packet.extend_from_slice(&[OptionCode::LeaseTime as u8, 4, 0, 0]);
        assert!(DhcpPacket::parse(&packet).is_err());
    }

    #[test]
    fn test_unknown_option_preserved() {
        let mut packet = header();
        packet.extend_from_slice(&[200, 4, 0xde, 0xad, 0xbe, 0xef, 255]);
        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(
            parsed.options,
            vec![DhcpOption::Unknown(200, vec![0xde, 0xad, 0xbe, 0xef])]
        );
    }

    #[test]
    fn test_zero_length_option() {
        let mut packet = header();
        packet.extend_from_slice(&[OptionCode::ParameterRequestList as u8, 0, 255]);
        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.parameter_request_list(), Some(&[][..]));
    }

    #[test]
    fn test_duplicate_message_type_first_wins() {
        let data = with_options(&[
            DhcpOption::MessageType(MessageType::Discover),
            DhcpOption::MessageType(MessageType::Request),
        ]);
        let parsed = DhcpPacket::parse(&data).unwrap();
        assert_eq!(parsed.message_type(), Some(MessageType::Discover));
        assert_eq!(parsed.options.len(), 2);
    }

    #[test]
    fn test_option_overload_folds_fields() {
        let mut packet = header();
        packet[44] = OptionCode::Hostname as u8;
        packet[45] = 5;
        packet[46..51].copy_from_slice(b"sname");
        packet[51] = OptionCode::End as u8;
        packet[108] = OptionCode::DomainName as u8;
        packet[109] = 10;
        packet[110..120].copy_from_slice(b"file.local");
        packet[120] = OptionCode::End as u8;
        packet.extend_from_slice(&[53, 1, 1, 52, 1, 3, 255]);

        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.hostname(), Some("sname"));
        assert!(parsed.options.contains(&DhcpOption::DomainName("file.local".to_string())));
        assert!(
            !parsed
                .options
                .iter()
                .any(|opt| matches!(opt, DhcpOption::OptionOverload(_)))
        );
        assert_eq!(parsed.sname, [0u8; 64]);
        assert_eq!(parsed.file, [0u8; 128]);

        let reparsed = DhcpPacket::parse(&parsed.encode()).unwrap();
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_option_overload_file_only() {
        let mut packet = header();
        packet[44..52].copy_from_slice(b"server-1");
        packet[108] = OptionCode::Hostname as u8;
        packet[109] = 8;
        packet[110..118].copy_from_slice(b"filehost");
        packet[118] = OptionCode::End as u8;
        packet.extend_from_slice(&[52, 1, 1, 255]);

        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.hostname(), Some("filehost"));
        assert_eq!(&parsed.sname[..8], b"server-1");
    }

    #[test]
    fn test_client_id_prefers_option_61() {
        let data = with_options(&[DhcpOption::ClientIdentifier(vec![0, 1, 2, 3])]);
        let parsed = DhcpPacket::parse(&data).unwrap();
        assert_eq!(parsed.client_id().unwrap().as_bytes(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_client_id_from_chaddr() {
        let parsed = DhcpPacket::parse(&header()).unwrap();
        assert_eq!(
            parsed.client_id().unwrap().as_bytes(),
            &[1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
    }

    #[test]
    fn test_client_id_missing() {
        let mut data = header();
        data[28..44].copy_from_slice(&[0u8; 16]);
        let parsed = DhcpPacket::parse(&data).unwrap();
        assert!(parsed.client_id().is_none());

        let data = {
            let mut data = with_options(&[DhcpOption::ClientIdentifier(vec![])]);
            data[28..44].copy_from_slice(&[0u8; 16]);
            data
        };
        assert!(DhcpPacket::parse(&data).unwrap().client_id().is_none());
    }

    #[test]
    fn test_chaddr_bytes_respects_hlen() {
        let mut packet = header();
        packet[1] = 6;
        packet[2] = 4;
        let parsed = DhcpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.chaddr_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_create_reply_copies_request_fields() {
        let mut data = with_options(&[DhcpOption::MessageType(MessageType::Request)]);
        data[12..16].copy_from_slice(&[192, 168, 1, 100]);
        data[24..28].copy_from_slice(&[192, 168, 2, 1]);
        let request = DhcpPacket::parse(&data).unwrap();

        let ack = DhcpPacket::create_reply(
            &request,
            MessageType::Ack,
            Ipv4Addr::new(192, 168, 1, 100),
            Ipv4Addr::new(192, 168, 1, 1),
            vec![DhcpOption::LeaseTime(3600)],
        );
        assert_eq!(ack.op, BOOTREPLY);
        assert_eq!(ack.xid, request.xid);
        assert_eq!(ack.flags, request.flags);
        assert_eq!(ack.giaddr, Ipv4Addr::new(192, 168, 2, 1));
        assert_eq!(ack.chaddr, request.chaddr);
        assert_eq!(ack.ciaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(ack.options[0], DhcpOption::MessageType(MessageType::Ack));

        let nak = DhcpPacket::create_reply(
            &request,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(192, 168, 1, 1),
            vec![],
        );
        assert_eq!(nak.ciaddr, Ipv4Addr::UNSPECIFIED);
    }
}
