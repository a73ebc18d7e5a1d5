use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};

/// Default lease length handed to clients (24 hours).
pub const DEFAULT_LEASE_SECONDS: u32 = 86400;

/// Shortest lease a client may negotiate through option 51.
pub const DEFAULT_MIN_LEASE_SECONDS: u32 = 60;

/// How long an OFFERED address stays reserved waiting for a REQUEST.
///
/// Kept below the usual 60 second client retry ceiling so unanswered
/// offers cannot pin the pool.
pub const DEFAULT_OFFER_HOLD_SECONDS: u32 = 30;

/// Period of the background expiry sweep.
pub const DEFAULT_RECLAIM_INTERVAL_SECONDS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    /// Individually listed addresses that extend the contiguous range.
    pub additional_addresses: Vec<Ipv4Addr>,
    /// Addresses inside the pool that are never handed out.
    pub reserved_addresses: Vec<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_duration_seconds: u32,
    pub min_lease_seconds: u32,
    pub renewal_time_seconds: Option<u32>,
    pub rebinding_time_seconds: Option<u32>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub mtu: Option<u16>,
    pub offer_hold_seconds: u32,
    pub reclaim_interval_seconds: u64,
    /// Interfaces to serve. Empty means one socket on all interfaces.
    pub interfaces: Vec<String>,
    pub leases_file: String,
    pub custom_options: Vec<CustomOption>,
}

/// An option sent verbatim to clients that list its code in option 55.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 200),
            additional_addresses: Vec::new(),
            reserved_addresses: Vec::new(),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            domain_name: None,
            lease_duration_seconds: DEFAULT_LEASE_SECONDS,
            min_lease_seconds: DEFAULT_MIN_LEASE_SECONDS,
            renewal_time_seconds: None,
            rebinding_time_seconds: None,
            broadcast_address: None,
            mtu: None,
            offer_hold_seconds: DEFAULT_OFFER_HOLD_SECONDS,
            reclaim_interval_seconds: DEFAULT_RECLAIM_INTERVAL_SECONDS,
            interfaces: Vec::new(),
            leases_file: "leases.json".to_string(),
            custom_options: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if !self.in_subnet(self.pool_start) || !self.in_subnet(self.pool_end) {
            return Err(Error::InvalidConfig(
                "pool range must lie inside the server's subnet".to_string(),
            ));
        }

        if self.ip_in_pool(self.server_ip) {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the pool".to_string(),
            ));
        }

        if let Some(gateway) = self.gateway
            && self.ip_in_pool(gateway)
        {
            return Err(Error::InvalidConfig(
                "gateway must not be within the pool".to_string(),
            ));
        }

        for address in &self.additional_addresses {
            if !self.in_subnet(*address) {
                return Err(Error::InvalidConfig(format!(
                    "additional address {} is outside the server's subnet",
                    address
                )));
            }
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.min_lease_seconds > self.lease_duration_seconds {
            return Err(Error::InvalidConfig(
                "min_lease_seconds must not exceed lease_duration_seconds".to_string(),
            ));
        }

        if self.offer_hold_seconds == 0 || self.offer_hold_seconds >= self.lease_duration_seconds
        {
            return Err(Error::InvalidConfig(
                "offer_hold_seconds must be positive and shorter than the lease".to_string(),
            ));
        }

        if self.reclaim_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "reclaim_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.dns_servers.len() > 63 {
            return Err(Error::InvalidConfig(
                "dns_servers must list at most 63 addresses".to_string(),
            ));
        }

        if let Some(ref domain) = self.domain_name
            && domain.len() > 255
        {
            return Err(Error::InvalidConfig(
                "domain_name exceeds 255 bytes".to_string(),
            ));
        }

        for option in &self.custom_options {
            if option.code == 0 || option.code == 255 {
                return Err(Error::InvalidConfig(format!(
                    "custom option code {} is reserved",
                    option.code
                )));
            }
            if option.data.len() > 255 {
                return Err(Error::InvalidConfig(format!(
                    "custom option {} exceeds 255 bytes",
                    option.code
                )));
            }
        }

        Ok(())
    }

    /// Every address the pool may hand out, ascending, reservations excluded.
    pub fn pool_addresses(&self) -> BTreeSet<Ipv4Addr> {
        let reserved: BTreeSet<Ipv4Addr> = self.reserved_addresses.iter().copied().collect();
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        (start..=end)
            .map(Ipv4Addr::from)
            .chain(self.additional_addresses.iter().copied())
            .filter(|ip| !reserved.contains(ip))
            .filter(|ip| *ip != self.server_ip && Some(*ip) != self.gateway)
            .collect()
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);
        (addr >= start && addr <= end) || self.additional_addresses.contains(&ip)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_addresses().len()
    }

    pub fn in_subnet(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.subnet_mask);
        u32::from(ip) & mask == u32::from(self.server_ip) & mask
    }

    pub fn calculate_broadcast(&self) -> Ipv4Addr {
        if let Some(broadcast) = self.broadcast_address {
            return broadcast;
        }

        let ip = u32::from(self.server_ip);
        let mask = u32::from(self.subnet_mask);
        let broadcast = ip | !mask;
        Ipv4Addr::from(broadcast)
    }

    pub fn renewal_time(&self, lease_seconds: u32) -> u32 {
        self.renewal_time_seconds
            .unwrap_or(lease_seconds / 2)
            .min(lease_seconds)
    }

    pub fn rebinding_time(&self, lease_seconds: u32) -> u32 {
        self.rebinding_time_seconds
            .unwrap_or(((lease_seconds as u64 * 7) / 8) as u32)
            .min(lease_seconds)
    }
}

/// Reduces a client-supplied hostname to a DNS-safe label.
///
/// Keeps ASCII alphanumerics, `-` and `.`, lowercases, and caps the result
/// at 63 characters.
pub fn sanitize_hostname(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
        .map(|c| c.to_ascii_lowercase())
        .take(63)
        .collect::<String>()
        .trim_matches(|c| c == '-' || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_start_greater_than_end() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 1, 200),
            pool_end: Ipv4Addr::new(192, 168, 1, 100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_ip_in_pool() {
        let config = Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 150),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offer_hold_must_be_shorter_than_lease() {
        let config = Config {
            lease_duration_seconds: 30,
            min_lease_seconds: 10,
            offer_hold_seconds: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reserved_custom_option_code() {
        let config = Config {
            custom_options: vec![CustomOption {
                code: 255,
                data: vec![1],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_too_many_dns_servers() {
        let mut config = Config {
            dns_servers: (1..=63).map(|last| Ipv4Addr::new(10, 1, 1, last)).collect(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.dns_servers.push(Ipv4Addr::new(10, 1, 1, 64));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_domain_name_too_long() {
        let config = Config {
            domain_name: Some("a".repeat(256)),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_outside_subnet() {
        let config = Config {
            pool_start: Ipv4Addr::new(10, 0, 0, 10),
            pool_end: Ipv4Addr::new(10, 0, 0, 20),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ip_in_pool() {
        let config = Config {
            additional_addresses: vec![Ipv4Addr::new(192, 168, 1, 20)],
            ..Default::default()
        };
        assert!(config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 150)));
        assert!(config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 50)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 250)));
    }

    #[test]
    fn test_pool_size_excludes_reserved() {
        let config = Config::default();
        assert_eq!(config.pool_size(), 101);

        let config = Config {
            reserved_addresses: vec![Ipv4Addr::new(192, 168, 1, 100)],
            additional_addresses: vec![Ipv4Addr::new(192, 168, 1, 20)],
            ..Default::default()
        };
        assert_eq!(config.pool_size(), 101);
        let addresses = config.pool_addresses();
        assert_eq!(addresses.first(), Some(&Ipv4Addr::new(192, 168, 1, 20)));
        assert!(!addresses.contains(&Ipv4Addr::new(192, 168, 1, 100)));
    }

    #[test]
    fn test_calculate_broadcast() {
        let config = Config::default();
        assert_eq!(
            config.calculate_broadcast(),
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    #[test]
    fn test_renewal_and_rebinding_defaults() {
        let config = Config::default();
        assert_eq!(config.renewal_time(3600), 1800);
        assert_eq!(config.rebinding_time(3600), 3150);

        let config = Config {
            renewal_time_seconds: Some(1000),
            rebinding_time_seconds: Some(9000),
            ..Default::default()
        };
        assert_eq!(config.renewal_time(3600), 1000);
        assert_eq!(config.rebinding_time(3600), 3600);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "server_ip": "10.0.0.1",
            "pool_start": "10.0.0.10",
            "pool_end": "10.0.0.12",
            "gateway": "10.0.0.1"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.offer_hold_seconds, DEFAULT_OFFER_HOLD_SECONDS);
        assert_eq!(config.lease_duration_seconds, DEFAULT_LEASE_SECONDS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitize_hostname() {
        assert_eq!(sanitize_hostname("My Laptop!"), "mylaptop");
        assert_eq!(sanitize_hostname("-host.local."), "host.local");
        assert_eq!(sanitize_hostname(&"a".repeat(100)).len(), 63);
    }
}
