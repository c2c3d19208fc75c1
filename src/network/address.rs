//! Address Classification
//!
//! Finds this host's IPv4 interface and decides whether two hosts can reach
//! each other directly (same subnet) or must relay through the store.

use std::net::Ipv4Addr;

use get_if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use thiserror::Error;
use tracing::debug;

use crate::core::participant::{parse_interface, ParticipantError};

/// Address discovery errors.
#[derive(Debug, Error)]
pub enum AddressError {
    /// Interfaces could not be listed.
    #[error("failed to list network interfaces: {0}")]
    Interfaces(#[from] std::io::Error),
    /// No non-loopback IPv4 interface exists.
    #[error("no IPv4 interface found")]
    NoIpv4Interface,
    /// Configured advertise address is malformed.
    #[error(transparent)]
    Advertise(#[from] ParticipantError),
}

/// This host's primary IPv4 address and prefix length.
///
/// `advertise` (`a.b.c.d/prefix`) bypasses interface discovery.
pub fn local_interface(advertise: Option<&str>) -> Result<Ipv4Net, AddressError> {
    if let Some(text) = advertise {
        return Ok(parse_interface(text)?);
    }

    for iface in get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if let IfAddr::V4(v4) = iface.addr {
            let prefix = prefix_from_netmask(v4.netmask);
            let net = Ipv4Net::new(v4.ip, prefix).map_err(|_| AddressError::NoIpv4Interface)?;
            debug!(interface = %iface.name, address = %net, "local interface");
            return Ok(net);
        }
    }

    Err(AddressError::NoIpv4Interface)
}

/// Prefix length of a contiguous netmask. Non-contiguous masks count their
/// leading ones only.
pub fn prefix_from_netmask(netmask: Ipv4Addr) -> u8 {
    u32::from(netmask).leading_ones() as u8
}

/// Whether `a` and `b` agree on the bits covered by the shorter of their two
/// prefixes.
pub fn same_subnet(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    let prefix = a.prefix_len().min(b.prefix_len());
    let mask = prefix_mask(prefix);
    u32::from(a.addr()) & mask == u32::from(b.addr()) & mask
}

fn prefix_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_subnet_basic() {
        assert!(same_subnet(&net("192.168.1.10/24"), &net("192.168.1.200/24")));
        assert!(!same_subnet(&net("192.168.1.10/24"), &net("192.168.2.10/24")));
    }

    #[test]
    fn test_shorter_prefix_wins() {
        // /16 on one side covers only the first two octets.
        assert!(same_subnet(&net("10.1.2.3/16"), &net("10.1.9.9/24")));
        assert!(!same_subnet(&net("10.1.2.3/16"), &net("10.2.2.3/24")));
    }

    #[test]
    fn test_prefix_edges() {
        assert!(same_subnet(&net("1.2.3.4/0"), &net("200.0.0.1/24")));
        assert!(same_subnet(&net("1.2.3.4/32"), &net("1.2.3.4/32")));
        assert!(!same_subnet(&net("1.2.3.4/32"), &net("1.2.3.5/32")));
    }

    #[test]
    fn test_prefix_from_netmask() {
        assert_eq!(prefix_from_netmask(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(prefix_from_netmask(Ipv4Addr::new(255, 255, 240, 0)), 20);
        assert_eq!(prefix_from_netmask(Ipv4Addr::new(0, 0, 0, 0)), 0);
        assert_eq!(prefix_from_netmask(Ipv4Addr::new(255, 255, 255, 255)), 32);
    }

    #[test]
    fn test_advertise_override() {
        assert_eq!(
            local_interface(Some("172.16.4.2/12")).unwrap(),
            net("172.16.4.2/12")
        );
        assert!(matches!(
            local_interface(Some("not-an-address")),
            Err(AddressError::Advertise(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_same_subnet_is_symmetric(a: u32, b: u32, pa in 0u8..=32, pb in 0u8..=32) {
            let x = Ipv4Net::new(Ipv4Addr::from(a), pa).unwrap();
            let y = Ipv4Net::new(Ipv4Addr::from(b), pb).unwrap();
            prop_assert_eq!(same_subnet(&x, &y), same_subnet(&y, &x));
        }

        #[test]
        fn prop_host_shares_subnet_with_itself(a: u32, pa in 0u8..=32, pb in 0u8..=32) {
            let x = Ipv4Net::new(Ipv4Addr::from(a), pa).unwrap();
            let y = Ipv4Net::new(Ipv4Addr::from(a), pb).unwrap();
            prop_assert!(same_subnet(&x, &y));
        }
    }
}
