//! Network interface enumeration.
//!
//! Wraps `getifaddrs` on Unix. Other platforms report enumeration as
//! unavailable, which callers treat as a constrained network.

use crate::port::platform::{NetDriver, NetInterface};
use anyhow::Result;
use std::sync::Arc;

/// OS interface enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetDriver;

#[cfg(unix)]
impl NetDriver for SystemNetDriver {
    fn interfaces(&self) -> Result<Vec<NetInterface>> {
        use nix::net::if_::InterfaceFlags;
        use std::collections::BTreeMap;
        use std::net::IpAddr;

        let addrs = nix::ifaddrs::getifaddrs()
            .map_err(|e| anyhow::anyhow!("getifaddrs failed: {}", e))?;

        // One entry per interface name, addresses merged.
        let mut seen: BTreeMap<String, NetInterface> = BTreeMap::new();
        for ifaddr in addrs {
            let name = ifaddr.interface_name.clone();
            let entry = seen.entry(name.clone()).or_insert_with(|| NetInterface {
                index: nix::net::if_::if_nametoindex(name.as_str()).unwrap_or(0),
                name,
                up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                multicast: ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST),
                loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                addrs: Vec::new(),
            });

            let Some(address) = ifaddr.address else {
                continue;
            };
            let ip = if let Some(sin) = address.as_sockaddr_in() {
                Some(IpAddr::V4(sin.ip()))
            } else {
                address.as_sockaddr_in6().map(|sin6| IpAddr::V6(sin6.ip()))
            };
            if let Some(ip) = ip {
                if !entry.addrs.contains(&ip) {
                    entry.addrs.push(ip);
                }
            }
        }

        Ok(seen.into_values().collect())
    }
}

#[cfg(not(unix))]
impl NetDriver for SystemNetDriver {
    fn interfaces(&self) -> Result<Vec<NetInterface>> {
        anyhow::bail!("interface enumeration is not supported on this platform")
    }
}

pub fn system_net_driver() -> Arc<dyn NetDriver> {
    Arc::new(SystemNetDriver)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_enumerates_loopback() {
        let interfaces = SystemNetDriver.interfaces().unwrap();
        let loopback = interfaces.iter().find(|i| i.loopback).unwrap();
        assert!(loopback.up);
        assert!(loopback.addrs.iter().any(|a| a.is_loopback()));
    }
}
