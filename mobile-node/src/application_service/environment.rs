//! Network environment detection.

use crate::domain::Platform;
use crate::port::platform::{NetDriver, NetInterface};
use tracing::{debug, warn};

/// Whether the node should run with the reduced feature set.
///
/// Interface enumeration failing, or a platform known to restrict
/// background networking, both count as constrained.
pub fn is_network_limited(driver: &dyn NetDriver, platform: Platform) -> bool {
    if let Err(e) = driver.interfaces() {
        warn!("Unable to enumerate network interfaces: {}", e);
        return true;
    }
    if platform.is_constrained() {
        debug!("Platform {:?} runs with a constrained network", platform);
        return true;
    }
    false
}

/// Interfaces that are up and multicast-capable.
///
/// An enumeration failure is returned rather than read as "no interfaces":
/// the caller holds the discovery lock at this point and must give it back.
pub fn multicast_interfaces(driver: &dyn NetDriver) -> anyhow::Result<Vec<NetInterface>> {
    let interfaces = driver.interfaces()?;
    Ok(interfaces
        .into_iter()
        .filter(|iface| iface.up && iface.multicast)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockNetDriver;

    fn iface(name: &str, up: bool, multicast: bool) -> NetInterface {
        NetInterface {
            name: name.to_string(),
            index: 1,
            up,
            multicast,
            loopback: false,
            addrs: vec![],
        }
    }

    #[test]
    fn test_enumeration_failure_is_constrained() {
        let driver = MockNetDriver::failing();
        assert!(is_network_limited(&driver, Platform::Desktop));
    }

    #[test]
    fn test_android_is_constrained() {
        let driver = MockNetDriver::with_interfaces(vec![iface("wlan0", true, true)]);
        assert!(is_network_limited(&driver, Platform::Android));
        assert!(!is_network_limited(&driver, Platform::Ios));
        assert!(!is_network_limited(&driver, Platform::Desktop));
    }

    #[test]
    fn test_multicast_filter() {
        let driver = MockNetDriver::with_interfaces(vec![
            iface("wlan0", true, true),
            iface("rmnet0", true, false),
            iface("eth1", false, true),
        ]);
        let found = multicast_interfaces(&driver).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "wlan0");

        assert!(multicast_interfaces(&MockNetDriver::failing()).is_err());
    }
}
