//! Address normalization and LAN filtering for discovery results.

use std::net::Ipv4Addr;

use crate::discovery::DiscoverOptions;

/// Normalize a reported peer address to an IPv4 dotted quad.
///
/// Unwraps IPv4-mapped IPv6 (`::ffff:a.b.c.d`), strips `%zone` suffixes, and
/// validates the remainder. Anything that is not IPv4 afterwards is dropped.
pub fn normalize_address(raw: &str) -> Option<Ipv4Addr> {
    let s = raw.trim();
    let s = s.strip_prefix("::ffff:").unwrap_or(s);
    let s = s.split('%').next().unwrap_or(s);
    s.parse::<Ipv4Addr>().ok()
}

/// Apply the configured address filter.
///
/// Defaults keep only RFC1918 addresses (`10/8`, `172.16/12`, `192.168/16`),
/// exclude loopback, and drop link-local `169.254/16`.
pub fn keep_address(ip: &Ipv4Addr, options: &DiscoverOptions) -> bool {
    if ip.is_loopback() {
        return options.include_loopback;
    }
    if !options.only_lan_ipv4 {
        return true;
    }
    ip.is_private() && !ip.is_link_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DiscoverOptions {
        DiscoverOptions::default()
    }

    #[test]
    fn normalize_unwraps_mapped_ipv6() {
        assert_eq!(
            normalize_address("::ffff:192.168.1.5"),
            Some(Ipv4Addr::new(192, 168, 1, 5))
        );
    }

    #[test]
    fn normalize_strips_zone() {
        assert_eq!(
            normalize_address("10.0.0.7%eth0"),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
    }

    #[test]
    fn normalize_rejects_non_ipv4() {
        assert_eq!(normalize_address("fe80::1"), None);
        assert_eq!(normalize_address("300.1.1.1"), None);
        assert_eq!(normalize_address("receiver.local"), None);
    }

    #[test]
    fn default_filter_keeps_rfc1918_only() {
        let options = defaults();
        assert!(keep_address(&Ipv4Addr::new(10, 1, 2, 3), &options));
        assert!(keep_address(&Ipv4Addr::new(172, 16, 0, 1), &options));
        assert!(keep_address(&Ipv4Addr::new(192, 168, 0, 1), &options));

        assert!(!keep_address(&Ipv4Addr::new(8, 8, 8, 8), &options));
        assert!(!keep_address(&Ipv4Addr::new(169, 254, 1, 1), &options));
        assert!(!keep_address(&Ipv4Addr::new(127, 0, 0, 1), &options));
        assert!(!keep_address(&Ipv4Addr::new(172, 32, 0, 1), &options));
    }

    #[test]
    fn loopback_opt_in() {
        let options = DiscoverOptions {
            include_loopback: true,
            ..Default::default()
        };
        assert!(keep_address(&Ipv4Addr::LOCALHOST, &options));
    }

    #[test]
    fn wan_allowed_when_lan_filter_off() {
        let options = DiscoverOptions {
            only_lan_ipv4: false,
            ..Default::default()
        };
        assert!(keep_address(&Ipv4Addr::new(8, 8, 8, 8), &options));
        assert!(!keep_address(&Ipv4Addr::LOCALHOST, &options));
    }
}
