//! Client address classification and rate-limit keys.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Whether `addr` is a loopback, link-local or RFC 1918 private address.
///
/// Unparsable input is treated as public.
pub fn is_lan_ip(addr: &str) -> bool {
    match addr.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_lan_v4(v4),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => is_lan_v4(v4),
            None => is_lan_v6(v6),
        },
        Err(_) => false,
    }
}

fn is_lan_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_loopback()
        || ip.is_link_local()
        || (a == 224 && b == 0 && c == 0)
        || a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

fn is_lan_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        // fe80::/10 link-local unicast
        || (first & 0xffc0) == 0xfe80
        // ff02::/16 link-local multicast
        || (first & 0xff0f) == 0xff02
}

/// Fold a client address into the 32-bit rate-limit key.
///
/// IPv4 (including IPv4-mapped IPv6 written with dots) uses the address
/// itself. Other IPv6 addresses use the first four bytes of their textual
/// form, so unrelated IPv6 clients may share a counter. Unparsable input
/// maps to 0.
pub fn ip_key(addr: &str) -> u32 {
    let Ok(parsed) = addr.parse::<IpAddr>() else {
        return 0;
    };

    if addr.contains('.') {
        let v4 = match parsed {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        };
        return v4.map(u32::from).unwrap_or(0);
    }

    let mut head = [0u8; 4];
    for (slot, byte) in head.iter_mut().zip(addr.bytes()) {
        *slot = byte;
    }
    u32::from_be_bytes(head)
}
