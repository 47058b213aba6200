// src/store/server_url.rs

//! Fallback for an undefined server URL
//!
//! When the properties file does not name the URL this host is reachable
//! under, one is derived from the first usable network interface address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// Guess `http://<address>/` for this host
///
/// Prefers a non-loopback IPv4 address, then a routable IPv6 one, and falls
/// back to the loopback address.
pub fn guess_server_url() -> String {
    let addr = match interface_addresses() {
        Ok(addrs) => pick_address(&addrs),
        Err(e) => {
            warn!("Unable to list network interfaces to find local address: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    };
    server_url_for(addr)
}

pub fn server_url_for(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => format!("http://{}/", v4),
        IpAddr::V6(v6) => format!("http://[{}]/", v6),
    }
}

fn pick_address(addrs: &[IpAddr]) -> IpAddr {
    addrs
        .iter()
        .find(|a| a.is_ipv4() && !a.is_loopback())
        .or_else(|| {
            addrs
                .iter()
                .find(|a| !a.is_loopback() && !is_link_local(a))
        })
        .copied()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// fe80::/10 needs a zone id, which a URL cannot carry portably
fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

/// Addresses of all interfaces that are up
fn interface_addresses() -> io::Result<Vec<IpAddr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success the list is released with freeifaddrs below
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut addrs = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: cursor walks the list returned by getifaddrs
        let entry = unsafe { &*cursor };
        let up = entry.ifa_flags & (libc::IFF_UP as libc::c_uint) != 0;
        if up && !entry.ifa_addr.is_null() {
            // SAFETY: ifa_addr is non-null and valid until freeifaddrs
            if let Some(addr) = unsafe { sockaddr_ip(entry.ifa_addr) } {
                addrs.push(addr);
            }
        }
        cursor = entry.ifa_next;
    }

    // SAFETY: head came from a successful getifaddrs and is freed once
    unsafe { libc::freeifaddrs(head) };
    Ok(addrs)
}

/// # Safety
///
/// `sa` must point to a valid socket address whose `sa_family` matches its
/// concrete layout.
unsafe fn sockaddr_ip(sa: *const libc::sockaddr) -> Option<IpAddr> {
    match unsafe { (*sa).sa_family } as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(sa as *const libc::sockaddr_in) };
            Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(sa as *const libc::sockaddr_in6) };
            Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}
