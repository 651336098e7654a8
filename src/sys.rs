//! Process-Level System Calls
//!
//! Two small jobs the daemon needs from the operating system: the set of IP
//! addresses bound to local interfaces (mail submitted from the host itself
//! is exempt from greylisting) and dropping root privileges after binding
//! the listener. Both go through `libc` directly; the unsafe blocks are
//! confined to this module.

use anyhow::{bail, Context};
use std::collections::HashSet;
use std::ffi::CString;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Enumerates the textual IP addresses of all local interfaces.
///
/// Failure to enumerate is logged and yields an empty set: greylisting then
/// simply applies to host-local clients too, which errs on the safe side.
pub fn local_interface_addrs() -> HashSet<String> {
    let mut addrs = HashSet::new();

    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        warn!(
            "cannot get interfaces list: {}",
            std::io::Error::last_os_error()
        );
        return addrs;
    }

    let mut cursor = ifap;
    while !cursor.is_null() {
        let ifa = unsafe { &*cursor };
        if !ifa.ifa_addr.is_null() {
            match unsafe { (*ifa.ifa_addr).sa_family } as i32 {
                libc::AF_INET => {
                    let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                    addrs.insert(ip.to_string());
                }
                libc::AF_INET6 => {
                    let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                    let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                    addrs.insert(ip.to_string());
                }
                _ => {}
            }
        }
        cursor = ifa.ifa_next;
    }
    unsafe { libc::freeifaddrs(ifap) };

    addrs
}

/// Drops process privileges to the named or numeric user id.
pub fn drop_privileges(user: &str) -> anyhow::Result<()> {
    let uid = match user.parse::<libc::uid_t>() {
        Ok(uid) => uid,
        Err(_) => {
            let name = CString::new(user).context("user name contains a NUL byte")?;
            let passwd = unsafe { libc::getpwnam(name.as_ptr()) };
            if passwd.is_null() {
                bail!("cannot find UID for {user}");
            }
            unsafe { (*passwd).pw_uid }
        }
    };

    if unsafe { libc::setuid(uid) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("cannot set UID to {uid}"));
    }
    debug!("UID set to {uid}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_a_local_address() {
        let addrs = local_interface_addrs();
        assert!(
            addrs.contains("127.0.0.1"),
            "loopback missing from {addrs:?}"
        );
    }

    #[test]
    fn unknown_user_is_an_error() {
        let err = drop_privileges("no-such-user-greylag").unwrap_err();
        assert!(err.to_string().contains("cannot find UID"));
    }
}
