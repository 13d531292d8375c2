//! The in-memory lease record and its on-disk persistence (§3, §4.4).

use crate::error::{Error, Result};
use crate::fmt::{debug, warn};
use crate::message::{end_of_options, RawMessage, BOOTP_HEADER_LEN};
use crate::options::{code, route_netmask, ParsedOptions};
use std::fs;
use std::io::Write as _;
use std::net::Ipv4Addr;
use std::os::unix::fs::OpenOptionsExt as _;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The minimum lease time the client will adopt; shorter offers are
/// clamped up to this with a warning (§3 invariants).
pub const DHCP_MIN_LEASE: u32 = 20;
/// Sentinel lease time meaning "infinite" (INFORM, some static configs).
pub const INFINITE_LEASE: u32 = 0xFFFF_FFFF;

const T1_FRACTION: f64 = 0.5;
const T2_FRACTION: f64 = 0.875;

/// A bound or offered IPv4 lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub addr: Ipv4Addr,
    pub net: Ipv4Addr,
    pub brd: Ipv4Addr,
    pub server: Ipv4Addr,
    pub leasetime: u32,
    pub renewaltime: u32,
    pub rebindtime: u32,
    /// `true` if the message this lease was built from carried the DHCP
    /// magic cookie; `false` for a plain BOOTP reply.
    pub cookie: bool,
    pub leasedfrom: u64,
    pub frominfo: bool,
}

impl Lease {
    /// Builds a lease from a parsed ACK/BOOTP reply, applying the §3
    /// invariants (minimum lease time, T1/T2 clamping and defaulting,
    /// netmask/broadcast derivation).
    pub fn from_message(msg: &RawMessage<'_>, opts: &ParsedOptions) -> Result<Self> {
        let addr = msg.yiaddr();
        let server = opts.get_addr(code::SERVER_ID).unwrap_or(Ipv4Addr::UNSPECIFIED);

        let mut leasetime = opts.get_u32(code::LEASE_TIME).unwrap_or(INFINITE_LEASE);
        if leasetime != INFINITE_LEASE && leasetime < DHCP_MIN_LEASE {
            warn!("lease time {} below minimum, clamping up", leasetime);
            leasetime = DHCP_MIN_LEASE;
        }

        let (renewaltime, rebindtime) = if leasetime == INFINITE_LEASE {
            (INFINITE_LEASE, INFINITE_LEASE)
        } else {
            let mut renewal = opts
                .get_u32(code::RENEWAL_TIME)
                .unwrap_or_else(|_| (leasetime as f64 * T1_FRACTION) as u32);
            let mut rebind = opts
                .get_u32(code::REBINDING_TIME)
                .unwrap_or_else(|_| (leasetime as f64 * T2_FRACTION) as u32);
            if rebind >= leasetime {
                rebind = (leasetime as f64 * T2_FRACTION) as u32;
            }
            if renewal > rebind {
                renewal = (leasetime as f64 * T1_FRACTION) as u32;
            }
            (renewal, rebind)
        };

        let net = opts.get_addr(code::SUBNET_MASK).unwrap_or_else(|_| route_netmask(addr));
        let brd = opts
            .get_addr(code::BROADCAST_ADDR)
            .unwrap_or_else(|_| broadcast_of(addr, net));

        Ok(Lease {
            addr,
            net,
            brd,
            server,
            leasetime,
            renewaltime,
            rebindtime,
            cookie: msg.is_dhcp(),
            leasedfrom: now_secs(),
            frominfo: false,
        })
    }

    pub fn is_infinite(&self) -> bool {
        self.leasetime == INFINITE_LEASE
    }

    /// Subtracts `elapsed` seconds from the lease's timers, for the mtime
    /// adjustment on load (§4.4, scenario 6). No-op for infinite leases.
    pub fn age(&mut self, elapsed: u32) {
        if self.is_infinite() {
            return;
        }
        self.leasetime = self.leasetime.saturating_sub(elapsed);
        self.renewaltime = self.renewaltime.saturating_sub(elapsed);
        self.rebindtime = self.rebindtime.saturating_sub(elapsed);
    }
}

fn broadcast_of(addr: Ipv4Addr, net: Ipv4Addr) -> Ipv4Addr {
    let a = u32::from(addr);
    let m = u32::from(net);
    Ipv4Addr::from(a | !m)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Writes `msg`'s bytes, from offset 0 through the END option inclusive, to
/// `path`. BOOTP messages (no cookie) are never persisted; see
/// [`unlink_lease`] instead.
pub fn write_lease(path: &Path, msg: &RawMessage<'_>) -> Result<()> {
    if !msg.is_dhcp() {
        debug!("not persisting a BOOTP lease");
        return Ok(());
    }
    let bytes = msg.as_bytes();
    let end = end_of_options(bytes).unwrap_or(bytes.len());
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o444)
        .open(path)?;
    file.write_all(&bytes[..end])?;
    Ok(())
}

pub fn unlink_lease(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Reads a persisted lease, returning both the raw message bytes (padded
/// with zeros to the fixed header length if the file was short) and its
/// modification time, for the caller to re-validate and age (§4.4).
pub fn read_lease_file(path: &Path) -> Result<(Vec<u8>, SystemTime)> {
    let meta = fs::metadata(path)?;
    let mtime = meta.modified()?;
    let mut buf = fs::read(path)?;
    if buf.len() < BOOTP_HEADER_LEN {
        buf.resize(BOOTP_HEADER_LEN, 0);
    }
    Ok((buf, mtime))
}

/// Applies the mtime-based timer adjustment: if the lease has already
/// expired relative to `now`, returns `None` (discard); otherwise returns
/// the lease aged by `now - mtime`.
pub fn age_from_mtime(mut lease: Lease, mtime: SystemTime, now: SystemTime) -> Option<Lease> {
    let elapsed = now.duration_since(mtime).ok()?.as_secs();
    if !lease.is_infinite() && u64::from(lease.leasetime) < elapsed {
        return None;
    }
    lease.age(elapsed as u32);
    Some(lease)
}

/// Derives the network number (`addr & net`), used for the
/// `_network_number` script variable.
pub fn network_number(addr: Ipv4Addr, net: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & u32::from(net))
}

/// Mask width in bits (CIDR prefix length), for the `_subnet_cidr` script
/// variable.
pub fn cidr_of(net: Ipv4Addr) -> u32 {
    u32::from(net).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_lease() -> Lease {
        Lease {
            addr: Ipv4Addr::new(192, 168, 1, 50),
            net: Ipv4Addr::new(255, 255, 255, 0),
            brd: Ipv4Addr::new(192, 168, 1, 255),
            server: Ipv4Addr::new(192, 168, 1, 1),
            leasetime: 3600,
            renewaltime: 1800,
            rebindtime: 3150,
            cookie: true,
            leasedfrom: 0,
            frominfo: false,
        }
    }

    #[test]
    fn mtime_adjustment_reduces_timers() {
        let lease = sample_lease();
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let now = mtime + Duration::from_secs(600);
        let aged = age_from_mtime(lease, mtime, now).unwrap();
        assert_eq!(aged.leasetime, 3000);
        assert_eq!(aged.renewaltime, 1200);
        assert_eq!(aged.rebindtime, 2550);
    }

    #[test]
    fn mtime_adjustment_discards_expired_lease() {
        let lease = sample_lease();
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let now = mtime + Duration::from_secs(7200);
        assert!(age_from_mtime(lease, mtime, now).is_none());
    }

    #[test]
    fn infinite_lease_is_never_aged() {
        let mut lease = sample_lease();
        lease.leasetime = INFINITE_LEASE;
        lease.renewaltime = INFINITE_LEASE;
        lease.rebindtime = INFINITE_LEASE;
        lease.age(600);
        assert_eq!(lease.leasetime, INFINITE_LEASE);
    }

    #[test]
    fn broadcast_derivation() {
        let addr = Ipv4Addr::new(192, 168, 1, 50);
        let net = Ipv4Addr::new(255, 255, 255, 0);
        assert_eq!(broadcast_of(addr, net), Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn network_number_and_cidr() {
        let addr = Ipv4Addr::new(192, 168, 1, 50);
        let net = Ipv4Addr::new(255, 255, 255, 0);
        assert_eq!(network_number(addr, net), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(cidr_of(net), 24);
    }
}
