//! Timer tagging for the event-loop binding (§4.6/§9 design notes).
//!
//! The original keys timers by C function pointer; we key by a small enum
//! instead so the event loop can delete-then-reschedule idempotently
//! without comparing function identity.

/// Which per-interface timeout a scheduled callback corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    /// DISCOVER retransmit.
    Discover,
    /// REQUEST retransmit (also used by RENEW/REBIND/REBOOT/INFORM).
    Request,
    /// Fires at `renewaltime`, starting RENEW.
    Renew,
    /// Fires at `rebindtime`, starting REBIND.
    Rebind,
    /// Fires at `leasetime`, dropping the lease.
    Expire,
    /// Restart delay after a NAK, or after REBOOT's timeout elapses.
    Fallback,
    /// IPv4LL (link-local) fallback hand-off.
    Ipv4ll,
    /// ARP probe/announce retry.
    Arp,
}

/// Identifies a scheduled timeout: one interface, one purpose.
///
/// The event loop's `add_timeout`/`delete_timeouts` collaborators (§6) key
/// on this pair so that scheduling a timer first cancels any existing one
/// with the same key (§5 ordering guarantees).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey<I> {
    pub iface: I,
    pub tag: Tag,
}

impl<I> TimerKey<I> {
    pub fn new(iface: I, tag: Tag) -> Self {
        Self { iface, tag }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_same_iface_differ_by_tag() {
        let a = TimerKey::new(0u32, Tag::Renew);
        let b = TimerKey::new(0u32, Tag::Rebind);
        assert_ne!(a, b);
        let c = TimerKey::new(0u32, Tag::Renew);
        assert_eq!(a, c);
    }
}
