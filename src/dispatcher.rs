//! Inbound packet validation pipeline (§4.3).
//!
//! This only validates framing and identity; handing a valid message to
//! the protocol state machine is the caller's job (§4.2 is driven from
//! here but lives in [`crate::state`]).

use crate::fmt::{debug, warn};
use crate::message::{RawMessage, BOOTP_HEADER_LEN};
use std::net::Ipv4Addr;

/// Why an inbound frame was rejected before reaching the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadFraming,
    NotWhitelisted,
    Blacklisted,
    TooLong,
    XidMismatch,
    ChaddrMismatch,
}

/// Configuration for the accept/reject checks (§4.3 steps 2, 4-6).
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy<'a> {
    pub whitelist: &'a [Ipv4Addr],
    pub blacklist: &'a [Ipv4Addr],
    /// Point-to-point peer; a mismatch is logged but not rejected.
    pub peer: Option<Ipv4Addr>,
}

impl DispatchPolicy<'_> {
    fn source_allowed(&self, from: Ipv4Addr) -> Result<(), Rejection> {
        if !self.whitelist.is_empty() && !self.whitelist.contains(&from) {
            return Err(Rejection::NotWhitelisted);
        }
        if self.blacklist.contains(&from) {
            return Err(Rejection::Blacklisted);
        }
        if let Some(peer) = self.peer {
            if peer != from {
                warn!("packet from {:?}, expected point-to-point peer", from);
            }
        }
        Ok(())
    }
}

/// Validates one inbound frame per §4.3 and returns the message view, or
/// the reason it was rejected.
///
/// `partial_checksum` reflects whatever the link-layer collaborator
/// reported for this frame (§6 `valid_udp_packet`'s `partial` flag); actual
/// checksum verification is the collaborator's job; this only records the
/// flag for logging.
pub fn accept<'a>(
    buf: &'a [u8],
    from: Ipv4Addr,
    policy: &DispatchPolicy<'_>,
    expected_xid: u32,
    hwaddr: &[u8],
    partial_checksum: bool,
) -> Result<RawMessage<'a>, Rejection> {
    policy.source_allowed(from)?;

    if buf.len() > BOOTP_HEADER_LEN + 312 + 4 {
        return Err(Rejection::TooLong);
    }
    let msg = RawMessage::new(buf).map_err(|_| Rejection::BadFraming)?;

    debug!(
        "dispatch: from={:?} partial_csum={} xid={:#x}",
        from, partial_checksum, msg.xid()
    );

    if msg.xid() != expected_xid {
        return Err(Rejection::XidMismatch);
    }

    let hlen = usize::from(msg.hlen()).min(hwaddr.len());
    if msg.chaddr()[..hlen] != hwaddr[..hlen] {
        return Err(Rejection::ChaddrMismatch);
    }

    Ok(msg)
}
