//! The protocol state machine (§4.2).
//!
//! The retransmission/NAK-backoff schedules and the state transitions are
//! kept as plain, pure methods on [`Machine`] — no socket or timer access —
//! the same way the option codec is pure functions over bytes. A thin
//! driver (in `lib.rs`, the way the teacher's `Client::process` drives its
//! state machine against a generic `Registers` backend) wires `Machine`'s
//! decisions to the [`crate::collab`] traits.

use crate::builder::MessageType;
use crate::config::ClientConfig;
use crate::env::Reason;
use crate::error::{Error, Result};
use crate::fmt::{debug, info, warn};
use crate::lease::Lease;
use crate::message::RawMessage;
use crate::options::{code, ParsedOptions};
use crate::rand::Rand;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Smallest retransmit interval, before doubling (§4.2 "Retransmission").
pub const RETRANSMIT_MIN_SECS: u32 = 4;
/// Largest retransmit interval.
pub const RETRANSMIT_MAX_SECS: u32 = 64;
/// Cap on the NAK backoff delay.
pub const NAKOFF_MAX: u32 = 60;

/// Interface protocol state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Discover,
    Request,
    Bound,
    Renew,
    Rebind,
    Reboot,
    Inform,
    Probe,
    Static,
}

/// Doubling retransmit schedule with symmetric jitter (§4.2, §8 invariant
/// "interval sequence is exactly 4,8,16,32,64,64,...").
#[derive(Debug, Clone, Copy)]
pub struct RetransmitTimer {
    interval: u32,
    first: bool,
}

impl Default for RetransmitTimer {
    fn default() -> Self {
        Self {
            interval: RETRANSMIT_MIN_SECS,
            first: true,
        }
    }
}

impl RetransmitTimer {
    /// Resets to the initial interval, for a fresh transaction.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns the delay until the next retransmit, applying jitter, and
    /// advances the schedule (doubling, capped).
    pub fn next(&mut self, rand: &mut Rand) -> Duration {
        let base = if self.first {
            self.first = false;
            self.interval
        } else {
            self.interval = (self.interval * 2).min(RETRANSMIT_MAX_SECS);
            self.interval
        };
        let jitter = rand.jitter_secs();
        let secs = (base as i64 + jitter as i64).max(1) as u64;
        Duration::from_secs(secs)
    }
}

/// NAK backoff schedule: `0, 1, 2, 4, 8, 16, 32, 60, 60, ...` (§4.2, §8).
#[derive(Debug, Clone, Copy, Default)]
pub struct NakBackoff {
    secs: u32,
    started: bool,
}

impl NakBackoff {
    /// Advances and returns the next backoff delay, in seconds.
    pub fn next(&mut self) -> u32 {
        if !self.started {
            self.started = true;
            self.secs = 0;
            return 0;
        }
        self.secs = if self.secs == 0 {
            1
        } else {
            (self.secs * 2).min(NAKOFF_MAX)
        };
        self.secs
    }

    /// Resets to the start of the sequence (§4.2: "Reset to 0 on any
    /// non-NAK message").
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of receiving a DHCPNAK (§4.2 "NAK handling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakOutcome {
    /// The NAK lacked a required server-id; dropped with no state change.
    SilentlyDropped,
    /// The current lease should be dropped and `start` rescheduled after
    /// the returned delay.
    Restart { delay_secs: u32 },
}

/// Outcome of a received OFFER (§4.2 "OFFER handling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// BOOTP offer (no cookie): bind directly, no REQUEST.
    BindDirectly,
    /// DHCP offer: send REQUEST and move to the `Request` state.
    SendRequest,
}

/// The pure protocol core for one interface: state, transaction id, and
/// the retransmit/NAK schedules. Holds no sockets, no timers, no file
/// handles.
#[derive(Debug)]
pub struct Machine {
    pub state: State,
    pub xid: u32,
    pub retransmit: RetransmitTimer,
    pub nak_backoff: NakBackoff,
    pub offer: Option<(Ipv4Addr, Option<Ipv4Addr>, bool)>, // (yiaddr, server_id, has_cookie)
    pub new: Option<Lease>,
    pub old: Option<Lease>,
    /// The externally-configured address passed to `inform`, kept around so
    /// INFORM retransmits still carry it (§4.1: `ciaddr` is set for INFORM).
    pub inform_ciaddr: Option<Ipv4Addr>,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: State::Init,
            xid: 0,
            retransmit: RetransmitTimer::default(),
            nak_backoff: NakBackoff::default(),
            offer: None,
            new: None,
            old: None,
            inform_ciaddr: None,
        }
    }

    /// Starts a fresh transaction: new xid, reset retransmit schedule,
    /// transitions to DISCOVER or REBOOT depending on whether a cached
    /// lease is available (§4.2 state diagram, "start/has-lease").
    pub fn start(&mut self, rand: &mut Rand, cached_lease: Option<Lease>) -> State {
        self.xid = rand.next_u32();
        self.retransmit.reset();
        self.offer = None;
        self.inform_ciaddr = None;
        self.state = match cached_lease {
            Some(lease) => {
                self.old = self.new.take();
                self.new = Some(lease);
                State::Reboot
            }
            None => State::Discover,
        };
        debug!("start: state={:?} xid={:#x}", self.state, self.xid);
        self.state
    }

    /// INFORM entry point: externally-configured address, no REQUEST
    /// retries beyond the generic schedule (§4.2). `ciaddr` is kept for
    /// retransmits, since it has no other source once set.
    pub fn inform(&mut self, rand: &mut Rand, ciaddr: Ipv4Addr) {
        self.xid = rand.next_u32();
        self.retransmit.reset();
        self.state = State::Inform;
        self.inform_ciaddr = Some(ciaddr);
    }

    /// Handles an inbound OFFER while in DISCOVER (§4.2 "OFFER handling").
    pub fn on_offer(&mut self, msg: &RawMessage<'_>, opts: &ParsedOptions) -> OfferOutcome {
        let server_id = opts.get_addr(code::SERVER_ID).ok();
        let has_cookie = msg.is_dhcp();
        self.offer = Some((msg.yiaddr(), server_id, has_cookie));

        if !has_cookie {
            OfferOutcome::BindDirectly
        } else {
            self.state = State::Request;
            self.retransmit.reset();
            OfferOutcome::SendRequest
        }
    }

    /// Handles an inbound ACK: builds the lease and returns it (§4.2
    /// "ACK handling", up to but not including the ARP probe hand-off,
    /// which is an external collaborator per §1/§6).
    pub fn on_ack(&mut self, msg: &RawMessage<'_>, opts: &ParsedOptions) -> Result<Lease> {
        for &required in required_ack_options(self.state) {
            if !opts.contains(required) {
                warn!("ACK missing required option {}", required);
                return Err(Error::Rejected("missing required option on ACK"));
            }
        }
        Lease::from_message(msg, opts)
    }

    /// Handles an inbound NAK (§4.2 "NAK handling").
    pub fn on_nak(&mut self, opts: &ParsedOptions, cfg: &ClientConfig) -> NakOutcome {
        if cfg.requires(code::SERVER_ID) && !opts.contains(code::SERVER_ID) {
            return NakOutcome::SilentlyDropped;
        }
        let delay_secs = self.nak_backoff.next();
        self.state = State::Init;
        NakOutcome::Restart { delay_secs }
    }

    /// Call on any non-NAK message, per §4.2.
    pub fn reset_nak_backoff(&mut self) {
        self.nak_backoff.reset();
    }

    /// Commits `lease` as bound, choosing the human-readable reason
    /// (§4.2 "bind").
    pub fn bind(&mut self, lease: Lease, came_from_reboot: bool, came_from_inform: bool) -> Reason {
        let reason = if came_from_inform {
            Reason::Inform
        } else if came_from_reboot {
            Reason::Reboot
        } else {
            match (&self.old, self.state) {
                (Some(old), State::Renew) if old.addr == lease.addr => Reason::Renew,
                (_, State::Rebind) => Reason::Rebind,
                _ => Reason::Bound,
            }
        };
        self.old = self.new.take();
        self.new = Some(lease);
        self.state = State::Bound;
        info!("bind: reason={}", reason.as_str());
        reason
    }

    /// BOUND -> RENEW: new xid, unicast REQUEST, no broadcast (§4.2
    /// "renew").
    pub fn renew(&mut self, rand: &mut Rand) {
        self.xid = rand.next_u32();
        self.retransmit.reset();
        self.state = State::Renew;
    }

    /// RENEW/BOUND -> REBIND: clear server-id, switch to broadcast
    /// (§4.2 "rebind").
    pub fn rebind(&mut self, rand: &mut Rand) {
        self.xid = rand.next_u32();
        self.retransmit.reset();
        self.state = State::Rebind;
        if let Some(lease) = &mut self.new {
            lease.server = Ipv4Addr::UNSPECIFIED;
        }
    }

    /// No ACK arrived before lease expiry (§4.2 "rebind", final
    /// paragraph).
    pub fn expire(&mut self) -> Reason {
        self.old = self.new.take();
        self.state = State::Init;
        Reason::Expire
    }

    /// BOUND -> released: caller sends one RELEASE, sleeps the
    /// teardown delay, then calls this to clear state (§4.2 "release").
    pub fn release(&mut self) -> Reason {
        self.old = self.new.take();
        self.state = State::Init;
        Reason::Release
    }

    /// Builds the outbound message type appropriate for the current
    /// state, so the caller's builder invocation stays in lock-step with
    /// the state machine.
    pub fn outbound_message_type(&self) -> MessageType {
        match self.state {
            State::Discover => MessageType::Discover,
            State::Request | State::Renew | State::Rebind | State::Reboot => MessageType::Request,
            State::Inform => MessageType::Inform,
            _ => MessageType::Request,
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// Options the spec requires present on an ACK before it is trusted,
/// beyond the address itself (§7: "required-option absence on a
/// would-be ACK is a warning and the message is dropped").
fn required_ack_options(state: State) -> &'static [u8] {
    match state {
        State::Renew => &[code::LEASE_TIME],
        _ => &[code::LEASE_TIME, code::SUBNET_MASK],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_schedule_doubles_and_caps() {
        let mut rand = Rand::new(1);
        let mut timer = RetransmitTimer::default();
        let mut bases = Vec::new();
        for _ in 0..7 {
            let d = timer.next(&mut rand);
            bases.push(d.as_secs());
        }
        // within jitter of 4,8,16,32,64,64,64
        let expected = [4u64, 8, 16, 32, 64, 64, 64];
        for (got, want) in bases.iter().zip(expected.iter()) {
            assert!(
                (*want as i64 - 1..=*want as i64 + 1).contains(&(*got as i64)),
                "got {got}, want near {want}"
            );
        }
    }

    #[test]
    fn nak_backoff_trajectory() {
        let mut nak = NakBackoff::default();
        let got: Vec<u32> = (0..8).map(|_| nak.next()).collect();
        assert_eq!(got, vec![0, 1, 2, 4, 8, 16, 32, 60]);
        assert_eq!(nak.next(), 60);
    }

    #[test]
    fn nak_requiremask_silently_dropped() {
        let mut machine = Machine::new();
        let cfg = ClientConfig {
            requiremask: vec![code::SERVER_ID],
            ..Default::default()
        };
        let opts = ParsedOptions::new();
        let outcome = machine.on_nak(&opts, &cfg);
        assert_eq!(outcome, NakOutcome::SilentlyDropped);
    }

    #[test]
    fn nak_restart_advances_backoff() {
        let mut machine = Machine::new();
        let cfg = ClientConfig::default();
        let opts = ParsedOptions::new();
        let first = machine.on_nak(&opts, &cfg);
        assert_eq!(first, NakOutcome::Restart { delay_secs: 0 });
        let second = machine.on_nak(&opts, &cfg);
        assert_eq!(second, NakOutcome::Restart { delay_secs: 1 });
    }

    #[test]
    fn bootp_offer_binds_directly() {
        let mut machine = Machine::new();
        let mut buf = vec![0u8; crate::message::BOOTP_HEADER_LEN];
        buf[0] = crate::message::BOOTREPLY;
        buf[16..20].copy_from_slice(&[10, 0, 0, 5]);
        let msg = RawMessage::new(&buf).unwrap();
        let opts = ParsedOptions::new();
        let outcome = machine.on_offer(&msg, &opts);
        assert_eq!(outcome, OfferOutcome::BindDirectly);
    }
}
