//! External collaborator traits (§6 "Consumed from collaborators").
//!
//! The state machine in [`crate::state`] is generic over these traits
//! rather than tied to a concrete socket/event-loop implementation, the
//! same way [`w5500-hl`'s `Udp`/`Common`][hl] traits let the protocol
//! logic run over any register backend. A caller wires up raw-socket I/O,
//! ARP, kernel route installation, and the event loop; this crate never
//! touches any of them directly.
//!
//! [hl]: https://github.com/newAM/w5500-rs

use crate::lease::Lease;
use crate::timer::Tag;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Raw link-layer and UDP framing, out of scope per §1 ("raw-socket / BPF
/// link-layer I/O", "UDP socket I/O for unicast renew").
pub trait LinkIo {
    /// Opens a raw socket bound to `ethertype` on the interface.
    fn open_raw_socket(&mut self, ethertype: u16) -> crate::error::Result<()>;
    /// Sends a raw Ethernet frame.
    fn send_raw_packet(&mut self, bytes: &[u8]) -> crate::error::Result<()>;
    /// Polls for one inbound raw frame. Returns the payload length and
    /// whether its UDP checksum was only partially computed (NIC
    /// offload), or `None` if nothing is pending.
    fn get_raw_packet(&mut self, buf: &mut [u8]) -> crate::error::Result<Option<(usize, bool)>>;
    /// Opens a kernel UDP socket for unicast renew traffic.
    fn open_udp_socket(&mut self) -> crate::error::Result<()>;
    /// Sends `bytes` unicast to `to` over the kernel UDP socket.
    fn send_packet(&mut self, to: Ipv4Addr, bytes: &[u8]) -> crate::error::Result<()>;
    /// Closes whichever of the raw/UDP sockets are open.
    fn close(&mut self);
}

/// Interface introspection: MTU and currently-configured address (§6).
pub trait IfaceInfo {
    fn hwaddr(&self) -> [u8; 6];
    fn get_mtu(&self) -> u16;
    /// Attempts to raise the interface MTU; used when `MTU_MIN` exceeds
    /// the current value (§4.1 builder contract).
    fn set_mtu(&mut self, mtu: u16) -> crate::error::Result<()>;
    fn has_address(&self) -> bool;
    fn get_address(&self) -> Option<(Ipv4Addr, Ipv4Addr)>;
}

/// Duplicate-address detection, invoked as a subroutine (§1, §4.2 PROBE).
pub trait ArpProbe {
    fn arp_probe(&mut self, addr: Ipv4Addr);
    fn arp_announce(&mut self, addr: Ipv4Addr);
}

/// Kernel address/route installation, a single "apply current lease"
/// procedure (§1, §6 `ipv4_applyaddr`).
pub trait KernelApply {
    /// `lease = None` means remove whatever address/routes are installed.
    fn ipv4_applyaddr(&mut self, lease: Option<&Lease>) -> crate::error::Result<()>;
}

/// The user-script hook (§6 `script_run`). This crate only formats the
/// environment (see [`crate::env`]); launching a process is the caller's
/// job per §1/§12.
pub trait ScriptHook {
    fn script_run(&mut self, env: &[(String, String)]);
}

/// Thin adapter over a single-threaded event loop (§2 item 6, §6
/// `eloop_*`).
pub trait EventLoop<I> {
    /// Registers a readable-fd callback; `fd` is opaque to the state
    /// machine, supplied by [`LinkIo`]'s concrete implementation.
    fn event_add(&mut self, fd: i32);
    fn event_delete(&mut self, fd: i32);
    /// Schedules `(iface, tag)` to fire after `delay`, replacing any
    /// existing timeout with the same key (§5 ordering guarantees).
    fn timeout_add(&mut self, iface: I, tag: Tag, delay: Duration);
    /// Removes the single `(iface, tag)` timeout, if any.
    fn timeout_delete(&mut self, iface: I, tag: Tag);
    /// Removes every timeout for `iface`, regardless of tag.
    fn timeouts_delete_all(&mut self, iface: I);
}
