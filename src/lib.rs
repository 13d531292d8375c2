//! Protocol core of a DHCPv4 client.
//!
//! This crate is the state machine and wire codec for acquiring, renewing,
//! rebinding, and releasing an IPv4 lease on a single interface. It owns no
//! socket, no event loop, and no kernel route table: those are external
//! collaborators, described as traits in [`collab`] and driven by
//! [`Session`].
//!
//! # Feature Flags
//!
//! * `log`: logging via the [`log`] crate (default).
//! * `defmt`: logging via `defmt`, for collaborator implementations running
//!   on constrained targets.
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod builder;
pub mod collab;
pub mod config;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod hostname;
pub mod lease;
pub mod message;
pub mod options;
pub(crate) mod rand;
pub mod state;
pub mod timer;

pub use error::Error;
pub use hostname::Hostname;
pub use lease::Lease;
pub use state::State;

use builder::{build_message, BuildParams, MessageType};
use collab::{ArpProbe, EventLoop, IfaceInfo, KernelApply, LinkIo, ScriptHook};
use config::ClientConfig;
use dispatcher::{accept, DispatchPolicy};
use env::Reason;
use fmt::{debug, error as log_error, info, warn};
use message::RawMessage;
use options::{code, ParsedOptions};
use rand::Rand;
use state::{Machine, NakOutcome, OfferOutcome};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use timer::Tag;

/// DHCP server port.
pub const SERVER_PORT: u16 = 67;
/// DHCP client port.
pub const CLIENT_PORT: u16 = 68;
/// Delay a caller should sleep between emitting RELEASE and tearing down
/// the interface address, to let the kernel flush the frame (§5).
pub const RELEASE_DELAY: Duration = Duration::from_millis(10);

/// Owns the protocol [`Machine`] plus the non-protocol bookkeeping
/// (config, scratch option buffer, lease file path, last-bound message
/// bytes) for one interface. Generic over an interface identifier `I`,
/// passed through to the [`EventLoop`] and [`collab::IfaceInfo`]
/// collaborators.
pub struct Session<I> {
    /// The interface this session drives.
    pub iface: I,
    /// Configuration knobs for this interface.
    pub cfg: ClientConfig,
    machine: Machine,
    rand: Rand,
    opts: ParsedOptions,
    lease_path: PathBuf,
    /// Raw bytes of the offer/ACK currently being bound, kept around so an
    /// asynchronous ARP result can still persist the exact on-wire message
    /// (§4.4 "stored verbatim").
    pending_msg: Vec<u8>,
}

impl<I: Clone> Session<I> {
    /// Creates a new, unstarted session for `iface`.
    pub fn new(iface: I, cfg: ClientConfig, seed: u64) -> Self {
        let lease_path = cfg.lease_file.clone();
        Self {
            iface,
            cfg,
            machine: Machine::new(),
            rand: Rand::new(seed),
            opts: ParsedOptions::new(),
            lease_path,
            pending_msg: Vec::new(),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> State {
        self.machine.state
    }

    /// The currently bound lease, if any.
    pub fn lease(&self) -> Option<&Lease> {
        self.machine.new.as_ref()
    }

    /// `dhcp_start`: begins (or restarts) acquisition. Loads a cached
    /// lease from disk, if one exists and has not already expired, and
    /// enters INIT-REBOOT instead of DISCOVER when it finds one (§4.2
    /// "Reboot", §4.4).
    pub fn dhcp_start<L, E, F>(&mut self, link: &mut L, eloop: &mut E, iface_info: &mut F)
    where
        L: LinkIo,
        E: EventLoop<I>,
        F: IfaceInfo,
    {
        eloop.timeouts_delete_all(self.iface.clone());
        let cached = self.load_cached_lease();
        let state = self.machine.start(&mut self.rand, cached);
        info!("dhcp_start: state={:?}", state);
        if let Err(e) = link.open_raw_socket(0x0800) {
            log_error!("failed to open raw socket: {:?}", e);
            return;
        }
        self.send_current(link, eloop, iface_info);
    }

    /// `dhcp_inform`: bind with an externally-configured address and an
    /// infinite lease (§4.2 INFORM).
    pub fn dhcp_inform<L, E, F>(&mut self, ciaddr: Ipv4Addr, link: &mut L, eloop: &mut E, iface_info: &mut F)
    where
        L: LinkIo,
        E: EventLoop<I>,
        F: IfaceInfo,
    {
        self.machine.inform(&mut self.rand, ciaddr);
        self.send_current(link, eloop, iface_info);
    }

    /// `dhcp_release`: sends one RELEASE and drops the lease (§4.2
    /// "release"). The caller is expected to sleep [`RELEASE_DELAY`]
    /// after this returns before tearing down the kernel address (§5).
    pub fn dhcp_release<L, K>(&mut self, link: &mut L, kernel: &mut K)
    where
        L: LinkIo,
        K: KernelApply,
    {
        if self.machine.state != State::Bound {
            return;
        }
        let Some(lease) = self.machine.new.clone() else {
            return;
        };
        if !lease.cookie {
            return;
        }
        let mut buf = Vec::new();
        let params = BuildParams {
            ciaddr: lease.addr,
            server_id: Some(lease.server),
            ..Default::default()
        };
        build_message(&mut buf, MessageType::Release, &self.cfg, None, self.machine.xid, &params);
        let _ = link.send_packet(lease.server, &buf);

        let reason = self.machine.release();
        let _ = kernel.ipv4_applyaddr(None);
        let _ = lease::unlink_lease(&self.lease_path);
        link.close();
        debug!("dhcp_release: reason={}", reason.as_str());
    }

    /// `dhcp_decline`: fire-and-forget DECLINE for a failed ARP probe
    /// (§4.2 "ACK handling", on conflict).
    pub fn dhcp_decline<L: LinkIo>(&mut self, link: &mut L, offered: Ipv4Addr, server: Option<Ipv4Addr>) {
        let mut buf = Vec::new();
        let params = BuildParams {
            requested_addr: Some(offered),
            server_id: server,
            ..Default::default()
        };
        build_message(&mut buf, MessageType::Decline, &self.cfg, None, self.machine.xid, &params);
        let _ = link.send_raw_packet(&buf);
    }

    /// `dhcp_drop(reason)`: discards the current lease without notifying
    /// the server (link-down, fatal I/O error).
    pub fn dhcp_drop<K: KernelApply>(&mut self, reason: Reason, kernel: &mut K) {
        self.machine.old = self.machine.new.take();
        self.machine.state = State::Init;
        let _ = kernel.ipv4_applyaddr(None);
        warn!("dhcp_drop: reason={}", reason.as_str());
    }

    /// `dhcp_close`: tears down sockets and cancels timers; safe to call
    /// from any state.
    pub fn dhcp_close<L: LinkIo, E: EventLoop<I>>(&mut self, link: &mut L, eloop: &mut E) {
        link.close();
        eloop.timeouts_delete_all(self.iface.clone());
    }

    /// Handles one of the timers scheduled through [`EventLoop`]:
    /// retransmit, T1/T2, lease expiry, or the NAK/REBOOT fallback delay
    /// (§4.2 state diagram).
    pub fn dhcp_timeout<L, E, K, F>(&mut self, tag: Tag, link: &mut L, eloop: &mut E, kernel: &mut K, iface_info: &mut F)
    where
        L: LinkIo,
        E: EventLoop<I>,
        K: KernelApply,
        F: IfaceInfo,
    {
        match tag {
            Tag::Discover | Tag::Request => self.send_current(link, eloop, iface_info),
            Tag::Renew => {
                self.machine.renew(&mut self.rand);
                // Renew unicasts over the kernel UDP socket (§4.2 "renew"),
                // which dhcp_start never opens (it only opens the raw
                // socket); open it here before the first unicast attempt.
                if let Err(e) = link.open_udp_socket() {
                    log_error!("failed to open udp socket for renew: {:?}", e);
                }
                self.send_current(link, eloop, iface_info);
            }
            Tag::Rebind => {
                self.machine.rebind(&mut self.rand);
                self.send_current(link, eloop, iface_info);
            }
            Tag::Expire => {
                let reason = self.machine.expire();
                let _ = kernel.ipv4_applyaddr(None);
                warn!("lease timed out: reason={}", reason.as_str());
                self.dhcp_start(link, eloop, iface_info);
            }
            Tag::Fallback => self.dhcp_start(link, eloop, iface_info),
            Tag::Ipv4ll | Tag::Arp => {}
        }
    }

    /// `dhcp_handlepacket`: the event hook registered per interface.
    /// Validates the frame (§4.3) and feeds it to the protocol state
    /// machine (§4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn dhcp_handlepacket<L, E, K, A, S, F>(
        &mut self,
        buf: &[u8],
        from: Ipv4Addr,
        partial_checksum: bool,
        link: &mut L,
        eloop: &mut E,
        kernel: &mut K,
        arp: &mut A,
        script: &mut S,
        iface_info: &mut F,
    ) where
        L: LinkIo,
        E: EventLoop<I>,
        K: KernelApply,
        A: ArpProbe,
        S: ScriptHook,
        F: IfaceInfo,
    {
        let policy = DispatchPolicy::default();
        let msg = match accept(buf, from, &policy, self.machine.xid, &self.cfg.hwaddr, partial_checksum) {
            Ok(msg) => msg,
            Err(rejection) => {
                debug!("dropped inbound packet: {:?}", rejection);
                return;
            }
        };

        msg.parse_options(&mut self.opts);
        let msg_type = self.opts.get_u8(code::MESSAGE_TYPE).ok().and_then(MessageType::from_u8);

        match msg_type {
            None => self.handle_bootp_reply(&msg, link, eloop, kernel, arp, script),
            Some(MessageType::Offer) if self.machine.state == State::Discover => {
                self.handle_offer(&msg, link, eloop, kernel, arp, script, iface_info)
            }
            Some(MessageType::Ack)
                if matches!(
                    self.machine.state,
                    State::Request | State::Renew | State::Rebind | State::Reboot | State::Inform
                ) =>
            {
                self.machine.reset_nak_backoff();
                self.finish_bind(&msg, link, eloop, kernel, arp, script);
            }
            Some(MessageType::Nak) => self.handle_nak(link, eloop),
            _ => debug!("ignoring message type {:?} in state {:?}", msg_type, self.machine.state),
        }
    }

    fn handle_bootp_reply<L, E, K, A, S>(
        &mut self,
        msg: &RawMessage<'_>,
        link: &mut L,
        eloop: &mut E,
        kernel: &mut K,
        arp: &mut A,
        script: &mut S,
    ) where
        L: LinkIo,
        E: EventLoop<I>,
        K: KernelApply,
        A: ArpProbe,
        S: ScriptHook,
    {
        if self.cfg.requires(code::SERVER_ID) {
            debug!("ignoring BOOTP reply: server-id is required");
            return;
        }
        if self.machine.state != State::Discover {
            return;
        }
        self.machine.reset_nak_backoff();
        self.finish_bind(msg, link, eloop, kernel, arp, script);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_offer<L, E, K, A, S, F>(
        &mut self,
        msg: &RawMessage<'_>,
        link: &mut L,
        eloop: &mut E,
        kernel: &mut K,
        arp: &mut A,
        script: &mut S,
        iface_info: &mut F,
    ) where
        L: LinkIo,
        E: EventLoop<I>,
        K: KernelApply,
        A: ArpProbe,
        S: ScriptHook,
        F: IfaceInfo,
    {
        eloop.timeout_delete(self.iface.clone(), Tag::Discover);
        self.machine.reset_nak_backoff();
        match self.machine.on_offer(msg, &self.opts) {
            OfferOutcome::SendRequest => self.send_current(link, eloop, iface_info),
            OfferOutcome::BindDirectly => self.finish_bind(msg, link, eloop, kernel, arp, script),
        }
    }

    /// Builds the lease from `msg`, probes for a conflict if configured to
    /// (§4.2 "ACK handling"), and binds once that settles.
    fn finish_bind<L, E, K, A, S>(
        &mut self,
        msg: &RawMessage<'_>,
        link: &mut L,
        eloop: &mut E,
        kernel: &mut K,
        arp: &mut A,
        script: &mut S,
    ) where
        L: LinkIo,
        E: EventLoop<I>,
        K: KernelApply,
        A: ArpProbe,
        S: ScriptHook,
    {
        let came_from_reboot = self.machine.state == State::Reboot;
        let came_from_inform = self.machine.state == State::Inform;

        let lease = match self.machine.on_ack(msg, &self.opts) {
            Ok(l) => l,
            Err(e) => {
                warn!("rejecting ACK: {:?}", e);
                return;
            }
        };

        if matches!(self.machine.state, State::Request | State::Renew | State::Rebind | State::Inform) {
            link.close();
        }
        eloop.timeout_delete(self.iface.clone(), Tag::Request);

        self.pending_msg = msg.as_bytes().to_vec();

        if self.cfg.arp && !came_from_reboot {
            self.machine.offer = Some((lease.addr, Some(lease.server), lease.cookie));
            self.machine.new = Some(lease.clone());
            arp.arp_probe(lease.addr);
            // arp_ok/arp_conflict, driven by the caller's ArpProbe
            // implementation, complete the bind (or send DECLINE).
            return;
        }

        self.commit_lease(lease, came_from_reboot, came_from_inform, eloop);
        self.run_script_and_apply(kernel, script);
    }

    /// Call from the ARP collaborator's success callback.
    pub fn arp_ok<E, K, S, A>(&mut self, eloop: &mut E, kernel: &mut K, script: &mut S, arp: &mut A)
    where
        E: EventLoop<I>,
        K: KernelApply,
        S: ScriptHook,
        A: ArpProbe,
    {
        let Some(lease) = self.machine.new.clone() else {
            return;
        };
        self.commit_lease(lease.clone(), false, false, eloop);
        self.run_script_and_apply(kernel, script);
        if self.cfg.arp {
            arp.arp_announce(lease.addr);
        }
    }

    /// Call from the ARP collaborator's conflict callback: sends DECLINE
    /// and restarts acquisition (§4.2 "ACK handling", on conflict).
    pub fn arp_conflict<L, E, F>(&mut self, link: &mut L, eloop: &mut E, iface_info: &mut F)
    where
        L: LinkIo,
        E: EventLoop<I>,
        F: IfaceInfo,
    {
        let Some((addr, server, _)) = self.machine.offer else {
            return;
        };
        self.dhcp_decline(link, addr, server);
        self.machine.offer = None;
        self.machine.new = None;
        self.machine.state = State::Init;
        self.dhcp_start(link, eloop, iface_info);
    }

    fn commit_lease<E: EventLoop<I>>(
        &mut self,
        lease: Lease,
        came_from_reboot: bool,
        came_from_inform: bool,
        eloop: &mut E,
    ) {
        let reason = self.machine.bind(lease.clone(), came_from_reboot, came_from_inform);
        if !self.cfg.test {
            if let Ok(msg) = RawMessage::new(&self.pending_msg) {
                let _ = lease::write_lease(&self.lease_path, &msg);
            }
        }
        info!("bound: reason={} addr={}", reason.as_str(), lease.addr);

        if lease.is_infinite() {
            return;
        }
        eloop.timeout_add(
            self.iface.clone(),
            Tag::Renew,
            Duration::from_secs(u64::from(lease.renewaltime)),
        );
        eloop.timeout_add(
            self.iface.clone(),
            Tag::Rebind,
            Duration::from_secs(u64::from(lease.rebindtime)),
        );
        eloop.timeout_add(
            self.iface.clone(),
            Tag::Expire,
            Duration::from_secs(u64::from(lease.leasetime)),
        );
    }

    fn run_script_and_apply<K: KernelApply, S: ScriptHook>(&mut self, kernel: &mut K, script: &mut S) {
        let Some(lease) = self.machine.new.clone() else {
            return;
        };
        if self.cfg.test {
            script.script_run(&[("reason".to_string(), Reason::Test.as_str().to_string())]);
            return;
        }
        if kernel.ipv4_applyaddr(Some(&lease)).is_ok() {
            let mut env = env::export_lease("new", &lease, &self.opts);
            if let Ok(msg) = RawMessage::new(&self.pending_msg) {
                let filename = if self.opts.overload.file { "" } else { msg.file_str() };
                let servername = if self.opts.overload.sname { "" } else { msg.sname_str() };
                env::export_header_fields(&mut env, "new", filename, servername);
            }
            script.script_run(&env);
        }
    }

    fn handle_nak<L, E>(&mut self, link: &mut L, eloop: &mut E)
    where
        L: LinkIo,
        E: EventLoop<I>,
    {
        match self.machine.on_nak(&self.opts, &self.cfg) {
            NakOutcome::SilentlyDropped => debug!("NAK dropped: required server-id missing"),
            NakOutcome::Restart { delay_secs } => {
                let _ = lease::unlink_lease(&self.lease_path);
                link.close();
                eloop.timeout_add(self.iface.clone(), Tag::Fallback, Duration::from_secs(u64::from(delay_secs)));
            }
        }
    }

    /// Sends (or retransmits) the message appropriate to the current
    /// state, scheduling the next retransmit timer.
    fn send_current<L: LinkIo, E: EventLoop<I>, F: IfaceInfo>(&mut self, link: &mut L, eloop: &mut E, iface_info: &mut F) {
        let ciaddr = match self.machine.state {
            State::Inform => self.machine.inform_ciaddr.unwrap_or(Ipv4Addr::UNSPECIFIED),
            _ => self.machine.new.as_ref().map(|l| l.addr).unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        self.send(link, eloop, iface_info, ciaddr);
    }

    /// Queries the interface's current MTU, attempting to raise it to
    /// `cfg.min_mtu` if it falls short (§4.1 builder contract).
    fn sync_mtu<F: IfaceInfo>(&self, iface_info: &mut F) -> u16 {
        let mtu = iface_info.get_mtu();
        if mtu < self.cfg.min_mtu {
            match iface_info.set_mtu(self.cfg.min_mtu) {
                Ok(()) => self.cfg.min_mtu,
                Err(e) => {
                    warn!("failed to raise interface mtu to {}: {:?}", self.cfg.min_mtu, e);
                    mtu
                }
            }
        } else {
            mtu
        }
    }

    fn send<L: LinkIo, E: EventLoop<I>, F: IfaceInfo>(
        &mut self,
        link: &mut L,
        eloop: &mut E,
        iface_info: &mut F,
        ciaddr: Ipv4Addr,
    ) {
        let msg_type = self.machine.outbound_message_type();
        let hostname = self.cfg.hostname.clone();
        let hostname = hostname.as_deref().and_then(Hostname::new);

        // Already-configured states (renew/rebind) carry no Requested-IP or
        // Server-ID — ciaddr alone identifies the lease (§4.2 "rebind":
        // "clear Server-ID"; dhcp.c only emits those options when the
        // leased address isn't yet the interface's own address).
        let already_on_interface = matches!(self.machine.state, State::Renew | State::Rebind);
        let (requested_addr, server_id) = if already_on_interface {
            (None, None)
        } else {
            match self.machine.offer {
                Some((addr, server, _)) => (Some(addr), server),
                None => (
                    self.machine.new.as_ref().map(|l| l.addr).or(self.cfg.request_addr),
                    self.machine
                        .new
                        .as_ref()
                        .map(|l| l.server)
                        .filter(|s| *s != Ipv4Addr::UNSPECIFIED),
                ),
            }
        };

        let params = BuildParams {
            ciaddr,
            requested_addr,
            server_id,
            secs: 0,
            already_on_interface,
            max_message_size: Some(self.sync_mtu(iface_info)),
        };

        let mut buf = Vec::new();
        build_message(&mut buf, msg_type, &self.cfg, hostname, self.machine.xid, &params);

        let result = match self.machine.state {
            State::Renew => self.machine.new.as_ref().map(|l| link.send_packet(l.server, &buf)),
            _ => Some(link.send_raw_packet(&buf)),
        };
        if let Some(Err(e)) = result {
            log_error!("send failed: {:?}", e);
            return;
        }

        if matches!(
            self.machine.state,
            State::Discover | State::Request | State::Renew | State::Rebind | State::Reboot | State::Inform
        ) {
            let delay = self.machine.retransmit.next(&mut self.rand);
            let tag = match self.machine.state {
                State::Discover => Tag::Discover,
                _ => Tag::Request,
            };
            eloop.timeout_add(self.iface.clone(), tag, delay);
        }
    }

    fn load_cached_lease(&self) -> Option<Lease> {
        let (buf, mtime) = lease::read_lease_file(&self.lease_path).ok()?;
        let msg = RawMessage::new(&buf).ok()?;
        if !msg.is_dhcp() {
            return None;
        }
        let mut opts = ParsedOptions::new();
        msg.parse_options(&mut opts);
        let lease = Lease::from_message(&msg, &opts).ok()?;
        lease::age_from_mtime(lease, mtime, std::time::SystemTime::now())
    }
}
