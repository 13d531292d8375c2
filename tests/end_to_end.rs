//! Drives a full DISCOVER -> OFFER -> REQUEST -> ACK exchange against
//! in-memory collaborator doubles, the way the original crate's
//! `end_to_end` test drove a `Client` against a simulated W5500 and a
//! real loopback UDP socket.

use dhcp4_core::builder::MessageType;
use dhcp4_core::collab::{ArpProbe, EventLoop, IfaceInfo, KernelApply, LinkIo, ScriptHook};
use dhcp4_core::config::ClientConfig;
use dhcp4_core::message::{BOOTP_HEADER_LEN, BOOTREPLY, HLEN_ETHERNET, HTYPE_ETHERNET, MAGIC_COOKIE};
use dhcp4_core::options::code;
use dhcp4_core::timer::Tag;
use dhcp4_core::{Error, Lease, Session, State};
use std::net::Ipv4Addr;
use std::time::Duration;

const MAC: [u8; 6] = [0x02, 0x34, 0x56, 0x78, 0xAB, 0xDE];
const SEED: u64 = 0x1234;

#[derive(Default)]
struct FakeLink {
    raw_sent: Vec<Vec<u8>>,
    unicast_sent: Vec<(Ipv4Addr, Vec<u8>)>,
    closed: u32,
}

impl LinkIo for FakeLink {
    fn open_raw_socket(&mut self, _ethertype: u16) -> Result<(), Error> {
        Ok(())
    }
    fn send_raw_packet(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.raw_sent.push(bytes.to_vec());
        Ok(())
    }
    fn get_raw_packet(&mut self, _buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        Ok(None)
    }
    fn open_udp_socket(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn send_packet(&mut self, to: Ipv4Addr, bytes: &[u8]) -> Result<(), Error> {
        self.unicast_sent.push((to, bytes.to_vec()));
        Ok(())
    }
    fn close(&mut self) {
        self.closed += 1;
    }
}

#[derive(Default)]
struct FakeEventLoop {
    scheduled: Vec<(u32, Tag, Duration)>,
    deleted: Vec<(u32, Tag)>,
}

impl EventLoop<u32> for FakeEventLoop {
    fn event_add(&mut self, _fd: i32) {}
    fn event_delete(&mut self, _fd: i32) {}
    fn timeout_add(&mut self, iface: u32, tag: Tag, delay: Duration) {
        self.scheduled.push((iface, tag, delay));
    }
    fn timeout_delete(&mut self, iface: u32, tag: Tag) {
        self.deleted.push((iface, tag));
    }
    fn timeouts_delete_all(&mut self, _iface: u32) {}
}

#[derive(Default)]
struct FakeKernel {
    applied: Vec<Option<Lease>>,
}

impl KernelApply for FakeKernel {
    fn ipv4_applyaddr(&mut self, lease: Option<&Lease>) -> Result<(), Error> {
        self.applied.push(lease.cloned());
        Ok(())
    }
}

#[derive(Default)]
struct FakeArp {
    probed: Vec<Ipv4Addr>,
}

impl ArpProbe for FakeArp {
    fn arp_probe(&mut self, addr: Ipv4Addr) {
        self.probed.push(addr);
    }
    fn arp_announce(&mut self, _addr: Ipv4Addr) {}
}

#[derive(Default)]
struct FakeScript {
    runs: Vec<Vec<(String, String)>>,
}

impl ScriptHook for FakeScript {
    fn script_run(&mut self, env: &[(String, String)]) {
        self.runs.push(env.to_vec());
    }
}

struct FakeIface {
    mtu: u16,
    raised_to: Vec<u16>,
}

impl Default for FakeIface {
    fn default() -> Self {
        Self {
            mtu: 1500,
            raised_to: Vec::new(),
        }
    }
}

impl IfaceInfo for FakeIface {
    fn hwaddr(&self) -> [u8; 6] {
        MAC
    }
    fn get_mtu(&self) -> u16 {
        self.mtu
    }
    fn set_mtu(&mut self, mtu: u16) -> Result<(), Error> {
        self.raised_to.push(mtu);
        self.mtu = mtu;
        Ok(())
    }
    fn has_address(&self) -> bool {
        false
    }
    fn get_address(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        None
    }
}

fn append_tlv(buf: &mut Vec<u8>, opt_code: u8, value: &[u8]) {
    buf.push(opt_code);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
}

fn server_reply(xid: u32, msg_type: u8, yiaddr: Ipv4Addr, extra: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut buf = vec![0u8; BOOTP_HEADER_LEN];
    buf[0] = BOOTREPLY;
    buf[1] = HTYPE_ETHERNET;
    buf[2] = HLEN_ETHERNET;
    buf[4..8].copy_from_slice(&xid.to_be_bytes());
    buf[16..20].copy_from_slice(&yiaddr.octets());
    buf[28..34].copy_from_slice(&MAC);
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    append_tlv(&mut buf, code::MESSAGE_TYPE, &[msg_type]);
    extra(&mut buf);
    buf.push(code::END);
    buf
}

fn xid_of(buf: &[u8]) -> u32 {
    dhcp4_core::message::RawMessage::new(buf).unwrap().xid()
}

fn msg_type_of(buf: &[u8]) -> Option<MessageType> {
    let msg = dhcp4_core::message::RawMessage::new(buf).unwrap();
    let mut opts = dhcp4_core::options::ParsedOptions::new();
    msg.parse_options(&mut opts);
    opts.get_u8(code::MESSAGE_TYPE).ok().and_then(MessageType::from_u8)
}

#[test]
fn end_to_end() {
    let lease_path = std::env::temp_dir().join(format!("dhcp4-core-e2e-{}.lease", std::process::id()));
    let _ = std::fs::remove_file(&lease_path);

    let cfg = ClientConfig {
        hwaddr: MAC,
        hostname: Some("testing".to_string()),
        arp: false, // ARP hand-off is exercised by state.rs/dispatcher.rs unit tests
        broadcast: true,
        lease_file: lease_path.clone(),
        ..Default::default()
    };

    let mut session = Session::new(0u32, cfg, SEED);
    let mut link = FakeLink::default();
    let mut eloop = FakeEventLoop::default();
    let mut kernel = FakeKernel::default();
    let mut arp = FakeArp::default();
    let mut script = FakeScript::default();
    let mut iface = FakeIface::default();

    session.dhcp_start(&mut link, &mut eloop, &mut iface);
    assert_eq!(session.state(), State::Discover);
    assert_eq!(link.raw_sent.len(), 1);
    let discover = link.raw_sent[0].clone();
    assert_eq!(msg_type_of(&discover), Some(MessageType::Discover));
    let xid = xid_of(&discover);
    assert_eq!(
        eloop.scheduled.last().map(|(_, tag, _)| *tag),
        Some(Tag::Discover)
    );

    let offered_addr = Ipv4Addr::new(192, 168, 1, 50);
    let server_addr = Ipv4Addr::new(192, 168, 1, 1);
    let offer = server_reply(xid, MessageType::Offer as u8, offered_addr, |buf| {
        append_tlv(buf, code::SERVER_ID, &server_addr.octets());
    });

    session.dhcp_handlepacket(
        &offer,
        server_addr,
        false,
        &mut link,
        &mut eloop,
        &mut kernel,
        &mut arp,
        &mut script,
        &mut iface,
    );
    assert_eq!(session.state(), State::Request);
    assert_eq!(link.raw_sent.len(), 2);
    let request = link.raw_sent[1].clone();
    assert_eq!(msg_type_of(&request), Some(MessageType::Request));
    assert_eq!(xid_of(&request), xid);

    let ack = server_reply(xid, MessageType::Ack as u8, offered_addr, |buf| {
        append_tlv(buf, code::SERVER_ID, &server_addr.octets());
        append_tlv(buf, code::SUBNET_MASK, &Ipv4Addr::new(255, 255, 255, 0).octets());
        append_tlv(buf, code::ROUTER, &server_addr.octets());
        append_tlv(buf, code::LEASE_TIME, &3600u32.to_be_bytes());
        append_tlv(buf, code::RENEWAL_TIME, &1800u32.to_be_bytes());
        append_tlv(buf, code::REBINDING_TIME, &3150u32.to_be_bytes());
    });

    session.dhcp_handlepacket(
        &ack,
        server_addr,
        false,
        &mut link,
        &mut eloop,
        &mut kernel,
        &mut arp,
        &mut script,
        &mut iface,
    );

    assert_eq!(session.state(), State::Bound);
    let lease = session.lease().expect("session should hold a bound lease");
    assert_eq!(lease.addr, offered_addr);
    assert_eq!(lease.server, server_addr);
    assert_eq!(lease.leasetime, 3600);
    assert_eq!(lease.renewaltime, 1800);
    assert_eq!(lease.rebindtime, 3150);

    assert!(arp.probed.is_empty(), "ARP disabled, should never probe");
    assert_eq!(kernel.applied.len(), 1);
    assert_eq!(kernel.applied[0].as_ref().map(|l| l.addr), Some(offered_addr));

    assert_eq!(script.runs.len(), 1);
    assert!(script.runs[0].contains(&("new_ip_address".to_string(), offered_addr.to_string())));

    let renew = eloop.scheduled.iter().find(|(_, tag, _)| *tag == Tag::Renew).unwrap();
    assert_eq!(renew.2, Duration::from_secs(1800));
    let rebind = eloop.scheduled.iter().find(|(_, tag, _)| *tag == Tag::Rebind).unwrap();
    assert_eq!(rebind.2, Duration::from_secs(3150));
    let expire = eloop.scheduled.iter().find(|(_, tag, _)| *tag == Tag::Expire).unwrap();
    assert_eq!(expire.2, Duration::from_secs(3600));

    assert!(lease_path.exists(), "a DHCP (cookie-bearing) lease should be persisted");
    let _ = std::fs::remove_file(&lease_path);
}

#[test]
fn release_sends_one_unicast_and_unlinks_lease() {
    let lease_path = std::env::temp_dir().join(format!("dhcp4-core-e2e-release-{}.lease", std::process::id()));
    let _ = std::fs::remove_file(&lease_path);

    let cfg = ClientConfig {
        hwaddr: MAC,
        arp: false,
        lease_file: lease_path.clone(),
        ..Default::default()
    };
    let mut session = Session::new(0u32, cfg, SEED);
    let mut link = FakeLink::default();
    let mut eloop = FakeEventLoop::default();
    let mut kernel = FakeKernel::default();
    let mut arp = FakeArp::default();
    let mut script = FakeScript::default();
    let mut iface = FakeIface::default();

    session.dhcp_start(&mut link, &mut eloop, &mut iface);
    let xid = xid_of(&link.raw_sent[0]);

    let offered_addr = Ipv4Addr::new(10, 0, 0, 20);
    let server_addr = Ipv4Addr::new(10, 0, 0, 1);
    let offer = server_reply(xid, MessageType::Offer as u8, offered_addr, |buf| {
        append_tlv(buf, code::SERVER_ID, &server_addr.octets());
    });
    session.dhcp_handlepacket(
        &offer,
        server_addr,
        false,
        &mut link,
        &mut eloop,
        &mut kernel,
        &mut arp,
        &mut script,
        &mut iface,
    );

    let ack = server_reply(xid, MessageType::Ack as u8, offered_addr, |buf| {
        append_tlv(buf, code::SERVER_ID, &server_addr.octets());
        append_tlv(buf, code::SUBNET_MASK, &Ipv4Addr::new(255, 255, 255, 0).octets());
        append_tlv(buf, code::LEASE_TIME, &3600u32.to_be_bytes());
    });
    session.dhcp_handlepacket(
        &ack,
        server_addr,
        false,
        &mut link,
        &mut eloop,
        &mut kernel,
        &mut arp,
        &mut script,
        &mut iface,
    );
    assert_eq!(session.state(), State::Bound);

    session.dhcp_release(&mut link, &mut kernel);
    assert_eq!(session.state(), State::Init);
    assert_eq!(link.unicast_sent.len(), 1);
    assert_eq!(link.unicast_sent[0].0, server_addr);
    assert!(!lease_path.exists(), "release should unlink the persisted lease");
}
