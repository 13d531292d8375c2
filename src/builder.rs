//! Outbound message construction (§4.1 "Builder contract for outbound
//! messages").

use crate::config::{ClientConfig, MTU_MAX, MTU_MIN};
use crate::hostname::Hostname;
use crate::message::{
    BOOTREQUEST, COOKIE_LEN, FLAGS_BROADCAST, HLEN_ETHERNET, HTYPE_ETHERNET, MAGIC_COOKIE,
};
use crate::options::{code, encode_rfc1035, requested_by_default};
use std::net::Ipv4Addr;

/// DHCP message types (option 53), RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}

/// Parameters the state machine supplies that the builder contract itself
/// cannot derive (current time, the prior offer, whether this is a renew).
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildParams {
    pub ciaddr: Ipv4Addr,
    pub requested_addr: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub secs: u16,
    pub already_on_interface: bool,
    /// Maximum-Message-Size (option 57) to advertise, already queried (and
    /// raised if below `MTU_MIN`) against the interface. `None` falls back
    /// to `cfg.min_mtu`.
    pub max_message_size: Option<u16>,
}

/// Builds a DHCP message of `msg_type` into `out`, following the builder
/// contract. `xid` is host-order; it is written network order. Returns the
/// number of bytes written.
pub fn build_message(
    out: &mut Vec<u8>,
    msg_type: MessageType,
    cfg: &ClientConfig,
    hostname: Option<Hostname<'_>>,
    xid: u32,
    params: &BuildParams,
) -> usize {
    out.clear();
    out.resize(crate::message::BOOTP_HEADER_LEN, 0);
    out[0] = BOOTREQUEST;
    out[1] = HTYPE_ETHERNET;
    out[2] = HLEN_ETHERNET;
    out[4..8].copy_from_slice(&xid.to_be_bytes());
    out[8..10].copy_from_slice(&params.secs.to_be_bytes());

    let broadcast = cfg.broadcast
        && params.ciaddr == Ipv4Addr::UNSPECIFIED
        && !matches!(msg_type, MessageType::Decline | MessageType::Release);
    let flags: u16 = if broadcast { FLAGS_BROADCAST } else { 0 };
    out[10..12].copy_from_slice(&flags.to_be_bytes());

    let ciaddr = match msg_type {
        MessageType::Inform | MessageType::Release => params.ciaddr,
        MessageType::Request if params.already_on_interface => params.ciaddr,
        _ => Ipv4Addr::UNSPECIFIED,
    };
    out[12..16].copy_from_slice(&ciaddr.octets());

    out[28..28 + cfg.hwaddr.len()].copy_from_slice(&cfg.hwaddr);

    out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    debug_assert_eq!(out.len(), crate::message::BOOTP_HEADER_LEN + COOKIE_LEN);

    append_tlv(out, code::MESSAGE_TYPE, &[msg_type as u8]);

    if let Some(client_id) = &cfg.client_id {
        append_tlv(out, code::CLIENT_ID, client_id);
    }

    match msg_type {
        MessageType::Request => {
            if let Some(addr) = params.requested_addr {
                append_tlv(out, code::REQUESTED_IP, &addr.octets());
            }
            if let Some(server) = params.server_id {
                append_tlv(out, code::SERVER_ID, &server.octets());
            }
        }
        MessageType::Release => {
            if let Some(server) = params.server_id {
                append_tlv(out, code::SERVER_ID, &server.octets());
            }
        }
        MessageType::Decline => {
            append_tlv(out, code::MESSAGE, b"Duplicate address detected");
        }
        MessageType::Discover => {
            if let Some(addr) = cfg.request_addr.or(params.requested_addr) {
                append_tlv(out, code::REQUESTED_IP, &addr.octets());
            }
        }
        _ => {}
    }

    if matches!(
        msg_type,
        MessageType::Discover | MessageType::Request | MessageType::Inform
    ) {
        if let Some(user_class) = &cfg.user_class {
            append_tlv(out, code::USER_CLASS, user_class);
        }
        if let Some(vendor_class) = &cfg.vendor_class_id {
            append_tlv(out, code::VENDOR_CLASS_ID, vendor_class);
        }

        let mms = params.max_message_size.unwrap_or(cfg.min_mtu).clamp(MTU_MIN, MTU_MAX);
        append_tlv(out, code::MAX_MESSAGE_SIZE, &mms.to_be_bytes());

        if !matches!(msg_type, MessageType::Inform) {
            if let Some(lease_time) = cfg.lease_time {
                append_tlv(out, code::LEASE_TIME, &lease_time.to_be_bytes());
            }
        }

        if let Some(hostname) = hostname {
            append_tlv(out, code::HOSTNAME, hostname.short().as_bytes());

            let mut fqdn = Vec::new();
            fqdn.push((cfg.fqdn & 0x09) | 0x04);
            fqdn.push(0);
            fqdn.push(0);
            encode_rfc1035(hostname.as_str(), &mut fqdn);
            append_tlv(out, code::FQDN, &fqdn);
        }

        if let Some(vendor_bytes) = &cfg.vendor_bytes {
            append_tlv(out, code::VENDOR_SPECIFIC, vendor_bytes);
        }

        let prl = parameter_request_list(cfg, msg_type);
        append_tlv(out, code::PARAMETER_REQUEST, &prl);
    }

    out.push(code::END);
    out.len()
}

fn append_tlv(out: &mut Vec<u8>, code: u8, value: &[u8]) {
    out.push(code);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

fn parameter_request_list(cfg: &ClientConfig, msg_type: MessageType) -> Vec<u8> {
    let inform = matches!(msg_type, MessageType::Inform);
    let mut list: Vec<u8> = requested_by_default()
        .chain(cfg.requestmask.iter().copied())
        .filter(|c| !cfg.masked_out(*c))
        .filter(|c| !(inform && (*c == code::RENEWAL_TIME || *c == code::REBINDING_TIME)))
        .collect();
    list.sort_unstable();
    list.dedup();
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RawMessage;
    use crate::options::ParsedOptions;

    #[test]
    fn discover_round_trip_build() {
        let cfg = ClientConfig {
            hwaddr: [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee],
            request_addr: Some(Ipv4Addr::new(10, 0, 0, 5)),
            ..Default::default()
        };
        let hostname = Hostname::new("host.example").unwrap();
        let mut buf = Vec::new();
        build_message(
            &mut buf,
            MessageType::Discover,
            &cfg,
            Some(hostname),
            0x1234_5678,
            &BuildParams::default(),
        );

        let msg = RawMessage::new(&buf).unwrap();
        assert!(msg.is_dhcp());
        let mut opts = ParsedOptions::new();
        msg.parse_options(&mut opts);

        assert_eq!(opts.get_u8(code::MESSAGE_TYPE).unwrap(), 1);
        assert_eq!(
            opts.get_addr(code::REQUESTED_IP).unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
        assert_eq!(opts.get_str(code::HOSTNAME).unwrap(), "host");

        let prl = opts.get(code::PARAMETER_REQUEST).unwrap();
        for want in [1u8, 3, 6, 12, 15, 28, 51, 54, 58, 59, 119, 121] {
            assert!(prl.contains(&want), "missing option {want} in PRL");
        }
    }

    #[test]
    fn release_includes_only_server_id() {
        let cfg = ClientConfig::default();
        let mut buf = Vec::new();
        let params = BuildParams {
            ciaddr: Ipv4Addr::new(192, 168, 1, 50),
            server_id: Some(Ipv4Addr::new(192, 168, 1, 1)),
            ..Default::default()
        };
        build_message(&mut buf, MessageType::Release, &cfg, None, 1, &params);
        let msg = RawMessage::new(&buf).unwrap();
        assert_eq!(msg.ciaddr(), Ipv4Addr::new(192, 168, 1, 50));
        let mut opts = ParsedOptions::new();
        msg.parse_options(&mut opts);
        assert_eq!(
            opts.get_addr(code::SERVER_ID).unwrap(),
            Ipv4Addr::new(192, 168, 1, 1)
        );
        assert!(!opts.contains(code::PARAMETER_REQUEST));
    }

    #[test]
    fn decline_carries_message_option() {
        let cfg = ClientConfig::default();
        let mut buf = Vec::new();
        build_message(
            &mut buf,
            MessageType::Decline,
            &cfg,
            None,
            1,
            &BuildParams::default(),
        );
        let msg = RawMessage::new(&buf).unwrap();
        let mut opts = ParsedOptions::new();
        msg.parse_options(&mut opts);
        assert_eq!(
            opts.get_str(code::MESSAGE).unwrap(),
            "Duplicate address detected"
        );
    }
}
