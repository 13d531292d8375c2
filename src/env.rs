//! Script environment-variable export (§6 "Environment export to the
//! script").

use crate::lease::{cidr_of, network_number, Lease};
use crate::options::{self, code, ParsedOptions};
use std::net::Ipv4Addr;

/// Transition reasons recorded in the `reason` variable (§6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Bound,
    Renew,
    Rebind,
    Reboot,
    Static,
    Inform,
    Ipv4ll,
    Expire,
    Nak,
    Fail,
    Release,
    ThirdParty,
    Timeout,
    Test,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Bound => "BOUND",
            Reason::Renew => "RENEW",
            Reason::Rebind => "REBIND",
            Reason::Reboot => "REBOOT",
            Reason::Static => "STATIC",
            Reason::Inform => "INFORM",
            Reason::Ipv4ll => "IPV4LL",
            Reason::Expire => "EXPIRE",
            Reason::Nak => "NAK",
            Reason::Fail => "FAIL",
            Reason::Release => "RELEASE",
            Reason::ThirdParty => "3RDPARTY",
            Reason::Timeout => "TIMEOUT",
            Reason::Test => "TEST",
        }
    }
}

fn push(env: &mut Vec<(String, String)>, prefix: &str, suffix: &str, value: String) {
    env.push((format!("{prefix}_{suffix}"), value));
}

/// Builds the script environment for a bound lease.
///
/// `prefix` is the variable prefix (e.g. `"new"` or `"old"`, matching the
/// dual `new_*`/`old_*` convention common to this family of clients);
/// callers building a single-lease export typically pass `"new"`.
pub fn export_lease(prefix: &str, lease: &Lease, opts: &ParsedOptions) -> Vec<(String, String)> {
    let mut env = Vec::new();
    push(&mut env, prefix, "ip_address", lease.addr.to_string());
    push(&mut env, prefix, "subnet_mask", lease.net.to_string());
    push(
        &mut env,
        prefix,
        "subnet_cidr",
        cidr_of(lease.net).to_string(),
    );
    push(
        &mut env,
        prefix,
        "network_number",
        network_number(lease.addr, lease.net).to_string(),
    );
    push(&mut env, prefix, "broadcast_address", lease.brd.to_string());

    for info in options::TABLE {
        if info.flags & crate::options::tag::NOMASK != 0 {
            continue;
        }
        if let Some(value) = format_option(opts, info.code) {
            push(&mut env, prefix, info.name, value);
        }
    }

    env
}

/// Adds `filename`/`server_name` variables from the BOOTP header fields,
/// when non-empty.
pub fn export_header_fields(
    env: &mut Vec<(String, String)>,
    prefix: &str,
    filename: &str,
    servername: &str,
) {
    if !filename.is_empty() {
        push(env, prefix, "filename", filename.to_string());
    }
    if !servername.is_empty() {
        push(env, prefix, "server_name", servername.to_string());
    }
}

fn format_option(opts: &ParsedOptions, code: u8) -> Option<String> {
    use crate::options::tag;
    let flags = options::flags_of(code);
    let raw = opts.get(code).ok()?;

    if code == crate::options::code::FQDN {
        // Strip the 3-byte FQDN header (flags, rcode1, rcode2).
        let name = raw.get(3..)?;
        return Some(rfc1035_to_text(name));
    }
    if flags & tag::ADDRIPV4 != 0 && flags & tag::ARRAY != 0 {
        return Some(
            raw.chunks_exact(4)
                .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]).to_string())
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    if flags & tag::ADDRIPV4 != 0 {
        return Some(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string());
    }
    if flags & tag::STRING != 0 {
        return opts.get_str(code).ok().map(String::from);
    }
    if flags & tag::UINT32 != 0 {
        return Some(opts.get_u32(code).ok()?.to_string());
    }
    if flags & tag::UINT16 != 0 {
        return Some(opts.get_u16(code).ok()?.to_string());
    }
    if flags & tag::SINT16 != 0 {
        return Some(opts.get_i16(code).ok()?.to_string());
    }
    if flags & tag::UINT8 != 0 {
        return Some(opts.get_u8(code).ok()?.to_string());
    }
    if flags & (tag::RFC3442) != 0 {
        let routes = options::decode_classless_routes(raw).ok()?;
        return Some(options::classless_routes_to_text(&routes));
    }
    if flags & tag::RFC3361 != 0 {
        return Some(match options::decode_sip_servers(raw).ok()? {
            options::SipServers::Addrs(addrs) => addrs
                .iter()
                .map(Ipv4Addr::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            options::SipServers::Names(_) => rfc1035_to_text(raw.get(1..)?),
        });
    }
    if flags & tag::RFC5969 != 0 {
        let sixrd = options::decode_sixrd(raw).ok()?;
        return Some(format!(
            "{}/{} {}",
            std::net::Ipv6Addr::from(sixrd.ipv6_prefix),
            sixrd.ipv6_prefix_len,
            sixrd
                .border_relays
                .iter()
                .map(Ipv4Addr::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        ));
    }
    if flags & tag::RFC3397 != 0 {
        return Some(rfc1035_to_text(raw));
    }
    None
}

fn rfc1035_to_text(bytes: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let len = bytes[i] as usize;
        if len == 0 {
            break;
        }
        i += 1;
        let Some(label) = bytes.get(i..i + len) else {
            break;
        };
        labels.push(String::from_utf8_lossy(label).into_owned());
        i += len;
    }
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_match_glossary() {
        assert_eq!(Reason::Bound.as_str(), "BOUND");
        assert_eq!(Reason::ThirdParty.as_str(), "3RDPARTY");
        assert_eq!(Reason::Test.as_str(), "TEST");
    }

    #[test]
    fn export_lease_includes_core_variables() {
        let lease = Lease {
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
        };
        let opts = ParsedOptions::new();
        let env = export_lease("new", &lease, &opts);
        assert!(env.contains(&("new_ip_address".to_string(), "192.168.1.50".to_string())));
        assert!(env.contains(&("new_subnet_cidr".to_string(), "24".to_string())));
    }

    #[test]
    fn fqdn_strips_three_byte_header() {
        let mut buf = Vec::new();
        buf.push(code::FQDN);
        let mut value = vec![0x04, 0x00, 0x00];
        crate::options::encode_rfc1035("host.example", &mut value);
        buf.push(value.len() as u8);
        buf.extend_from_slice(&value);
        buf.push(crate::options::END);

        let mut opts = ParsedOptions::new();
        opts.parse(&buf, &[], &[]);
        assert_eq!(
            format_option(&opts, code::FQDN).unwrap(),
            "host.example"
        );
    }
}
