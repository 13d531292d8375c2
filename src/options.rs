//! The DHCP/BOOTP option codec.
//!
//! Pure functions over byte buffers: no socket, no file, no clock. Everything
//! here operates on `code, length, value` TLVs as laid out on the wire (RFC
//! 2132) plus the handful of RFCs that define structured values inside a
//! single option (3397, 3361, 3442, 5969) and the historical classful
//! static-route option (33).

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::Range;

/// `PAD`: a single zero byte, no length field, skipped.
pub const PAD: u8 = 0;
/// `END`: terminates the options area.
pub const END: u8 = 255;

/// Option type tag bit flags (§4.1 data model).
pub mod tag {
    pub const UINT8: u16 = 1 << 0;
    pub const UINT16: u16 = 1 << 1;
    pub const SINT16: u16 = 1 << 2;
    pub const UINT32: u16 = 1 << 3;
    pub const ADDRIPV4: u16 = 1 << 4;
    pub const STRING: u16 = 1 << 5;
    pub const ARRAY: u16 = 1 << 6;
    pub const RFC3397: u16 = 1 << 7;
    pub const RFC3442: u16 = 1 << 8;
    pub const RFC3361: u16 = 1 << 9;
    pub const RFC5969: u16 = 1 << 10;
    /// Included in the parameter-request list (option 55) by default.
    pub const REQUEST: u16 = 1 << 11;
    /// Never emitted or exported, even if otherwise eligible.
    pub const NOMASK: u16 = 1 << 12;
}

/// Well-known DHCP/BOOTP option codes.
pub mod code {
    pub const SUBNET_MASK: u8 = 1;
    pub const TIME_OFFSET: u8 = 2;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDR: u8 = 28;
    pub const STATIC_ROUTE: u8 = 33;
    pub const NTP_SERVERS: u8 = 42;
    pub const VENDOR_SPECIFIC: u8 = 43;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const OPTIONSOVERLOAD: u8 = 52;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const MESSAGE: u8 = 56;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const CLIENT_ID: u8 = 61;
    pub const DOMAIN_SEARCH: u8 = 119;
    pub const SIP_SERVERS: u8 = 120;
    pub const CLASSLESS_STATIC_ROUTE: u8 = 121;
    pub const SIXRD: u8 = 212;
    pub const MS_CLASSLESS_STATIC_ROUTE: u8 = 249;
    pub const FQDN: u8 = 81;
    pub const USER_CLASS: u8 = 77;
    pub const END: u8 = 255;
}

/// A `(code, type flags, name)` table entry.
///
/// Preserved as data, not as a match statement, so that encoders and
/// env-exporters can consult it by lookup (see the design notes on the
/// option table in the specification).
pub struct OptInfo {
    pub code: u8,
    pub flags: u16,
    pub name: &'static str,
}

macro_rules! opt_table {
    ($(($code:expr, $flags:expr, $name:expr)),* $(,)?) => {
        &[$(OptInfo { code: $code, flags: $flags, name: $name }),*]
    };
}

/// The static option table. Unknown codes fall back to a default of "opaque,
/// pass-through, not requested".
pub static TABLE: &[OptInfo] = opt_table![
    (code::SUBNET_MASK, tag::ADDRIPV4 | tag::REQUEST, "subnet_mask"),
    (code::TIME_OFFSET, tag::UINT32, "time_offset"),
    (code::ROUTER, tag::ADDRIPV4 | tag::ARRAY | tag::REQUEST, "routers"),
    (code::DNS, tag::ADDRIPV4 | tag::ARRAY | tag::REQUEST, "dns_servers"),
    (code::HOSTNAME, tag::STRING | tag::REQUEST, "hostname"),
    (code::DOMAIN_NAME, tag::STRING | tag::REQUEST, "domain_name"),
    (code::BROADCAST_ADDR, tag::ADDRIPV4 | tag::REQUEST, "broadcast_address"),
    (code::STATIC_ROUTE, tag::ADDRIPV4 | tag::ARRAY, "static_routes"),
    (code::NTP_SERVERS, tag::ADDRIPV4 | tag::ARRAY | tag::REQUEST, "ntp_servers"),
    (code::VENDOR_SPECIFIC, tag::STRING, "vendor_encapsulated_options"),
    (code::REQUESTED_IP, tag::ADDRIPV4 | tag::NOMASK, "requested_address"),
    (code::LEASE_TIME, tag::UINT32 | tag::REQUEST, "lease_time"),
    (code::OPTIONSOVERLOAD, tag::UINT8 | tag::NOMASK, "option_overload"),
    (code::MESSAGE_TYPE, tag::UINT8 | tag::NOMASK, "message_type"),
    (code::SERVER_ID, tag::ADDRIPV4 | tag::REQUEST, "dhcp_server_identifier"),
    (code::PARAMETER_REQUEST, tag::STRING | tag::NOMASK, "parameter_request_list"),
    (code::MESSAGE, tag::STRING | tag::NOMASK, "message"),
    (code::MAX_MESSAGE_SIZE, tag::UINT16 | tag::NOMASK, "max_message_size"),
    (code::RENEWAL_TIME, tag::UINT32 | tag::REQUEST, "renewal_time"),
    (code::REBINDING_TIME, tag::UINT32 | tag::REQUEST, "rebinding_time"),
    (code::VENDOR_CLASS_ID, tag::STRING, "vendor_class_identifier"),
    (code::CLIENT_ID, tag::STRING | tag::NOMASK, "dhcp_client_identifier"),
    (code::DOMAIN_SEARCH, tag::RFC3397 | tag::REQUEST, "domain_search"),
    (code::SIP_SERVERS, tag::RFC3361 | tag::REQUEST, "sip_servers"),
    (code::CLASSLESS_STATIC_ROUTE, tag::RFC3442 | tag::REQUEST, "classless_static_routes"),
    (code::SIXRD, tag::RFC5969 | tag::REQUEST, "sixrd"),
    (code::MS_CLASSLESS_STATIC_ROUTE, tag::RFC3442, "ms_classless_static_routes"),
    (code::FQDN, tag::STRING | tag::NOMASK, "fqdn"),
    (code::USER_CLASS, tag::STRING, "user_class"),
];

/// Looks up an option's type flags, defaulting to an opaque unknown option.
pub fn flags_of(code: u8) -> u16 {
    TABLE
        .iter()
        .find(|o| o.code == code)
        .map(|o| o.flags)
        .unwrap_or(0)
}

/// Looks up an option's canonical name, if known.
pub fn name_of(code: u8) -> Option<&'static str> {
    TABLE.iter().find(|o| o.code == code).map(|o| o.name)
}

/// Every option carrying the `REQUEST` flag, for the default parameter
/// request list.
pub fn requested_by_default() -> impl Iterator<Item = u8> {
    TABLE
        .iter()
        .filter(|o| o.flags & tag::REQUEST != 0 && o.flags & tag::NOMASK == 0)
        .map(|o| o.code)
}

/// Which header fields the scan walked, and in what overload mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Overload {
    pub file: bool,
    pub sname: bool,
}

/// A parsed options area.
///
/// Holds, per option code, the byte range within [`Self::scratch`] where
/// that option's value lives. A single-segment option is copied in
/// verbatim; a repeated code (RFC 3396) is concatenated in the order the
/// segments appeared. [`Self::scratch`] is the process-local buffer
/// referenced in the design notes: callers keep one `ParsedOptions`
/// instance and call [`Self::parse`] again for each inbound message, which
/// clears it and reuses its allocation.
#[derive(Debug, Default)]
pub struct ParsedOptions {
    entries: BTreeMap<u8, Range<usize>>,
    scratch: Vec<u8>,
    pub overload: Overload,
}

impl ParsedOptions {
    /// Creates an empty, unallocated instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `options`, following option overload (§3) into `sname`/`file`
    /// as directed, concatenating repeated codes (RFC 3396) into the
    /// scratch arena.
    ///
    /// `sname` and `file` are the 64- and 128-byte BOOTP header fields;
    /// pass empty slices if unavailable.
    pub fn parse(&mut self, options: &[u8], sname: &[u8], file: &[u8]) {
        self.entries.clear();
        self.scratch.clear();
        self.overload = Overload::default();

        let mut overload_code: Option<u8> = None;
        self.scan(options, &mut overload_code);

        if let Some(ov) = overload_code {
            if ov & 0x1 != 0 {
                self.overload.file = true;
                self.scan(file, &mut None);
            }
            if ov & 0x2 != 0 {
                self.overload.sname = true;
                self.scan(sname, &mut None);
            }
        }
    }

    /// Scans one TLV region, appending segment bytes to the scratch arena
    /// and recording the option-overload value on first sight only.
    fn scan(&mut self, buf: &[u8], overload_code: &mut Option<u8>) {
        let mut i = 0usize;
        while i < buf.len() {
            let c = buf[i];
            if c == PAD {
                i += 1;
                continue;
            }
            if c == END {
                break;
            }
            let Some(&len) = buf.get(i + 1) else { break };
            let len = len as usize;
            let Some(value) = buf.get(i + 2..i + 2 + len) else {
                break;
            };

            if c == code::OPTIONSOVERLOAD {
                if overload_code.is_none() {
                    if let Some(&b) = value.first() {
                        *overload_code = Some(b);
                    }
                }
            } else {
                self.append(c, value);
            }

            i += 2 + len;
        }
    }

    /// Appends `value` to the scratch arena, extending (or creating) the
    /// recorded range for `code`.
    fn append(&mut self, code: u8, value: &[u8]) {
        let start = self.scratch.len();
        self.scratch.extend_from_slice(value);
        let end = self.scratch.len();
        self.entries
            .entry(code)
            .and_modify(|r| r.end = end)
            .or_insert(start..end);
    }

    /// Raw, un-validated bytes for `code`, or `None` if absent.
    ///
    /// Because concatenation always appends to the end of the arena, and
    /// ranges are widened in place, this only returns a contiguous view
    /// when `code`'s segments were scanned back-to-back. They always are:
    /// [`Self::append`] is the sole mutator of `scratch`, and every
    /// extension of an existing range immediately follows that range's
    /// previous end.
    fn raw(&self, code: u8) -> Option<&[u8]> {
        let r = self.entries.get(&code)?;
        self.scratch.get(r.clone())
    }

    /// Returns the option's value after applying [`validate_length`], or
    /// [`Error::NotFound`] if the code was not present.
    pub fn get(&self, code: u8) -> Result<&[u8]> {
        let raw = self.raw(code).ok_or(Error::NotFound)?;
        validate_length(code, raw)
    }

    /// `true` if `code` occurred anywhere in the message (including the
    /// overflow areas), independent of length validation.
    pub fn contains(&self, code: u8) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn get_u8(&self, code: u8) -> Result<u8> {
        Ok(*self.get(code)?.first().ok_or(Error::Invalid)?)
    }

    pub fn get_u16(&self, code: u8) -> Result<u16> {
        let b = self.get(code)?;
        Ok(u16::from_be_bytes(b[..2].try_into().unwrap()))
    }

    pub fn get_i16(&self, code: u8) -> Result<i16> {
        let b = self.get(code)?;
        Ok(i16::from_be_bytes(b[..2].try_into().unwrap()))
    }

    pub fn get_u32(&self, code: u8) -> Result<u32> {
        let b = self.get(code)?;
        Ok(u32::from_be_bytes(b[..4].try_into().unwrap()))
    }

    pub fn get_addr(&self, code: u8) -> Result<Ipv4Addr> {
        let b = self.get(code)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }

    /// Every address in an `ADDRIPV4 | ARRAY` option.
    pub fn get_addrs(&self, code: u8) -> Result<Vec<Ipv4Addr>> {
        let b = self.get(code)?;
        Ok(b.chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
            .collect())
    }

    /// The value as a string, not required to be valid UTF-8 free of NULs;
    /// trailing NUL bytes are stripped per the environment-export contract.
    pub fn get_str(&self, code: u8) -> Result<&str> {
        let b = self.get(code)?;
        let b = trim_trailing_nul(b);
        std::str::from_utf8(b).map_err(|_| Error::Invalid)
    }
}

fn trim_trailing_nul(b: &[u8]) -> &[u8] {
    let end = b.iter().rposition(|&x| x != 0).map(|p| p + 1).unwrap_or(0);
    &b[..end]
}

/// Applies the per-type length rule from §4.1 and returns the (possibly
/// truncated) value bytes.
pub fn validate_length(code: u8, bytes: &[u8]) -> Result<&[u8]> {
    if bytes.is_empty() {
        return Err(Error::Invalid);
    }
    let flags = flags_of(code);

    if flags & (tag::STRING | tag::RFC3442 | tag::RFC5969) != 0 {
        return Ok(bytes);
    }
    if flags & (tag::ADDRIPV4 | tag::ARRAY) != 0 {
        if bytes.len() % 4 == 0 {
            return Ok(bytes);
        }
        let truncated = bytes.len() - (bytes.len() % 4);
        if truncated == 0 {
            return Err(Error::Invalid);
        }
        return Ok(&bytes[..truncated]);
    }
    let width = if flags & tag::UINT32 != 0 {
        Some(4)
    } else if flags & (tag::UINT16 | tag::SINT16) != 0 {
        Some(2)
    } else if flags & tag::UINT8 != 0 {
        Some(1)
    } else {
        None
    };
    match width {
        Some(w) if bytes.len() >= w => Ok(&bytes[..w]),
        Some(_) => Err(Error::Invalid),
        // unknown code: pass through unchanged
        None => Ok(bytes),
    }
}

/// Encodes `name` as an RFC 1035 label sequence (used for option 81 FQDN).
///
/// Each label is preceded by its length byte; the sequence is terminated
/// by a zero byte. An empty name yields zero bytes (no terminator either).
pub fn encode_rfc1035(name: &str, out: &mut Vec<u8>) {
    if name.is_empty() {
        return;
    }
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// One classless static route (RFC 3442 / MS option 249).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClasslessRoute {
    pub cidr: u8,
    pub dest: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Decodes RFC 3442 classless static routes.
pub fn decode_classless_routes(bytes: &[u8]) -> Result<Vec<ClasslessRoute>> {
    let mut routes = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let cidr = bytes[i];
        if cidr > 32 {
            return Err(Error::Invalid);
        }
        let dest_len = cidr.div_ceil(8) as usize;
        i += 1;
        let dest_octets = bytes.get(i..i + dest_len).ok_or(Error::Invalid)?;
        i += dest_len;
        let gw_octets: [u8; 4] = bytes
            .get(i..i + 4)
            .ok_or(Error::Invalid)?
            .try_into()
            .unwrap();
        i += 4;

        let mut dest = [0u8; 4];
        dest[..dest_octets.len()].copy_from_slice(dest_octets);
        routes.push(ClasslessRoute {
            cidr,
            dest: Ipv4Addr::from(dest),
            gateway: Ipv4Addr::from(gw_octets),
        });
    }
    Ok(routes)
}

/// Encodes RFC 3442 classless static routes.
pub fn encode_classless_routes(routes: &[ClasslessRoute], out: &mut Vec<u8>) -> Result<()> {
    for r in routes {
        if r.cidr > 32 {
            return Err(Error::Invalid);
        }
        out.push(r.cidr);
        let dest_len = r.cidr.div_ceil(8) as usize;
        out.extend_from_slice(&r.dest.octets()[..dest_len]);
        out.extend_from_slice(&r.gateway.octets());
    }
    Ok(())
}

/// Renders classless routes as `"dest/cidr gateway; ..."` text, per the
/// environment-export contract (scenario 3 in the specification).
pub fn classless_routes_to_text(routes: &[ClasslessRoute]) -> String {
    routes
        .iter()
        .map(|r| format!("{}/{} {}", r.dest, r.cidr, r.gateway))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Option 120 (RFC 3361 SIP servers): either an RFC 3397-compressed name
/// list (encoding byte 0) or one or more IPv4 addresses (encoding byte 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipServers {
    Names(Vec<u8>),
    Addrs(Vec<Ipv4Addr>),
}

pub fn decode_sip_servers(bytes: &[u8]) -> Result<SipServers> {
    let (&encoding, rest) = bytes.split_first().ok_or(Error::Invalid)?;
    match encoding {
        0 => Ok(SipServers::Names(rest.to_vec())),
        1 => {
            if rest.is_empty() || rest.len() % 4 != 0 {
                return Err(Error::Invalid);
            }
            Ok(SipServers::Addrs(
                rest.chunks_exact(4)
                    .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                    .collect(),
            ))
        }
        _ => Err(Error::Invalid),
    }
}

/// RFC 5969 6rd parameters: `ipv4masklen, ipv6prefixlen, ipv6prefix[16],
/// br[4]*`. Minimum total length is 22.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SixRd {
    pub ipv4_mask_len: u8,
    pub ipv6_prefix_len: u8,
    pub ipv6_prefix: [u8; 16],
    pub border_relays: Vec<Ipv4Addr>,
}

pub fn decode_sixrd(bytes: &[u8]) -> Result<SixRd> {
    if bytes.len() < 22 {
        return Err(Error::Invalid);
    }
    let ipv4_mask_len = bytes[0];
    let ipv6_prefix_len = bytes[1];
    let ipv6_prefix: [u8; 16] = bytes[2..18].try_into().unwrap();
    let br_bytes = &bytes[18..];
    if br_bytes.len() % 4 != 0 {
        return Err(Error::Invalid);
    }
    let border_relays = br_bytes
        .chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect();
    Ok(SixRd {
        ipv4_mask_len,
        ipv6_prefix_len,
        ipv6_prefix,
        border_relays,
    })
}

/// Derives the minimal legal netmask covering `addr`'s set host bits.
///
/// Starts from the classful (A/B/C) prefix length, then grows it one bit at
/// a time as long as the current highest-order host bit is set, per
/// `route_netmask` in the specification (scenario 4). Unlike a plain "any
/// host bit set" test, a host portion of e.g. `0b0000_0001` never grows the
/// prefix (its top bit is 0), while `0b1000_0000` grows it by exactly one
/// bit.
pub fn route_netmask(addr: Ipv4Addr) -> Ipv4Addr {
    let a = addr.octets()[0];
    let mut prefix: u32 = if a < 128 {
        8 // class A
    } else if a < 192 {
        16 // class B
    } else {
        24 // class C
    };
    let addr_bits = u32::from_be_bytes(addr.octets());
    while prefix < 32 {
        let probe = 1u32 << (31 - prefix);
        if addr_bits & probe == 0 {
            break;
        }
        prefix += 1;
    }
    Ipv4Addr::from(u32::MAX << (32 - prefix))
}

/// One classful static route (option 33): `(dest, gateway)` pairs, with the
/// netmask derived via [`route_netmask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassfulRoute {
    pub dest: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

pub fn decode_classful_routes(bytes: &[u8]) -> Result<Vec<ClassfulRoute>> {
    if bytes.len() % 8 != 0 || bytes.is_empty() {
        return Err(Error::Invalid);
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let dest = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let gateway = Ipv4Addr::new(c[4], c[5], c[6], c[7]);
            ClassfulRoute {
                dest,
                mask: route_netmask(dest),
                gateway,
            }
        })
        .collect())
}
