//! Client configuration knobs (§10 ambient stack).
//!
//! Not a CLI or file-format parser — those are out of scope per §1/§12.
//! `ClientConfig` is constructed directly by the caller, the way
//! `w5500-dhcp`'s `Client::new` takes its knobs as plain arguments.

/// Per-interface DHCP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hwaddr: [u8; 6],
    pub hostname: Option<String>,
    pub vendor_class_id: Option<Vec<u8>>,
    pub user_class: Option<Vec<u8>>,
    pub client_id: Option<Vec<u8>>,
    pub vendor_bytes: Option<Vec<u8>>,
    /// Option codes to request beyond the built-in `REQUEST` set
    /// (§4.1, §9 option-table design note).
    pub requestmask: Vec<u8>,
    /// Option codes that must be present on an ACK or the message is
    /// rejected (§4.3, §4.2 NAK handling: `requiremask[54]`).
    pub requiremask: Vec<u8>,
    /// Option codes never emitted in the parameter-request list.
    pub nomask: Vec<u8>,
    /// Requested lease time (option 51), if any.
    pub lease_time: Option<u32>,
    /// Requested address (option 50) on DISCOVER, if any.
    pub request_addr: Option<std::net::Ipv4Addr>,
    /// Seconds to retry REQUEST on INIT-REBOOT before falling back to
    /// DISCOVER (§4.2 "Reboot").
    pub reboot: u32,
    /// Enable the ARP probe/announce hand-off after ACK (§4.2 "ACK
    /// handling").
    pub arp: bool,
    /// Request a broadcast reply via `flags.BROADCAST` (§4.1 builder
    /// contract).
    pub broadcast: bool,
    /// FQDN option (81) flags byte input; combined as
    /// `(fqdn & 0x09) | 0x04` per the builder contract.
    pub fqdn: u8,
    pub lease_file: std::path::PathBuf,
    /// `TEST` mode: never write/apply the lease (§4.2 "Test mode").
    pub test: bool,
    /// Whether a NAK without the required server-id is possible
    /// (`requiremask[54]` is checked directly against `requiremask`
    /// above; this just documents the default).
    pub min_mtu: u16,
}

/// Minimum Maximum-Message-Size the builder will request (§4.1).
pub const MTU_MIN: u16 = 576;
/// Maximum Maximum-Message-Size the builder will request (§4.1).
pub const MTU_MAX: u16 = 1500;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hwaddr: [0; 6],
            hostname: None,
            vendor_class_id: None,
            user_class: None,
            client_id: None,
            vendor_bytes: None,
            requestmask: Vec::new(),
            requiremask: Vec::new(),
            nomask: Vec::new(),
            lease_time: None,
            request_addr: None,
            reboot: 30,
            arp: true,
            broadcast: false,
            fqdn: 0,
            lease_file: std::path::PathBuf::from("/var/lib/dhcp4-core/lease"),
            test: false,
            min_mtu: MTU_MIN,
        }
    }
}

impl ClientConfig {
    pub fn requires(&self, code: u8) -> bool {
        self.requiremask.contains(&code)
    }

    pub fn masked_out(&self, code: u8) -> bool {
        self.nomask.contains(&code)
    }
}
