use crate::{Flags, Keyblock, Principal, Ticket, Timestamp};
use nix::ifaddrs::getifaddrs;

type AddressType = u16;
type AuthDataType = u16;

#[derive(Debug, Clone)]
pub struct Credential {
    pub client: Principal,
    pub server: Principal,
    pub keyblock: Keyblock,
    pub times: TicketTimes,
    pub is_skey: bool,
    pub ticket_flags: Flags,
    pub addresses: Vec<Address>,
    pub ticket: Vec<u8>,
    pub second_ticket: Vec<u8>,
    pub authdata: Vec<AuthData>,
}

macro_rules! ticket_flag {
    ($name:ident, $value:expr) => {
        pub const $name: Flags = $value;
    };
}

impl Credential {
    ticket_flag!(TKT_FLG_FORWARDABLE, 0x40000000);
    ticket_flag!(TKT_FLG_FORWARDED, 0x20000000);
    ticket_flag!(TKT_FLG_PROXIABLE, 0x10000000);
    ticket_flag!(TKT_FLG_PROXY, 0x08000000);
    ticket_flag!(TKT_FLG_MAY_POSTDATE, 0x04000000);
    ticket_flag!(TKT_FLG_POSTDATED, 0x02000000);
    ticket_flag!(TKT_FLG_INVALID, 0x01000000);
    ticket_flag!(TKT_FLG_RENEWABLE, 0x00800000);
    ticket_flag!(TKT_FLG_INITIAL, 0x00400000);
    ticket_flag!(TKT_FLG_PRE_AUTH, 0x00200000);
    ticket_flag!(TKT_FLG_HW_AUTH, 0x00100000);
    ticket_flag!(TKT_FLG_TRANSIT_POLICY_CHECKED, 0x00080000);
    ticket_flag!(TKT_FLG_OK_AS_DELEGATE, 0x00040000);
    ticket_flag!(TKT_FLG_ENC_PA_REP, 0x00010000);
    ticket_flag!(TKT_FLG_ANONYMOUS, 0x00008000);

    /// Decodes the stored ticket blob. The stored bytes are kept verbatim as
    /// received from the KDC, so this is a plain DER decode.
    pub fn get_ticket(&self) -> anyhow::Result<Ticket> {
        Ticket::decode_from(&self.ticket)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketTimes {
    pub authtime: Timestamp,
    pub starttime: Timestamp,
    pub endtime: Timestamp,
    pub renew_till: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub addrtype: AddressType,
    pub contents: Vec<u8>,
}

macro_rules! address_type {
    ($name:ident, $value:expr) => {
        pub const $name: AddressType = $value;
    };
}

impl Address {
    address_type!(ADDRTYPE_INET, 0x0002);
    address_type!(ADDRTYPE_CHAOS, 0x0005);
    address_type!(ADDRTYPE_XNS, 0x0006);
    address_type!(ADDRTYPE_ISO, 0x0007);
    address_type!(ADDRTYPE_DDP, 0x0010);
    address_type!(ADDRTYPE_INET6, 0x0018);
    address_type!(ADDRTYPE_ADDRPORT, 0x0100);
    address_type!(ADDRTYPE_IPPORT, 0x0101);

    /// Addresses of the local interfaces, loopback excluded, in the order the
    /// OS reports them.
    pub fn local_addresses() -> anyhow::Result<Vec<Address>> {
        let mut addresses = vec![];
        for ifaddr in getifaddrs()? {
            let Some(storage) = ifaddr.address else {
                continue;
            };
            if let Some(sin) = storage.as_sockaddr_in() {
                let octets = sin.ip().to_be_bytes();
                if octets[0] == 127 {
                    continue;
                }
                addresses.push(Address {
                    addrtype: Self::ADDRTYPE_INET,
                    contents: octets.to_vec(),
                });
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                let ip = sin6.ip();
                if ip.is_loopback() {
                    continue;
                }
                addresses.push(Address {
                    addrtype: Self::ADDRTYPE_INET6,
                    contents: ip.octets().to_vec(),
                });
            }
        }
        Ok(addresses)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub ad_type: AuthDataType,
    pub contents: Vec<u8>,
}
