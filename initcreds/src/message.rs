use crate::{
    ticket::EncData, Address, Enctype, ErrorCode, Flags, Keyblock, PaData, Principal, StrConv,
    Ticket, TicketTimes, Timestamp,
};
use chrono::{LocalResult, TimeZone, Utc};

pub const KRB5_AS_REQ: u8 = 10;
pub const KRB5_AS_REP: u8 = 11;
pub const KRB5_ERROR: u8 = 30;

// Outermost DER tag bytes: [APPLICATION n] constructed.
const APP_TAG_AS_REP: u8 = 0x6b;
const APP_TAG_KRB_ERROR: u8 = 0x7e;

const V4_KRB_PROT_VERSION: u8 = 4;
const V4_AUTH_MSG_ERR_REPLY: u8 = 5 << 1;

pub fn is_as_rep(reply: &[u8]) -> bool {
    reply.first() == Some(&APP_TAG_AS_REP)
}

pub fn is_krb_error(reply: &[u8]) -> bool {
    reply.first() == Some(&APP_TAG_KRB_ERROR)
}

// A Kerberos v4 error reply: version byte 4 followed by AUTH_MSG_ERR_REPLY
// with the direction bit masked off.
pub fn is_v4_error_reply(reply: &[u8]) -> bool {
    reply.len() >= 2 && reply[0] == V4_KRB_PROT_VERSION && reply[1] & !1 == V4_AUTH_MSG_ERR_REPLY
}

#[derive(Debug, Clone)]
pub struct KdcRequest {
    pub msg_type: u8,
    pub kdc_options: Flags,
    pub client: Principal,
    pub server: Option<Principal>,
    pub from: Timestamp,
    pub till: Timestamp,
    pub rtime: Timestamp,
    pub nonce: i32,
    pub ktypes: Vec<Enctype>,
    pub addresses: Vec<Address>,
    pub padata: Vec<PaData>,
}

macro_rules! kdc_option {
    ($name:ident, $value:expr) => {
        pub const $name: Flags = $value;
    };
}

impl KdcRequest {
    kdc_option!(KDC_OPT_FORWARDABLE, 0x40000000);
    kdc_option!(KDC_OPT_PROXIABLE, 0x10000000);
    kdc_option!(KDC_OPT_ALLOW_POSTDATE, 0x04000000);
    kdc_option!(KDC_OPT_POSTDATED, 0x02000000);
    kdc_option!(KDC_OPT_RENEWABLE, 0x00800000);
    kdc_option!(KDC_OPT_CANONICALIZE, 0x00010000);
    kdc_option!(KDC_OPT_RENEWABLE_OK, 0x00000010);

    pub fn new(client: Principal) -> Self {
        Self {
            msg_type: KRB5_AS_REQ,
            kdc_options: 0,
            client,
            server: None,
            from: 0,
            till: 0,
            rtime: 0,
            nonce: 0,
            ktypes: vec![],
            addresses: vec![],
            padata: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct KdcReply {
    pub msg_type: u8,
    pub padata: Vec<PaData>,
    pub client: Principal,
    pub ticket: Ticket,
    /// The ticket exactly as received on the wire; stashed into the
    /// credential without re-encoding.
    pub ticket_bytes: Vec<u8>,
    pub enc_part: EncData,
    pub enc_part2: Option<EncKdcReplyPart>,
}

#[derive(Debug, Clone)]
pub struct EncKdcReplyPart {
    pub session: Keyblock,
    pub nonce: i32,
    pub flags: Flags,
    pub times: TicketTimes,
    pub server: Principal,
    pub caddrs: Vec<Address>,
    pub enc_padata: Vec<PaData>,
}

#[derive(Debug, Clone)]
pub struct KrbError {
    pub ctime: Timestamp,
    pub cusec: i32,
    pub stime: Timestamp,
    pub susec: i32,
    pub error: ErrorCode,
    pub client: Option<Principal>,
    pub server: Principal,
    pub text: Vec<u8>,
    pub e_data: Vec<u8>,
}

macro_rules! kdc_err {
    ($name:ident, $value:expr) => {
        pub const $name: ErrorCode = $value;
    };
}

impl KrbError {
    kdc_err!(KDC_ERR_C_PRINCIPAL_UNKNOWN, 6);
    kdc_err!(KDC_ERR_ETYPE_NOSUPP, 14);
    kdc_err!(KDC_ERR_PREAUTH_FAILED, 24);
    kdc_err!(KDC_ERR_PREAUTH_REQUIRED, 25);
    kdc_err!(KRB_AP_ERR_BAD_INTEGRITY, 31);
    kdc_err!(KRB_ERR_RESPONSE_TOO_BIG, 52);
    kdc_err!(KRB_ERR_GENERIC, 60);
    kdc_err!(KDC_ERR_WRONG_REALM, 68);
}

impl std::fmt::Display for KrbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stime = match Utc.timestamp_opt(self.stime.into(), 0) {
            LocalResult::Single(stime) => StrConv::timestamp_to_sfstring(stime),
            _ => self.stime.to_string(),
        };
        let text = String::from_utf8_lossy(&self.text);
        if text.is_empty() {
            write!(f, "KRB-ERROR {} (server time {})", self.error, stime)
        } else {
            write!(f, "KRB-ERROR {} (server time {}): {}", self.error, stime, text)
        }
    }
}

/// One entry of a PA-ETYPE-INFO2 hint: the enctype the KDC would accept and
/// the string-to-key inputs going with it.
#[derive(Debug, Clone)]
pub struct EtypeInfo2 {
    pub etype: Enctype,
    pub salt: Option<Vec<u8>>,
    pub s2kparams: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_tags_classify_replies() {
        assert!(is_as_rep(&[0x6b, 0x03]));
        assert!(!is_as_rep(&[0x7e, 0x03]));
        assert!(is_krb_error(&[0x7e, 0x03]));
        assert!(!is_krb_error(&[]));
    }

    #[test]
    fn v4_error_magic_ignores_the_direction_bit() {
        assert!(is_v4_error_reply(&[4, 10]));
        assert!(is_v4_error_reply(&[4, 11]));
        assert!(!is_v4_error_reply(&[4, 12]));
        assert!(!is_v4_error_reply(&[5, 10]));
        assert!(!is_v4_error_reply(&[4]));
    }
}
