mod profile;

pub use self::profile::{conf_boolean, Profile};

use crate::{Codec, Crypto, Error, Flags, KdcRequest, Timestamp};
use chrono::Utc;

const DEFAULT_CLOCKSKEW: i32 = 300;
const DEFAULT_KDC_TIMESYNC: i32 = 1;
const DEFAULT_REFERRAL_MAXHOPS: i32 = 5;
const KRB5_LIBOPT_SYNC_KDCTIME: Flags = 0x0001;
const KRB5_OS_TOFFSET_VALID: Flags = 1;
const KRB5_OS_TOFFSET_TIME: Flags = 2;

pub struct Conf;

macro_rules! conf {
    ($name:ident, $value:expr) => {
        pub const $name: &'static str = $value;
    };
}

impl Conf {
    conf!(CANONICALIZE, "canonicalize");
    conf!(CLOCKSKEW, "clockskew");
    conf!(DEFAULT_REALM, "default_realm");
    conf!(FORWARDABLE, "forwardable");
    conf!(KDC_DEFAULT_OPTIONS, "kdc_default_options");
    conf!(KDC_TIMESYNC, "kdc_timesync");
    conf!(LIBDEFAULTS, "libdefaults");
    conf!(NOADDRESSES, "noaddresses");
    conf!(PREFERRED_PREAUTH_TYPES, "preferred_preauth_types");
    conf!(PROXIABLE, "proxiable");
    conf!(REFERRAL_MAXHOPS, "referral_maxhops");
    conf!(RENEW_LIFETIME, "renew_lifetime");
    conf!(TICKET_LIFETIME, "ticket_lifetime");
}

/// Library context: profile-backed configuration plus the injected protocol
/// collaborators. Treated as read-only shared state during a negotiation,
/// except for the KDC time offset maintained under `kdc_timesync`.
pub struct Context {
    pub os_context: OsContext,
    pub profile: Profile,
    pub clockskew: i32,
    pub kdc_default_options: Flags,
    pub library_options: Flags,
    pub referral_maxhops: i32,
    pub profile_secure: bool,
    pub default_realm: Vec<u8>,
    codec: Box<dyn Codec>,
    crypto: Box<dyn Crypto>,
}

impl Context {
    pub fn init(codec: Box<dyn Codec>, crypto: Box<dyn Crypto>) -> anyhow::Result<Self> {
        Self::new(Profile::new(false)?, false, codec, crypto)
    }

    pub fn init_secure(codec: Box<dyn Codec>, crypto: Box<dyn Crypto>) -> anyhow::Result<Self> {
        Self::new(Profile::new(true)?, true, codec, crypto)
    }

    pub fn with_profile(
        profile: Profile,
        codec: Box<dyn Codec>,
        crypto: Box<dyn Crypto>,
    ) -> anyhow::Result<Self> {
        Self::new(profile, false, codec, crypto)
    }

    fn new(
        profile: Profile,
        secure: bool,
        codec: Box<dyn Codec>,
        crypto: Box<dyn Crypto>,
    ) -> anyhow::Result<Self> {
        let clockskew = Self::get_int(&profile, Conf::CLOCKSKEW, DEFAULT_CLOCKSKEW);

        let kdc_default_options = Self::get_int(
            &profile,
            Conf::KDC_DEFAULT_OPTIONS,
            KdcRequest::KDC_OPT_RENEWABLE_OK,
        );

        let library_options =
            if Self::get_int(&profile, Conf::KDC_TIMESYNC, DEFAULT_KDC_TIMESYNC) > 0 {
                KRB5_LIBOPT_SYNC_KDCTIME
            } else {
                0
            };

        let referral_maxhops =
            match Self::get_int(&profile, Conf::REFERRAL_MAXHOPS, DEFAULT_REFERRAL_MAXHOPS) {
                hops if hops > 0 => hops,
                _ => DEFAULT_REFERRAL_MAXHOPS,
            };

        Ok(Self {
            os_context: OsContext::new(),
            profile,
            clockskew,
            kdc_default_options,
            library_options,
            referral_maxhops,
            profile_secure: secure,
            default_realm: vec![],
            codec,
            crypto,
        })
    }

    fn get_int(profile: &Profile, name: &str, default: i32) -> i32 {
        profile
            .get_int(&format!("{}.{}", Conf::LIBDEFAULTS, name))
            .map(|v| v as i32)
            .unwrap_or(default)
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn crypto(&self) -> &dyn Crypto {
        self.crypto.as_ref()
    }

    pub fn sync_kdctime(&self) -> bool {
        self.library_options & KRB5_LIBOPT_SYNC_KDCTIME > 0
    }

    /// Current time as a protocol timestamp, shifted by the KDC offset when
    /// one has been adopted.
    pub fn timeofday(&self) -> Timestamp {
        let now = Utc::now().timestamp() as Timestamp;
        if self.os_context.time_offset_valid() {
            now.wrapping_add(self.os_context.time_offset)
        } else {
            now
        }
    }

    /// Adopts `seconds` as the local notion of real time by recording the
    /// offset against the system clock.
    pub fn set_real_time(&mut self, seconds: Timestamp) {
        let now = Utc::now().timestamp() as Timestamp;
        self.os_context.time_offset = seconds.wrapping_sub(now);
        self.os_context.set_time_offset_valid();
    }

    pub fn get_default_realm(&mut self) -> anyhow::Result<Vec<u8>> {
        if !self.default_realm.is_empty() {
            return Ok(self.default_realm.to_owned());
        }
        let key = format!("{}.{}", Conf::LIBDEFAULTS, Conf::DEFAULT_REALM);
        match self.profile.get_string(&key) {
            Some(realm) => {
                self.default_realm = realm.into_bytes();
                Ok(self.default_realm.to_owned())
            }
            None => Err(Error::NoDefaultRealm)?,
        }
    }

    // Library defaults first try a relation grouped under the realm (its
    // own profile section), then the bare [libdefaults] option.
    pub fn libdefault_string(&self, realm: &[u8], option: &str) -> Option<String> {
        let realm = String::from_utf8_lossy(realm);
        self.profile
            .get_string(&format!("{}.{}", realm, option))
            .or_else(|| {
                self.profile
                    .get_string(&format!("{}.{}", Conf::LIBDEFAULTS, option))
            })
    }

    pub fn libdefault_boolean(&self, realm: &[u8], option: &str) -> Option<bool> {
        self.libdefault_string(realm, option)
            .map(|value| conf_boolean(&value))
    }
}

#[derive(Debug)]
pub struct OsContext {
    pub time_offset: i32,
    pub usec_offset: i32,
    pub os_flags: Flags,
}

impl OsContext {
    pub fn new() -> Self {
        Self {
            time_offset: 0,
            usec_offset: 0,
            os_flags: 0,
        }
    }

    pub fn time_offset_valid(&self) -> bool {
        self.os_flags & KRB5_OS_TOFFSET_VALID > 0
    }

    pub fn set_time_offset_valid(&mut self) {
        self.os_flags = self.os_flags & !KRB5_OS_TOFFSET_TIME | KRB5_OS_TOFFSET_VALID;
    }
}

impl Default for OsContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCodec, MockCrypto};

    fn context_with(ini: &str) -> Context {
        Context::with_profile(
            Profile::from_ini(ini).unwrap(),
            Box::new(MockCodec::new()),
            Box::new(MockCrypto::new()),
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply_without_profile_relations() {
        let context = context_with("");
        assert_eq!(context.clockskew, 300);
        assert_eq!(context.referral_maxhops, 5);
        assert_eq!(context.kdc_default_options, KdcRequest::KDC_OPT_RENEWABLE_OK);
        assert!(context.sync_kdctime());
    }

    #[test]
    fn libdefault_realm_relation_wins_over_bare_option() {
        let context =
            context_with("[libdefaults]\nforwardable = no\n\n[EXAMPLE]\nforwardable = yes\n");
        assert_eq!(
            context.libdefault_boolean(b"EXAMPLE", Conf::FORWARDABLE),
            Some(true)
        );
        assert_eq!(
            context.libdefault_boolean(b"OTHER", Conf::FORWARDABLE),
            Some(false)
        );
        assert_eq!(context.libdefault_boolean(b"OTHER", Conf::PROXIABLE), None);
    }

    #[test]
    fn set_real_time_adjusts_timeofday() {
        let mut context = context_with("");
        let skewed = context.timeofday() + 600;
        context.set_real_time(skewed);
        let now = context.timeofday();
        assert!((now - skewed).abs() <= 2);
    }
}
