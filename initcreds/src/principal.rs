use crate::Error;

const REALM_SEP: u8 = b'@';
const COMPONENT_SEP: u8 = b'/';
const ESCAPE_CHAR: u8 = b'\\';

pub const TGS_NAME: &[u8] = b"krbtgt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameType(pub i32);

macro_rules! name_type {
    ($name:ident, $value:expr) => {
        pub const $name: NameType = NameType($value);
    };
}

impl NameType {
    name_type!(UNKNOWN, 0);
    name_type!(PRINCIPAL, 1);
    name_type!(SRV_INST, 2);
    name_type!(SRV_HST, 3);
    name_type!(SRV_XHST, 4);
    name_type!(UID, 5);
    // RFC 6806 referrals; implies realm canonicalization
    name_type!(ENTERPRISE_PRINCIPAL, 10);
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub realm: Vec<u8>,
    pub components: Vec<Vec<u8>>,
    pub name_type: NameType,
}

impl Principal {
    pub fn new(realm: &[u8], components: &[&[u8]], name_type: NameType) -> Self {
        Self {
            realm: realm.to_owned(),
            components: components.iter().map(|c| c.to_vec()).collect(),
            name_type,
        }
    }

    /// The TGS principal of a realm: `krbtgt/<realm>@<realm>`, with both name
    /// components carrying the realm.
    pub fn tgs_for_realm(realm: &[u8]) -> Self {
        Self {
            realm: realm.to_owned(),
            components: vec![TGS_NAME.to_vec(), realm.to_owned()],
            name_type: NameType::SRV_INST,
        }
    }

    // Quoting with backslashes is not carried over from the C library; a name
    // containing one is treated as malformed rather than silently mangled.
    pub fn parse_name(name: &str) -> anyhow::Result<Self> {
        let bytes = name.as_bytes();
        if bytes.contains(&ESCAPE_CHAR) {
            Err(Error::ParseMalformed)?
        }
        let (name_part, realm) = match bytes.iter().position(|&b| b == REALM_SEP) {
            Some(at) => {
                if bytes[at + 1..].contains(&REALM_SEP) {
                    Err(Error::ParseMalformed)?
                }
                (&bytes[..at], bytes[at + 1..].to_vec())
            }
            None => (bytes, vec![]),
        };
        if name_part.is_empty() {
            Err(Error::ParseMalformed)?
        }
        let components: Vec<Vec<u8>> = name_part
            .split(|&b| b == COMPONENT_SEP)
            .map(|c| c.to_vec())
            .collect();
        if components.iter().any(|c| c.is_empty()) {
            Err(Error::ParseMalformed)?
        }
        Ok(Self {
            realm,
            components,
            name_type: NameType::PRINCIPAL,
        })
    }

    pub fn unparse_name(&self) -> anyhow::Result<String> {
        let name = self.components.to_vec().join(&COMPONENT_SEP);
        let name = vec![name, self.realm.to_owned()].join(&REALM_SEP);
        Ok(String::from_utf8(name)?)
    }

    /// Component-wise equality; the name-type tag is advisory and does not
    /// take part in comparisons.
    pub fn compare(&self, other: &Self) -> bool {
        self.realm_compare(other) && self.components == other.components
    }

    pub fn realm_compare(&self, other: &Self) -> bool {
        self.realm == other.realm
    }

    /// A TGS principal has exactly two components, the first being `krbtgt`.
    pub fn is_tgs_princ(&self) -> bool {
        self.components.len() == 2 && self.components[0] == TGS_NAME
    }

    pub fn is_tgt_for_realm(&self, realm: &[u8]) -> bool {
        self.is_tgs_princ() && self.components[1] == realm && self.realm == realm
    }

    /// Default salt: the realm followed by the concatenated name components.
    pub fn to_salt(&self) -> Vec<u8> {
        let mut salt = self.realm.to_owned();
        for component in &self.components {
            salt.extend_from_slice(component);
        }
        salt
    }
}
