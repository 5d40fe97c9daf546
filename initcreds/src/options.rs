use crate::{Address, DeltaT, Enctype, PaType};

/// Caller preferences for an initial-credential exchange. Unset fields fall
/// back to the profile, then to built-in defaults.
#[derive(Debug, Default)]
pub struct GetInitCredsOpt {
    pub forwardable: Option<bool>,
    pub proxiable: Option<bool>,
    pub canonicalize: Option<bool>,
    pub tkt_life: Option<DeltaT>,
    pub renew_life: Option<DeltaT>,
    pub etype_list: Option<Vec<Enctype>>,
    pub address_list: Option<Vec<Address>>,
    pub preauth_list: Option<Vec<PaType>>,
    pub salt: Option<Vec<u8>>,
}
