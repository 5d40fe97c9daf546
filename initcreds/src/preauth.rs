use crate::{
    Conf, Context, Enctype, Error, FastState, KdcReply, KdcRequest, Keyblock, KeySource, KrbError,
    Prompter,
};

pub type PaType = i32;

// PKINIT family first, matching the historical client preference.
const DEFAULT_PREFERRED_PREAUTH_TYPES: &str = "17, 16, 15, 14";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub pa_type: PaType,
    pub contents: Vec<u8>,
}

macro_rules! pa_type {
    ($name:ident, $value:expr) => {
        pub const $name: PaType = $value;
    };
}

impl PaData {
    pa_type!(PA_TGS_REQ, 1);
    pa_type!(PA_ENC_TIMESTAMP, 2);
    pa_type!(PA_PW_SALT, 3);
    pa_type!(PA_ETYPE_INFO, 11);
    pa_type!(PA_SAM_CHALLENGE, 12);
    pa_type!(PA_SAM_RESPONSE, 13);
    pa_type!(PA_PK_AS_REQ_OLD, 14);
    pa_type!(PA_PK_AS_REP_OLD, 15);
    pa_type!(PA_PK_AS_REQ, 16);
    pa_type!(PA_PK_AS_REP, 17);
    pa_type!(PA_ETYPE_INFO2, 19);
    pa_type!(PA_SAM_CHALLENGE_2, 30);
    pa_type!(PA_SAM_RESPONSE_2, 31);
    pa_type!(PA_FX_COOKIE, 133);
    pa_type!(PA_FX_FAST, 136);
    pa_type!(PA_FX_ERROR, 137);
    pa_type!(PA_ENCRYPTED_CHALLENGE, 138);

    pub fn new(pa_type: PaType, contents: Vec<u8>) -> Self {
        Self { pa_type, contents }
    }
}

/// Turns a bare list of pa-types into empty padata entries, the form used
/// for caller-supplied pre-auth hints.
pub fn make_preauth_list(ptypes: &[PaType]) -> Vec<PaData> {
    ptypes
        .iter()
        .map(|&pa_type| PaData::new(pa_type, vec![]))
        .collect()
}

/// Stable bubble-to-front ordering by the `preferred_preauth_types`
/// relation. Types not named keep their relative order at the tail; an
/// unparsable token ends the preference list without error.
pub fn sort_padata_sequence(context: &Context, realm: &[u8], padata: &mut [PaData]) {
    if padata.is_empty() {
        return;
    }
    let preference = context
        .libdefault_string(realm, Conf::PREFERRED_PREAUTH_TYPES)
        .unwrap_or_else(|| DEFAULT_PREFERRED_PREAUTH_TYPES.to_owned());

    let mut base = 0;
    let mut rest = preference.as_str();
    loop {
        rest = rest.trim_start_matches([',', ' ']);
        if rest.is_empty() {
            break;
        }
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let Ok(wanted) = rest[..end].parse::<PaType>() else {
            break;
        };
        for i in base..padata.len() {
            if padata[i].pa_type == wanted {
                padata[base..=i].rotate_right(1);
                base += 1;
                break;
            }
        }
        rest = &rest[end..];
    }
}

/// The string-to-key inputs a pre-auth round may adjust: salt, s2kparams,
/// the enctype the KDC selected, and the derived AS key itself.
pub struct PreauthState<'a> {
    pub salt: &'a mut Option<Vec<u8>>,
    pub s2kparams: &'a mut Option<Vec<u8>>,
    pub etype: &'a mut Enctype,
    pub as_key: &'a mut Option<Keyblock>,
}

/// Read-only view of the exchange handed to pre-auth mechanisms.
pub struct PreauthRequest<'a> {
    pub request: &'a KdcRequest,
    pub encoded_request_body: Option<&'a [u8]>,
    pub encoded_previous_request: Option<&'a [u8]>,
    pub prompter: Option<&'a dyn Prompter>,
    pub key_source: &'a dyn KeySource,
    pub fast_state: &'a FastState,
}

/// A pre-authentication mechanism. Registered per padata-type; the
/// implementations themselves (timestamp, encrypted challenge, PKINIT, SAM)
/// live outside this crate.
pub trait PreauthMethod {
    fn pa_type(&self) -> PaType;

    /// Produces the padata to attach to the next request.
    fn prepare(
        &self,
        context: &Context,
        req: &PreauthRequest,
        input: &PaData,
        state: &mut PreauthState,
    ) -> anyhow::Result<Vec<PaData>>;

    /// Reconsiders after a KDC error carrying hints; `None` when the
    /// mechanism cannot act on them.
    fn try_again(
        &self,
        _context: &Context,
        _req: &PreauthRequest,
        _input: &PaData,
        _err_reply: &KrbError,
        _state: &mut PreauthState,
    ) -> anyhow::Result<Option<Vec<PaData>>> {
        Ok(None)
    }

    /// Handles reply-side padata; `true` asks for another exchange round.
    fn process_response(
        &self,
        _context: &Context,
        _req: &PreauthRequest,
        _input: &PaData,
        _reply: &KdcReply,
        _state: &mut PreauthState,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Per-negotiation mechanism registry and dispatcher. Created with the
/// context it serves and dropped with it; nothing here is process-global.
#[derive(Default)]
pub struct PreauthContext {
    methods: Vec<Box<dyn PreauthMethod>>,
}

impl PreauthContext {
    pub fn new() -> Self {
        Self { methods: vec![] }
    }

    pub fn register(&mut self, method: Box<dyn PreauthMethod>) {
        self.methods.push(method);
    }

    fn find(&self, pa_type: PaType) -> Option<&dyn PreauthMethod> {
        self.methods
            .iter()
            .map(|method| method.as_ref())
            .find(|method| method.pa_type() == pa_type)
    }

    /// The `prepare` entry point: consumes hint padata for string-to-key
    /// metadata, then lets each candidate's mechanism contribute padata for
    /// the next request.
    pub fn obtain(
        &self,
        context: &Context,
        req: &PreauthRequest,
        candidates: &[PaData],
        state: &mut PreauthState,
    ) -> anyhow::Result<Vec<PaData>> {
        self.apply_info(context, req, candidates, state)?;
        let mut out = vec![];
        for candidate in candidates {
            if let Some(method) = self.find(candidate.pa_type) {
                out.extend(method.prepare(context, req, candidate, state)?);
            }
        }
        Ok(out)
    }

    /// The `try-again` entry point, used after an error other than
    /// pre-auth-required. The first mechanism able to act wins.
    pub fn tryagain(
        &self,
        context: &Context,
        req: &PreauthRequest,
        candidates: &[PaData],
        err_reply: &KrbError,
        state: &mut PreauthState,
    ) -> anyhow::Result<Option<Vec<PaData>>> {
        self.apply_info(context, req, candidates, state)?;
        for candidate in candidates {
            if let Some(method) = self.find(candidate.pa_type) {
                if let Some(padata) =
                    method.try_again(context, req, candidate, err_reply, state)?
                {
                    return Ok(Some(padata));
                }
            }
        }
        Ok(None)
    }

    /// The `process-response` entry point, run over the padata of an AS-REP.
    /// Returns whether any mechanism wants another round.
    pub fn process_reply(
        &self,
        context: &Context,
        req: &PreauthRequest,
        reply: &KdcReply,
        state: &mut PreauthState,
    ) -> anyhow::Result<bool> {
        self.apply_info(context, req, &reply.padata, state)?;
        let mut do_more = false;
        for padata in &reply.padata {
            if let Some(method) = self.find(padata.pa_type) {
                do_more |= method.process_response(context, req, padata, reply, state)?;
            }
        }
        Ok(do_more)
    }

    // PA-PW-SALT and PA-ETYPE-INFO2 are negotiation metadata, not
    // mechanisms: they adjust the string-to-key inputs directly. The first
    // ETYPE-INFO2 entry matching an offered enctype decides.
    fn apply_info(
        &self,
        context: &Context,
        req: &PreauthRequest,
        candidates: &[PaData],
        state: &mut PreauthState,
    ) -> anyhow::Result<()> {
        for padata in candidates {
            match padata.pa_type {
                PaData::PA_PW_SALT => *state.salt = Some(padata.contents.to_owned()),
                PaData::PA_ETYPE_INFO2 => {
                    let entries = context.codec().decode_etype_info2(&padata.contents)?;
                    let entry = entries
                        .iter()
                        .find(|entry| req.request.ktypes.contains(&entry.etype));
                    match entry {
                        Some(entry) => {
                            *state.etype = entry.etype;
                            if let Some(salt) = &entry.salt {
                                *state.salt = Some(salt.to_owned());
                            }
                            *state.s2kparams = entry.s2kparams.to_owned();
                        }
                        None => Err(Error::EtypeNosupp)?,
                    }
                }
                _ => (),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with_profile, test_context};

    fn padata_types(padata: &[PaData]) -> Vec<PaType> {
        padata.iter().map(|pa| pa.pa_type).collect()
    }

    // Drives the sorter with an explicit preference by way of a profile
    // relation.
    fn sort_with(preference: &str, padata: &mut [PaData]) {
        let ini = format!("[libdefaults]\npreferred_preauth_types = {}\n", preference);
        let context = context_with_profile(&ini);
        sort_padata_sequence(&context, b"EXAMPLE", padata);
    }

    #[test]
    fn preference_bubbles_named_types_to_the_front() {
        let mut padata = make_preauth_list(&[2, 1, 3]);
        sort_with("1", &mut padata);
        assert_eq!(padata_types(&padata), vec![1, 2, 3]);

        let mut padata = make_preauth_list(&[2, 1, 3]);
        sort_with("1, 3", &mut padata);
        assert_eq!(padata_types(&padata), vec![1, 3, 2]);
    }

    #[test]
    fn empty_preference_is_a_no_op() {
        let mut padata = make_preauth_list(&[2, 1, 3]);
        sort_with("", &mut padata);
        assert_eq!(padata_types(&padata), vec![2, 1, 3]);
    }

    #[test]
    fn unknown_tokens_terminate_parsing_without_error() {
        let mut padata = make_preauth_list(&[2, 1, 3]);
        sort_with("3 bogus 1", &mut padata);
        assert_eq!(padata_types(&padata), vec![3, 2, 1]);
    }

    #[test]
    fn unlisted_types_keep_their_relative_order() {
        let mut padata = make_preauth_list(&[19, 2, 133, 3]);
        sort_with("133", &mut padata);
        assert_eq!(padata_types(&padata), vec![133, 19, 2, 3]);
    }

    #[test]
    fn default_preference_puts_pkinit_first() {
        let context = test_context();
        let mut padata = make_preauth_list(&[2, 16, 3, 17]);
        sort_padata_sequence(&context, b"EXAMPLE", &mut padata);
        assert_eq!(padata_types(&padata), vec![17, 16, 2, 3]);
    }

    #[test]
    fn etype_info2_hints_update_the_string_to_key_inputs() {
        let (context, codec, _crypto) = crate::testing::harness("");
        let client = crate::Principal::parse_name("alice@EXAMPLE").expect("principal");
        let mut request = KdcRequest::new(client);
        request.ktypes = vec![Enctype::ARCFOUR_HMAC];

        let hint = codec.stash_etype_info2(vec![
            crate::EtypeInfo2 {
                etype: Enctype::AES256_CTS_HMAC_SHA1_96,
                salt: Some(b"unoffered".to_vec()),
                s2kparams: None,
            },
            crate::EtypeInfo2 {
                etype: Enctype::ARCFOUR_HMAC,
                salt: Some(b"EXAMPLEalice".to_vec()),
                s2kparams: Some(vec![0, 0, 0, 1]),
            },
        ]);
        let candidates = vec![PaData::new(PaData::PA_ETYPE_INFO2, hint)];

        let dispatcher = PreauthContext::new();
        let fast_state = FastState::new();
        let key_source = crate::PasswordKeySource::new(b"pw");
        let mut salt = None;
        let mut s2kparams = None;
        let mut etype = Enctype::NULL;
        let mut as_key = None;

        let preq = PreauthRequest {
            request: &request,
            encoded_request_body: None,
            encoded_previous_request: None,
            prompter: None,
            key_source: &key_source,
            fast_state: &fast_state,
        };
        let mut state = PreauthState {
            salt: &mut salt,
            s2kparams: &mut s2kparams,
            etype: &mut etype,
            as_key: &mut as_key,
        };
        let out = dispatcher
            .obtain(&context, &preq, &candidates, &mut state)
            .expect("hints consumed");

        assert!(out.is_empty(), "hints alone contribute no padata");
        assert_eq!(salt.as_deref(), Some(b"EXAMPLEalice" as &[u8]));
        assert_eq!(s2kparams, Some(vec![0, 0, 0, 1]));
        assert_eq!(etype, Enctype::ARCFOUR_HMAC);
        assert!(as_key.is_none());
    }

    #[test]
    fn etype_info2_without_an_offered_enctype_is_an_error() {
        let (context, codec, _crypto) = crate::testing::harness("");
        let client = crate::Principal::parse_name("alice@EXAMPLE").expect("principal");
        let mut request = KdcRequest::new(client);
        request.ktypes = vec![Enctype::ARCFOUR_HMAC];

        let hint = codec.stash_etype_info2(vec![crate::EtypeInfo2 {
            etype: Enctype::AES256_CTS_HMAC_SHA1_96,
            salt: None,
            s2kparams: None,
        }]);
        let candidates = vec![PaData::new(PaData::PA_ETYPE_INFO2, hint)];

        let dispatcher = PreauthContext::new();
        let fast_state = FastState::new();
        let key_source = crate::PasswordKeySource::new(b"pw");
        let mut salt = None;
        let mut s2kparams = None;
        let mut etype = Enctype::NULL;
        let mut as_key = None;

        let preq = PreauthRequest {
            request: &request,
            encoded_request_body: None,
            encoded_previous_request: None,
            prompter: None,
            key_source: &key_source,
            fast_state: &fast_state,
        };
        let mut state = PreauthState {
            salt: &mut salt,
            s2kparams: &mut s2kparams,
            etype: &mut etype,
            as_key: &mut as_key,
        };
        let err = dispatcher
            .obtain(&context, &preq, &candidates, &mut state)
            .expect_err("no overlap with the offer");
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::EtypeNosupp));
    }

    #[test]
    fn pw_salt_hints_replace_the_salt() {
        let (context, _codec, _crypto) = crate::testing::harness("");
        let client = crate::Principal::parse_name("alice@EXAMPLE").expect("principal");
        let request = KdcRequest::new(client);

        let candidates = vec![PaData::new(PaData::PA_PW_SALT, b"v4salt".to_vec())];

        let dispatcher = PreauthContext::new();
        let fast_state = FastState::new();
        let key_source = crate::PasswordKeySource::new(b"pw");
        let mut salt = Some(b"stale".to_vec());
        let mut s2kparams = None;
        let mut etype = Enctype::NULL;
        let mut as_key = None;

        let preq = PreauthRequest {
            request: &request,
            encoded_request_body: None,
            encoded_previous_request: None,
            prompter: None,
            key_source: &key_source,
            fast_state: &fast_state,
        };
        let mut state = PreauthState {
            salt: &mut salt,
            s2kparams: &mut s2kparams,
            etype: &mut etype,
            as_key: &mut as_key,
        };
        dispatcher
            .obtain(&context, &preq, &candidates, &mut state)
            .expect("salt hint consumed");
        assert_eq!(salt.as_deref(), Some(b"v4salt" as &[u8]));
    }
}
