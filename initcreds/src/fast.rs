use crate::{Context, Error, KdcReply, KdcRequest, Keyblock, KrbError, PaData};

/// Pre-authentication armor provider. Implementations wrap outgoing requests
/// in an armored envelope and unwrap the replies; the plumbing here only
/// routes the calls.
pub trait FastArmor {
    /// Applies armor to the request before the first transmission.
    fn armor_request(&mut self, context: &Context, request: &mut KdcRequest) -> anyhow::Result<()>;

    /// Encodes the request inside the armored envelope.
    fn prep_req(&mut self, context: &Context, request: &KdcRequest) -> anyhow::Result<Vec<u8>>;

    /// Unwraps an armored error reply in place, returning the padata hints it
    /// carried and whether another round is worth attempting.
    fn process_error(
        &mut self,
        context: &Context,
        err_reply: &mut KrbError,
    ) -> anyhow::Result<(Vec<PaData>, bool)>;

    /// Handles the armored portion of an AS-REP, yielding the strengthen key
    /// when the KDC sent one.
    fn process_response(
        &mut self,
        context: &Context,
        reply: &KdcReply,
    ) -> anyhow::Result<Option<Keyblock>>;

    /// Combines the strengthen key with the AS key into the reply key.
    fn reply_key(
        &self,
        context: &Context,
        strengthen_key: Option<&Keyblock>,
        as_key: &Keyblock,
    ) -> anyhow::Result<Keyblock>;
}

/// Armor state threaded through every pre-auth call of one negotiation.
/// Without a provider every entry point degrades to the plain, unarmored
/// behavior.
#[derive(Default)]
pub struct FastState {
    armor: Option<Box<dyn FastArmor>>,
}

impl FastState {
    pub fn new() -> Self {
        Self { armor: None }
    }

    pub fn set_armor(&mut self, armor: Box<dyn FastArmor>) {
        self.armor = Some(armor);
    }

    pub fn armored(&self) -> bool {
        self.armor.is_some()
    }

    pub fn as_armor(&mut self, context: &Context, request: &mut KdcRequest) -> anyhow::Result<()> {
        match &mut self.armor {
            Some(armor) => armor.armor_request(context, request),
            None => Ok(()),
        }
    }

    // Armor never changes the inner body encoding; checksummed bodies are
    // always the plain KDC-REQ-BODY.
    pub fn prep_req_body(
        &self,
        context: &Context,
        request: &KdcRequest,
    ) -> anyhow::Result<Vec<u8>> {
        context.codec().encode_as_req_body(request)
    }

    pub fn prep_req(&mut self, context: &Context, request: &KdcRequest) -> anyhow::Result<Vec<u8>> {
        match &mut self.armor {
            Some(armor) => armor.prep_req(context, request),
            None => context.codec().encode_as_req(request),
        }
    }

    pub fn process_error(
        &mut self,
        context: &Context,
        err_reply: &mut KrbError,
    ) -> anyhow::Result<(Vec<PaData>, bool)> {
        if let Some(armor) = &mut self.armor {
            return armor.process_error(context, err_reply);
        }
        if err_reply.e_data.is_empty() {
            return Ok((vec![], false));
        }
        // e-data of some errors carries typed-data rather than padata; an
        // undecodable payload simply yields no hints.
        match context.codec().decode_padata_sequence(&err_reply.e_data) {
            Ok(padata) => Ok((padata, true)),
            Err(_) => Ok((vec![], false)),
        }
    }

    pub fn process_response(
        &mut self,
        context: &Context,
        reply: &KdcReply,
    ) -> anyhow::Result<Option<Keyblock>> {
        match &mut self.armor {
            Some(armor) => armor.process_response(context, reply),
            None => Ok(None),
        }
    }

    pub fn reply_key(
        &self,
        context: &Context,
        strengthen_key: Option<&Keyblock>,
        as_key: &Keyblock,
    ) -> anyhow::Result<Keyblock> {
        match (&self.armor, strengthen_key) {
            (Some(armor), _) => armor.reply_key(context, strengthen_key, as_key),
            // A strengthen key without armor cannot be combined.
            (None, Some(_)) => Err(Error::PreauthFailed)?,
            (None, None) => Ok(as_key.to_owned()),
        }
    }
}
