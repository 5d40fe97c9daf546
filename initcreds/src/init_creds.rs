use crate::{
    get_in_tkt::{
        build_in_tkt_name, decrypt_as_reply, gen_nonce, order_enctypes, request_addresses,
        saturating_add_i32, stash_as_reply, validate_as_rep, verify_as_reply, MAX_IN_TKT_LOOPS,
    },
    krb::string_to_deltat,
    message,
    preauth::{make_preauth_list, sort_padata_sequence},
    Conf, Context, Credential, DeltaT, Enctype, Error, FastArmor, FastState, GetInitCredsOpt,
    KdcReply, KdcRequest, Keyblock, KeySource, KrbError, NameType, PaData, PasswordKeySource,
    PreauthContext, PreauthMethod, PreauthRequest, PreauthState, Principal, Prompter, Timestamp,
    Transport,
};

pub const INIT_CREDS_STEP_FLAG_COMPLETE: u32 = 1;

const DEFAULT_TKT_LIFE: DeltaT = 24 * 60 * 60;

/// Resumable initial-credential negotiation with the transport outside.
/// Callers alternate `step` with their own I/O until the `COMPLETE` flag is
/// set, then read the credential back with `get_creds`. One context serves
/// one acquisition and is not meant to be shared across threads.
pub struct InitCredsContext {
    request: KdcRequest,
    in_tkt_service: Option<String>,
    prompter: Option<Box<dyn Prompter>>,
    key_source: Box<dyn KeySource>,
    preauth: PreauthContext,
    fast_state: FastState,
    start_time: DeltaT,
    tkt_life: DeltaT,
    renew_life: DeltaT,
    preauth_to_use: Vec<PaData>,
    salt: Option<Vec<u8>>,
    s2kparams: Option<Vec<u8>>,
    etype: Enctype,
    as_key: Option<Keyblock>,
    err_reply: Option<KrbError>,
    reply: Option<KdcReply>,
    cred: Option<Credential>,
    encoded_request_body: Option<Vec<u8>>,
    encoded_previous_request: Option<Vec<u8>>,
    request_time: Timestamp,
    loopcount: u32,
    referral_count: i32,
    complete: bool,
}

impl InitCredsContext {
    /// Sets up the request shell from options and profile, as
    /// `get_init_creds` would. The AS key defaults to prompting for a
    /// password; callers with other key material install their own source
    /// with `set_key_source`.
    pub fn init(
        context: &mut Context,
        client: Principal,
        prompter: Option<Box<dyn Prompter>>,
        start_time: DeltaT,
        options: &GetInitCredsOpt,
    ) -> anyhow::Result<Self> {
        let mut client = client;
        if client.realm.is_empty() {
            client.realm = context.get_default_realm()?;
        }
        let realm = client.realm.to_owned();

        let mut request = KdcRequest::new(client);
        request.kdc_options = context.kdc_default_options;

        let forwardable = options
            .forwardable
            .or_else(|| context.libdefault_boolean(&realm, Conf::FORWARDABLE))
            .unwrap_or(false);
        if forwardable {
            request.kdc_options |= KdcRequest::KDC_OPT_FORWARDABLE;
        }

        let proxiable = options
            .proxiable
            .or_else(|| context.libdefault_boolean(&realm, Conf::PROXIABLE))
            .unwrap_or(false);
        if proxiable {
            request.kdc_options |= KdcRequest::KDC_OPT_PROXIABLE;
        }

        let canonicalize = options
            .canonicalize
            .or_else(|| context.libdefault_boolean(&realm, Conf::CANONICALIZE))
            .unwrap_or(false);
        if canonicalize {
            request.kdc_options |= KdcRequest::KDC_OPT_CANONICALIZE;
        }

        if start_time > 0 {
            request.kdc_options |=
                KdcRequest::KDC_OPT_ALLOW_POSTDATE | KdcRequest::KDC_OPT_POSTDATED;
        }

        let tkt_life = match options.tkt_life {
            Some(tkt_life) => tkt_life,
            None => match context.libdefault_string(&realm, Conf::TICKET_LIFETIME) {
                Some(lifetime) => string_to_deltat(&lifetime)?,
                None => DEFAULT_TKT_LIFE,
            },
        };

        let renew_life = match options.renew_life {
            Some(renew_life) => renew_life,
            None => match context.libdefault_string(&realm, Conf::RENEW_LIFETIME) {
                Some(lifetime) => string_to_deltat(&lifetime)?,
                None => 0,
            },
        };
        if renew_life > 0 {
            request.kdc_options |= KdcRequest::KDC_OPT_RENEWABLE;
        }

        request.ktypes = order_enctypes(options.etype_list.as_deref());
        if request.ktypes.is_empty() {
            Err(Error::EtypeNosupp)?
        }

        request.addresses = request_addresses(context, &realm, options.address_list.as_deref())?;

        let preauth_to_use = options
            .preauth_list
            .as_deref()
            .map(make_preauth_list)
            .unwrap_or_default();

        Ok(Self {
            request,
            in_tkt_service: None,
            prompter,
            key_source: Box::new(PasswordKeySource::prompt_only()),
            preauth: PreauthContext::new(),
            fast_state: FastState::new(),
            start_time,
            tkt_life,
            renew_life,
            preauth_to_use,
            salt: options.salt.to_owned(),
            s2kparams: None,
            etype: Enctype::NULL,
            as_key: None,
            err_reply: None,
            reply: None,
            cred: None,
            encoded_request_body: None,
            encoded_previous_request: None,
            request_time: 0,
            loopcount: 0,
            referral_count: 0,
            complete: false,
        })
    }

    pub fn set_service(&mut self, service: &str) {
        self.in_tkt_service = Some(service.to_owned());
    }

    pub fn set_key_source(&mut self, key_source: Box<dyn KeySource>) {
        self.key_source = key_source;
    }

    pub fn register_preauth(&mut self, method: Box<dyn PreauthMethod>) {
        self.preauth.register(method);
    }

    pub fn set_fast_armor(&mut self, armor: Box<dyn FastArmor>) {
        self.fast_state.set_armor(armor);
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// A deep copy of the acquired credential.
    pub fn get_creds(&self) -> anyhow::Result<Credential> {
        match &self.cred {
            Some(cred) => Ok(cred.to_owned()),
            None => Err(anyhow::anyhow!(
                "initial credentials have not been acquired yet"
            )),
        }
    }

    /// A deep copy of the most recent KRB-ERROR, for callers that outlive
    /// the context.
    pub fn get_error(&self) -> Option<KrbError> {
        self.err_reply.to_owned()
    }

    pub fn as_reply(&self) -> Option<&KdcReply> {
        self.reply.as_ref()
    }

    /// One turn of the state machine. `input` is empty on the first call and
    /// the raw KDC reply afterwards; `out` receives the next encoded request
    /// and `realm` whom to send it to. `COMPLETE` in `flags` means the
    /// credential is ready and nothing was emitted.
    pub fn step(
        &mut self,
        context: &mut Context,
        input: &[u8],
        out: &mut Vec<u8>,
        realm: &mut Vec<u8>,
        flags: &mut u32,
    ) -> anyhow::Result<()> {
        *flags = 0;
        out.clear();
        realm.clear();

        if self.complete {
            *flags |= INIT_CREDS_STEP_FLAG_COMPLETE;
            return Ok(());
        }

        match self.step_inner(context, input, out, realm, flags) {
            Err(err)
                if err.downcast_ref::<Error>()
                    == Some(&Error::KdcReported(KrbError::KDC_ERR_C_PRINCIPAL_UNKNOWN)) =>
            {
                let client_name = self.request.client.unparse_name().unwrap_or_default();
                Err(err.context(format!(
                    "Client '{}' not found in Kerberos database",
                    client_name
                )))
            }
            result => result,
        }
    }

    fn step_inner(
        &mut self,
        context: &mut Context,
        input: &[u8],
        out: &mut Vec<u8>,
        realm: &mut Vec<u8>,
        flags: &mut u32,
    ) -> anyhow::Result<()> {
        if !input.is_empty() {
            match self.step_reply(context, input, flags) {
                Err(err)
                    if err.downcast_ref::<Error>() == Some(&Error::ResponseTooBig) =>
                {
                    // Re-emit the previous request untouched; the caller is
                    // expected to retry it over TCP.
                    if let Some(previous) = &self.encoded_previous_request {
                        out.extend_from_slice(previous);
                    }
                    if let Some(server) = &self.request.server {
                        realm.extend_from_slice(&server.realm);
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
                Ok(()) => {
                    if self.complete {
                        *flags |= INIT_CREDS_STEP_FLAG_COMPLETE;
                        return Ok(());
                    }
                }
            }
        }

        self.step_request(context, out)?;

        match &self.request.server {
            Some(server) => realm.extend_from_slice(&server.realm),
            None => Err(Error::RealmMismatch)?,
        }
        self.loopcount += 1;
        Ok(())
    }

    // Classifies the raw reply onto the context: err_reply for a KRB-ERROR,
    // reply for an AS-REP. RESPONSE_TOO_BIG is surfaced to the caller.
    fn validate_reply(&mut self, context: &Context, input: &[u8]) -> anyhow::Result<()> {
        self.err_reply = None;
        self.reply = None;

        if message::is_krb_error(input) {
            let err_reply = context.codec().decode_krb_error(input)?;
            if err_reply.error == KrbError::KRB_ERR_RESPONSE_TOO_BIG {
                Err(Error::ResponseTooBig)?
            }
            self.err_reply = Some(err_reply);
            return Ok(());
        }

        self.reply = Some(validate_as_rep(context, input)?);
        Ok(())
    }

    fn step_reply(
        &mut self,
        context: &mut Context,
        input: &[u8],
        flags: &mut u32,
    ) -> anyhow::Result<()> {
        self.validate_reply(context, input)?;

        let canon_flag = self.request.kdc_options & KdcRequest::KDC_OPT_CANONICALIZE != 0
            || self.request.client.name_type == NameType::ENTERPRISE_PRINCIPAL;

        if let Some(mut err_reply) = self.err_reply.take() {
            let (padata, retry) = self.fast_state.process_error(context, &mut err_reply)?;

            let result = if err_reply.error == KrbError::KDC_ERR_PREAUTH_REQUIRED && retry {
                self.preauth_to_use = padata;
                sort_padata_sequence(
                    context,
                    &self.request.client.realm,
                    &mut self.preauth_to_use,
                );
                Ok(())
            } else if canon_flag && err_reply.error == KrbError::KDC_ERR_WRONG_REALM {
                self.referral_count += 1;
                let referred_realm = err_reply
                    .client
                    .as_ref()
                    .map(|referred| referred.realm.to_owned())
                    .unwrap_or_default();
                if self.referral_count > context.referral_maxhops || referred_realm.is_empty() {
                    Err(anyhow::Error::new(Error::WrongRealm))
                } else {
                    // The server principal is rebuilt from the client realm
                    // on the next request turn.
                    self.request.client.realm = referred_realm;
                    Ok(())
                }
            } else if retry {
                // some mechanism may still act on the hints in step_request
                Ok(())
            } else {
                Err(anyhow::Error::new(Error::KdcReported(err_reply.error))
                    .context(err_reply.to_string()))
            };
            self.err_reply = Some(err_reply);
            return result;
        }

        let mut reply = match self.reply.take() {
            Some(reply) => reply,
            None => Err(Error::BadMsgType)?,
        };
        let result = self.process_as_reply(context, &mut reply);
        self.reply = Some(reply);
        result?;

        self.complete = true;
        *flags |= INIT_CREDS_STEP_FLAG_COMPLETE;
        Ok(())
    }

    fn process_as_reply(
        &mut self,
        context: &mut Context,
        reply: &mut KdcReply,
    ) -> anyhow::Result<()> {
        let strengthen_key = self.fast_state.process_response(context, reply)?;

        sort_padata_sequence(context, &self.request.client.realm, &mut reply.padata);
        self.etype = reply.enc_part.enctype;

        {
            let preq = PreauthRequest {
                request: &self.request,
                encoded_request_body: self.encoded_request_body.as_deref(),
                encoded_previous_request: self.encoded_previous_request.as_deref(),
                prompter: self.prompter.as_deref(),
                key_source: self.key_source.as_ref(),
                fast_state: &self.fast_state,
            };
            let mut state = PreauthState {
                salt: &mut self.salt,
                s2kparams: &mut self.s2kparams,
                etype: &mut self.etype,
                as_key: &mut self.as_key,
            };
            self.preauth.process_reply(context, &preq, reply, &mut state)?;
        }

        if self.salt.is_none() {
            // Salt of the client principal the KDC replied with, which may
            // have been canonicalized; the client itself is checked below in
            // verify_as_reply.
            self.salt = Some(reply.client.to_salt());
        }

        // Try the AS key a pre-auth round produced, if any; when that fails
        // (or none exists) fetch a key from the source and decrypt once
        // more, unless the source rules the second attempt out.
        let mut decrypted = false;
        if let Some(as_key) = &self.as_key {
            let encrypting_key =
                self.fast_state
                    .reply_key(context, strengthen_key.as_ref(), as_key)?;
            match decrypt_as_reply(context, reply, &encrypting_key) {
                Ok(()) => decrypted = true,
                Err(_) if self.key_source.retry_on_decrypt_failure() => (),
                Err(err) => return Err(err),
            }
        }
        if !decrypted {
            let salt = match &self.salt {
                Some(salt) => salt.to_owned(),
                None => reply.client.to_salt(),
            };
            let as_key = self.key_source.get_as_key(
                context,
                &self.request.client,
                reply.enc_part.enctype,
                self.prompter.as_deref(),
                &salt,
                self.s2kparams.as_deref(),
            )?;
            let encrypting_key =
                self.fast_state
                    .reply_key(context, strengthen_key.as_ref(), &as_key)?;
            self.as_key = Some(as_key);
            decrypt_as_reply(context, reply, &encrypting_key)?;
        }

        verify_as_reply(context, self.request_time, &self.request, reply)?;
        self.cred = Some(stash_as_reply(reply, None, None, None)?);
        Ok(())
    }

    fn step_request(&mut self, context: &mut Context, out: &mut Vec<u8>) -> anyhow::Result<()> {
        if self.loopcount >= MAX_IN_TKT_LOOPS {
            Err(Error::GetInTktLoop)?
        }

        // Recomputed every turn; a referral may have moved the client realm.
        self.request.server = Some(build_in_tkt_name(
            self.in_tkt_service.as_deref(),
            &self.request.client,
        )?);

        if self.loopcount == 0 {
            self.request_time = context.timeofday();

            self.fast_state.as_armor(context, &mut self.request)?;
            self.encoded_request_body =
                Some(self.fast_state.prep_req_body(context, &self.request)?);

            self.request.from = if self.start_time == 0 {
                0
            } else {
                saturating_add_i32(self.request_time, self.start_time)
            };
            let lifetime_base = if self.request.from != 0 {
                self.request.from
            } else {
                self.request_time
            };
            self.request.till = saturating_add_i32(lifetime_base, self.tkt_life);
            if self.renew_life > 0 {
                self.request.rtime = saturating_add_i32(lifetime_base, self.renew_life);
                if self.request.rtime < self.request.till {
                    // never ask for a renewable window shorter than the
                    // lifetime itself
                    self.request.rtime = self.request.till;
                }
                self.request.kdc_options &= !KdcRequest::KDC_OPT_RENEWABLE_OK;
            } else {
                self.request.rtime = 0;
            }
        }

        if self.err_reply.is_none() {
            // first attempt, or retrying after pre-auth-required
            let padata = {
                let preq = PreauthRequest {
                    request: &self.request,
                    encoded_request_body: self.encoded_request_body.as_deref(),
                    encoded_previous_request: self.encoded_previous_request.as_deref(),
                    prompter: self.prompter.as_deref(),
                    key_source: self.key_source.as_ref(),
                    fast_state: &self.fast_state,
                };
                let mut state = PreauthState {
                    salt: &mut self.salt,
                    s2kparams: &mut self.s2kparams,
                    etype: &mut self.etype,
                    as_key: &mut self.as_key,
                };
                self.preauth
                    .obtain(context, &preq, &self.preauth_to_use, &mut state)?
            };
            self.request.padata = padata;
        } else if let Some(err_reply) = self.err_reply.take() {
            // Retry after an error other than pre-auth-required, steered by
            // its e-data. A mechanism that cannot act leaves the KDC error
            // as the outcome.
            let padata = if self.preauth_to_use.is_empty() {
                None
            } else {
                let preq = PreauthRequest {
                    request: &self.request,
                    encoded_request_body: self.encoded_request_body.as_deref(),
                    encoded_previous_request: self.encoded_previous_request.as_deref(),
                    prompter: self.prompter.as_deref(),
                    key_source: self.key_source.as_ref(),
                    fast_state: &self.fast_state,
                };
                let mut state = PreauthState {
                    salt: &mut self.salt,
                    s2kparams: &mut self.s2kparams,
                    etype: &mut self.etype,
                    as_key: &mut self.as_key,
                };
                self.preauth
                    .tryagain(context, &preq, &self.preauth_to_use, &err_reply, &mut state)
                    .unwrap_or(None)
            };
            let code = err_reply.error;
            let text = err_reply.to_string();
            self.err_reply = Some(err_reply);
            match padata {
                Some(padata) => self.request.padata = padata,
                None => {
                    return Err(anyhow::Error::new(Error::KdcReported(code)).context(text))
                }
            }
        }

        self.request.nonce = gen_nonce(context);

        let encoded = self.fast_state.prep_req(context, &self.request)?;
        out.extend_from_slice(&encoded);
        self.encoded_previous_request = Some(encoded);
        Ok(())
    }

    /// Drives the step machine over a transport until the credential is
    /// ready, switching to TCP after a RESPONSE_TOO_BIG.
    pub fn get(
        &mut self,
        context: &mut Context,
        transport: &mut dyn Transport,
    ) -> anyhow::Result<()> {
        let mut input: Vec<u8> = vec![];
        let mut out = vec![];
        let mut realm = vec![];
        let mut flags = 0u32;
        let mut tcp_only = false;
        let mut use_master = false;

        loop {
            match self.step(context, &input, &mut out, &mut realm, &mut flags) {
                Ok(()) => {
                    if flags & INIT_CREDS_STEP_FLAG_COMPLETE != 0 {
                        return Ok(());
                    }
                }
                Err(err)
                    if !tcp_only
                        && err.downcast_ref::<Error>() == Some(&Error::ResponseTooBig) =>
                {
                    tcp_only = true;
                }
                Err(err) => return Err(err),
            }

            input = transport.send_to_kdc(context, &out, &realm, &mut use_master, tcp_only)?;
        }
    }
}

/// Acquires initial credentials in one call: context setup, the step loop
/// over `transport`, and the credential copy out.
#[allow(clippy::too_many_arguments)]
pub fn get_init_creds(
    context: &mut Context,
    client: Principal,
    prompter: Option<Box<dyn Prompter>>,
    key_source: Box<dyn KeySource>,
    start_time: DeltaT,
    in_tkt_service: Option<&str>,
    options: &GetInitCredsOpt,
    transport: &mut dyn Transport,
) -> anyhow::Result<Credential> {
    let mut ctx = InitCredsContext::init(context, client, prompter, start_time, options)?;
    ctx.set_key_source(key_source);
    if let Some(service) = in_tkt_service {
        ctx.set_service(service);
    }
    ctx.get(context, transport)?;
    ctx.get_creds()
}
