use crate::{
    message::{self, KRB5_AS_REP},
    preauth::{make_preauth_list, sort_padata_sequence},
    Address, Conf, Context, Credential, CredentialCache, Enctype, Error, FastState, Flags,
    KdcReply, KdcRequest, Keyblock, KeySource, KrbError, NameType, PaType, PreauthContext,
    PreauthRequest, PreauthState, Principal, Prompter, TicketTimes, Timestamp, Transport,
};

pub(crate) const MAX_IN_TKT_LOOPS: u32 = 16;

// Historical default offer, most preferred first.
const GET_IN_TKT_ENCTYPES: [Enctype; 5] = [
    Enctype::DES3_CBC_SHA1,
    Enctype::ARCFOUR_HMAC,
    Enctype::DES_CBC_MD5,
    Enctype::DES_CBC_MD4,
    Enctype::DES_CBC_CRC,
];

/// 32-bit bounded addition, so lifetimes computed near the timestamp limits
/// clamp instead of wrapping into the past.
pub fn saturating_add_i32(x: i32, y: i32) -> i32 {
    if x > 0 && y > i32::MAX - x {
        i32::MAX
    } else if x < 0 && y < i32::MIN - x {
        i32::MIN
    } else {
        x + y
    }
}

// 31-bit nonce: the high bit stays clear because some peers decode the field
// as signed. Falls back to the clock when no randomness is available.
pub(crate) fn gen_nonce(context: &Context) -> i32 {
    match context.crypto().random_bytes(4) {
        Ok(bytes) if bytes.len() == 4 => {
            0x7fffffff & i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
        _ => context.timeofday(),
    }
}

// Starts from the default offer. Requested enctypes are promoted to the
// front in their own order, displaced entries staying live in case they are
// requested later; enctypes outside the default set are dropped, never
// invented. A request list trims the offer to what it matched.
pub(crate) fn order_enctypes(requested: Option<&[Enctype]>) -> Vec<Enctype> {
    let mut ktypes = GET_IN_TKT_ENCTYPES.to_vec();
    let Some(requested) = requested else {
        return ktypes;
    };
    let mut next = 0;
    for &wanted in requested {
        if next >= ktypes.len() {
            break;
        }
        if let Some(offset) = ktypes[next..].iter().position(|&k| k == wanted) {
            ktypes.swap(next, next + offset);
            next += 1;
        }
    }
    ktypes.truncate(next);
    ktypes
}

/// The server principal of an AS exchange: an explicit service rewritten
/// into the client's realm, or the realm's own TGS principal.
pub(crate) fn build_in_tkt_name(
    in_tkt_service: Option<&str>,
    client: &Principal,
) -> anyhow::Result<Principal> {
    match in_tkt_service {
        Some(service) => {
            let mut server = Principal::parse_name(service)?;
            server.realm = client.realm.to_owned();
            Ok(server)
        }
        None => Ok(Principal::tgs_for_realm(&client.realm)),
    }
}

// After a referral the realm and, for a TGS principal, the second name
// component move to the new realm together.
pub(crate) fn rewrite_server_realm(old_server: &Principal, realm: &[u8], tgs: bool) -> Principal {
    let mut server = old_server.to_owned();
    server.realm = realm.to_owned();
    if tgs {
        server.components[1] = realm.to_owned();
    }
    server
}

// Address policy: an explicit list wins; otherwise `noaddresses` decides
// between no addresses (the default) and the local interface set.
pub(crate) fn request_addresses(
    context: &Context,
    realm: &[u8],
    explicit: Option<&[Address]>,
) -> anyhow::Result<Vec<Address>> {
    if let Some(addresses) = explicit {
        return Ok(addresses.to_vec());
    }
    if context
        .libdefault_boolean(realm, Conf::NOADDRESSES)
        .unwrap_or(true)
    {
        return Ok(vec![]);
    }
    Address::local_addresses()
}

pub(crate) enum Response {
    Error(KrbError),
    AsRep(KdcReply),
}

/// Decodes a raw reply: KRB-ERROR, AS-REP, or one of the two malformed
/// shapes (a Kerberos v4 error, or something else entirely).
pub(crate) fn validate_as_rep(context: &Context, reply: &[u8]) -> anyhow::Result<KdcReply> {
    if !message::is_as_rep(reply) {
        if message::is_v4_error_reply(reply) {
            Err(Error::V4Reply)?
        }
        Err(Error::BadMsgType)?
    }
    let as_reply = context.codec().decode_as_rep(reply)?;
    if as_reply.msg_type != KRB5_AS_REP {
        Err(Error::BadMsgType)?
    }
    Ok(as_reply)
}

// One request/reply round. RESPONSE_TOO_BIG is consumed here by retrying
// once over TCP.
fn send_as_request(
    context: &Context,
    transport: &mut dyn Transport,
    packet: &[u8],
    realm: &[u8],
    use_master: &mut bool,
) -> anyhow::Result<Response> {
    let mut tcp_only = false;
    loop {
        let reply = transport.send_to_kdc(context, packet, realm, use_master, tcp_only)?;
        if message::is_krb_error(&reply) {
            let err_reply = context.codec().decode_krb_error(&reply)?;
            if err_reply.error == KrbError::KRB_ERR_RESPONSE_TOO_BIG && !tcp_only {
                tcp_only = true;
                continue;
            }
            return Ok(Response::Error(err_reply));
        }
        return Ok(Response::AsRep(validate_as_rep(context, &reply)?));
    }
}

pub(crate) fn decrypt_as_reply(
    context: &Context,
    as_reply: &mut KdcReply,
    key: &Keyblock,
) -> anyhow::Result<()> {
    if as_reply.enc_part2.is_some() {
        return Ok(());
    }
    let plaintext = context.crypto().decrypt(
        key,
        as_reply.enc_part.enctype,
        &as_reply.enc_part.ciphertext,
    )?;
    as_reply.enc_part2 = Some(context.codec().decode_enc_as_rep_part(&plaintext)?);
    Ok(())
}

/// Cross-field checks of a decrypted AS-REP against the request it answers.
/// A missing starttime is repaired to the authtime first; every other
/// discrepancy is a KDCREP_MODIFIED, except the clock-skew bound which has
/// its own error.
pub(crate) fn verify_as_reply(
    context: &mut Context,
    time_now: Timestamp,
    request: &KdcRequest,
    as_reply: &mut KdcReply,
) -> anyhow::Result<()> {
    let request_server = match &request.server {
        Some(server) => server,
        None => Err(Error::KdcRepModified)?,
    };
    let enc_part2 = match as_reply.enc_part2.as_mut() {
        Some(enc_part2) => enc_part2,
        None => Err(Error::KdcRepModified)?,
    };

    if enc_part2.times.starttime == 0 {
        enc_part2.times.starttime = enc_part2.times.authtime;
    }

    // The server (and with it the client) may only change when the caller
    // asked for canonicalization and both ends of the rewrite are TGS
    // principals.
    let canon_req = request.kdc_options & KdcRequest::KDC_OPT_CANONICALIZE != 0
        || request.client.name_type == NameType::ENTERPRISE_PRINCIPAL;
    let canon_ok =
        canon_req && request_server.is_tgs_princ() && enc_part2.server.is_tgs_princ();

    let granted_renewable = enc_part2.flags & Credential::TKT_FLG_RENEWABLE != 0;

    if (!canon_ok
        && (!as_reply.client.compare(&request.client)
            || !enc_part2.server.compare(request_server)))
        || !enc_part2.server.compare(&as_reply.ticket.server)
        || request.nonce != enc_part2.nonce
        || (request.kdc_options & KdcRequest::KDC_OPT_POSTDATED != 0
            && request.from != 0
            && request.from != enc_part2.times.starttime)
        || (request.till != 0 && enc_part2.times.endtime > request.till)
        || (request.kdc_options & KdcRequest::KDC_OPT_RENEWABLE != 0
            && request.rtime != 0
            && enc_part2.times.renew_till > request.rtime)
        || (request.kdc_options & KdcRequest::KDC_OPT_RENEWABLE_OK != 0
            && request.kdc_options & KdcRequest::KDC_OPT_RENEWABLE == 0
            && granted_renewable
            && request.till != 0
            && enc_part2.times.renew_till > request.till)
    {
        Err(Error::KdcRepModified)?
    }

    if context.sync_kdctime() {
        context.set_real_time(enc_part2.times.authtime);
    } else if request.from == 0
        && (enc_part2.times.starttime as i64 - time_now as i64).abs() > context.clockskew as i64
    {
        Err(Error::KdcRepSkew)?
    }
    Ok(())
}

/// Populates a credential from a verified reply and hands it to the cache
/// when one is configured. Absent client/server inputs are taken from the
/// reply. Abandoned partial credentials zeroize their key on drop.
pub(crate) fn stash_as_reply(
    as_reply: &KdcReply,
    client: Option<Principal>,
    server: Option<Principal>,
    ccache: Option<&mut dyn CredentialCache>,
) -> anyhow::Result<Credential> {
    let enc_part2 = match as_reply.enc_part2.as_ref() {
        Some(enc_part2) => enc_part2,
        None => Err(Error::KdcRepModified)?,
    };
    let credential = Credential {
        client: client.unwrap_or_else(|| as_reply.client.to_owned()),
        server: server.unwrap_or_else(|| enc_part2.server.to_owned()),
        keyblock: enc_part2.session.to_owned(),
        times: enc_part2.times,
        // an AS exchange cannot be skey-encrypted
        is_skey: false,
        ticket_flags: enc_part2.flags,
        addresses: enc_part2.caddrs.to_owned(),
        ticket: as_reply.ticket_bytes.to_owned(),
        second_ticket: vec![],
        authdata: vec![],
    };
    if let Some(cache) = ccache {
        cache.store(&credential)?;
    }
    Ok(credential)
}

/// All-purpose initial ticket routine with the transport folded in: builds
/// AS-REQs for `client` against `server`, runs the pre-auth rounds over
/// `transport`, and on success decrypts, verifies and stashes the
/// credential. `times` carries the requested from/till/rtime.
#[allow(clippy::too_many_arguments)]
pub fn get_in_tkt(
    context: &mut Context,
    options: Flags,
    addrs: Option<&[Address]>,
    ktypes: Option<&[Enctype]>,
    ptypes: Option<&[PaType]>,
    client: &Principal,
    server: &Principal,
    times: TicketTimes,
    key_source: &dyn KeySource,
    prompter: Option<&dyn Prompter>,
    preauth: &PreauthContext,
    ccache: Option<&mut dyn CredentialCache>,
    transport: &mut dyn Transport,
) -> anyhow::Result<(Credential, KdcReply)> {
    if !client.realm_compare(server) {
        Err(Error::RealmMismatch)?
    }

    // Per the referrals draft, enterprise principals imply canonicalization.
    let canon_flag = options & KdcRequest::KDC_OPT_CANONICALIZE != 0
        || client.name_type == NameType::ENTERPRISE_PRINCIPAL;

    let mut request = KdcRequest::new(client.to_owned());
    request.kdc_options = options;
    request.addresses = request_addresses(context, &client.realm, addrs)?;
    request.from = times.starttime;
    request.till = times.endtime;
    request.rtime = times.renew_till;
    request.ktypes = order_enctypes(ktypes);
    if request.ktypes.is_empty() {
        Err(Error::EtypeNosupp)?
    }
    request.server = Some(server.to_owned());

    let mut preauth_to_use = ptypes.map(make_preauth_list).unwrap_or_default();

    let is_tgt_req = server.is_tgt_for_realm(&client.realm);

    let fast_state = FastState::new();
    let mut salt: Option<Vec<u8>> = None;
    let mut s2kparams: Option<Vec<u8>> = None;
    let mut etype = Enctype::NULL;
    let mut as_key: Option<Keyblock> = None;
    let mut use_master = false;
    let mut referral_count = 0;
    let mut loopcount = 0;

    let (time_now, mut as_reply) = loop {
        if loopcount >= MAX_IN_TKT_LOOPS {
            Err(Error::GetInTktLoop)?
        }
        loopcount += 1;

        let padata = {
            let preq = PreauthRequest {
                request: &request,
                encoded_request_body: None,
                encoded_previous_request: None,
                prompter,
                key_source,
                fast_state: &fast_state,
            };
            let mut state = PreauthState {
                salt: &mut salt,
                s2kparams: &mut s2kparams,
                etype: &mut etype,
                as_key: &mut as_key,
            };
            preauth.obtain(context, &preq, &preauth_to_use, &mut state)?
        };
        request.padata = padata;
        preauth_to_use.clear();

        request.nonce = gen_nonce(context);
        let packet = context.codec().encode_as_req(&request)?;
        let time_now = context.timeofday();

        let response = send_as_request(
            context,
            transport,
            &packet,
            &request.client.realm,
            &mut use_master,
        )?;

        match response {
            Response::Error(mut err_reply) => {
                if err_reply.error == KrbError::KDC_ERR_PREAUTH_REQUIRED
                    && !err_reply.e_data.is_empty()
                {
                    preauth_to_use = context.codec().decode_padata_sequence(&err_reply.e_data)?;
                    let sort_realm = match &request.server {
                        Some(server) => server.realm.to_owned(),
                        None => request.client.realm.to_owned(),
                    };
                    sort_padata_sequence(context, &sort_realm, &mut preauth_to_use);
                    continue;
                } else if canon_flag && err_reply.error == KrbError::KDC_ERR_WRONG_REALM {
                    referral_count += 1;
                    let referred_realm = err_reply
                        .client
                        .take()
                        .map(|referred| referred.realm)
                        .unwrap_or_default();
                    if referral_count > context.referral_maxhops || referred_realm.is_empty() {
                        Err(Error::WrongRealm)?
                    }
                    // Rewrite the tracked client and the server principal
                    // with the realm from the error reply, atomically.
                    request.client.realm = referred_realm.to_owned();
                    request.server = Some(rewrite_server_realm(server, &referred_realm, is_tgt_req));
                    continue;
                } else {
                    return Err(anyhow::Error::new(Error::KdcReported(err_reply.error))
                        .context(err_reply.to_string()));
                }
            }
            Response::AsRep(reply) => {
                let do_more = {
                    let preq = PreauthRequest {
                        request: &request,
                        encoded_request_body: None,
                        encoded_previous_request: None,
                        prompter,
                        key_source,
                        fast_state: &fast_state,
                    };
                    let mut state = PreauthState {
                        salt: &mut salt,
                        s2kparams: &mut s2kparams,
                        etype: &mut etype,
                        as_key: &mut as_key,
                    };
                    preauth.process_reply(context, &preq, &reply, &mut state)?
                };
                if !do_more {
                    break (time_now, reply);
                }
            }
        }
    };

    let decrypt_key = match &as_key {
        Some(key) => key.to_owned(),
        None => {
            // Salt of the client principal the KDC replied with, which may
            // have been canonicalized; the client itself is checked below in
            // verify_as_reply.
            let salt_bytes = match &salt {
                Some(salt) => salt.to_owned(),
                None => as_reply.client.to_salt(),
            };
            key_source.get_as_key(
                context,
                &as_reply.client,
                as_reply.enc_part.enctype,
                prompter,
                &salt_bytes,
                s2kparams.as_deref(),
            )?
        }
    };

    decrypt_as_reply(context, &mut as_reply, &decrypt_key)?;
    verify_as_reply(context, time_now, &request, &mut as_reply)?;
    let credential = stash_as_reply(
        &as_reply,
        Some(client.to_owned()),
        Some(server.to_owned()),
        ccache,
    )?;

    Ok((credential, as_reply))
}
