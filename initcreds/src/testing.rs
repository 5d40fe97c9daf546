//! Mock collaborators for exercising the negotiation core without a KDC:
//! an index-based codec, a prefix-checking cipher, and a scripted transport.

use crate::{
    context::Profile, Codec, Context, Crypto, EncKdcReplyPart, Enctype, EtypeInfo2, Flags,
    KdcReply, KdcRequest, Keyblock, KrbError, PaData, Principal, Ticket, TicketTimes, Transport,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

// Outer tags of the mock wire format. AS-REP and KRB-ERROR keep their real
// DER application tags so the reply classifier sees authentic bytes.
const TAG_AS_REQ: u8 = 0x6a;
const TAG_AS_REP: u8 = 0x6b;
const TAG_KRB_ERROR: u8 = 0x7e;
const TAG_REQ_BODY: u8 = 0x30;
const TAG_PADATA_SEQ: u8 = 0x31;
const TAG_ENC_PART: u8 = 0x32;
const TAG_ETYPE_INFO2: u8 = 0x33;

#[derive(Default)]
struct Store {
    requests: Vec<KdcRequest>,
    replies: Vec<KdcReply>,
    errors: Vec<KrbError>,
    padata_seqs: Vec<Vec<PaData>>,
    enc_parts: Vec<EncKdcReplyPart>,
    etype_infos: Vec<Vec<EtypeInfo2>>,
}

/// Codec whose "encodings" are two-byte handles into a shared store. Tests
/// keep a clone to decode what the core sent and to fabricate replies.
#[derive(Clone, Default)]
pub struct MockCodec {
    store: Arc<Mutex<Store>>,
}

fn handle(tag: u8, index: usize) -> Vec<u8> {
    vec![tag, index as u8]
}

fn index_of(tag: u8, bytes: &[u8]) -> anyhow::Result<usize> {
    match bytes {
        [t, index] if *t == tag => Ok(*index as usize),
        _ => Err(anyhow::anyhow!("mock codec: unexpected encoding")),
    }
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("mock codec store poisoned")
    }

    pub fn sent_request(&self, bytes: &[u8]) -> KdcRequest {
        let index = index_of(TAG_AS_REQ, bytes).expect("not an encoded AS-REQ");
        self.store().requests[index].clone()
    }

    pub fn stash_as_rep(&self, reply: KdcReply) -> Vec<u8> {
        let mut store = self.store();
        store.replies.push(reply);
        handle(TAG_AS_REP, store.replies.len() - 1)
    }

    pub fn stash_krb_error(&self, error: KrbError) -> Vec<u8> {
        let mut store = self.store();
        store.errors.push(error);
        handle(TAG_KRB_ERROR, store.errors.len() - 1)
    }

    pub fn stash_padata_sequence(&self, padata: Vec<PaData>) -> Vec<u8> {
        let mut store = self.store();
        store.padata_seqs.push(padata);
        handle(TAG_PADATA_SEQ, store.padata_seqs.len() - 1)
    }

    pub fn stash_enc_part(&self, part: EncKdcReplyPart) -> Vec<u8> {
        let mut store = self.store();
        store.enc_parts.push(part);
        handle(TAG_ENC_PART, store.enc_parts.len() - 1)
    }

    pub fn stash_etype_info2(&self, entries: Vec<EtypeInfo2>) -> Vec<u8> {
        let mut store = self.store();
        store.etype_infos.push(entries);
        handle(TAG_ETYPE_INFO2, store.etype_infos.len() - 1)
    }
}

impl Codec for MockCodec {
    fn encode_as_req(&self, request: &KdcRequest) -> anyhow::Result<Vec<u8>> {
        let mut store = self.store();
        store.requests.push(request.clone());
        Ok(handle(TAG_AS_REQ, store.requests.len() - 1))
    }

    fn encode_as_req_body(&self, request: &KdcRequest) -> anyhow::Result<Vec<u8>> {
        let mut store = self.store();
        store.requests.push(request.clone());
        Ok(handle(TAG_REQ_BODY, store.requests.len() - 1))
    }

    fn decode_as_rep(&self, reply: &[u8]) -> anyhow::Result<KdcReply> {
        let index = index_of(TAG_AS_REP, reply)?;
        Ok(self.store().replies[index].clone())
    }

    fn decode_krb_error(&self, reply: &[u8]) -> anyhow::Result<KrbError> {
        let index = index_of(TAG_KRB_ERROR, reply)?;
        Ok(self.store().errors[index].clone())
    }

    fn decode_padata_sequence(&self, data: &[u8]) -> anyhow::Result<Vec<PaData>> {
        let index = index_of(TAG_PADATA_SEQ, data)?;
        Ok(self.store().padata_seqs[index].clone())
    }

    fn decode_enc_as_rep_part(&self, data: &[u8]) -> anyhow::Result<EncKdcReplyPart> {
        let index = index_of(TAG_ENC_PART, data)?;
        Ok(self.store().enc_parts[index].clone())
    }

    fn decode_etype_info2(&self, data: &[u8]) -> anyhow::Result<Vec<EtypeInfo2>> {
        let index = index_of(TAG_ETYPE_INFO2, data)?;
        Ok(self.store().etype_infos[index].clone())
    }
}

/// Cipher stand-in: a ciphertext is the key bytes prefixed to the plaintext,
/// so decryption succeeds exactly when the keys match.
#[derive(Clone, Default)]
pub struct MockCrypto {
    counter: Arc<AtomicU32>,
}

impl MockCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_bytes(passphrase: &[u8], salt: &[u8]) -> Vec<u8> {
        [b"K:" as &[u8], passphrase, b":", salt].concat()
    }

    pub fn encrypt(key: &Keyblock, plaintext: &[u8]) -> Vec<u8> {
        let mut cipher = vec![key.contents.len() as u8];
        cipher.extend_from_slice(&key.contents);
        cipher.extend_from_slice(plaintext);
        cipher
    }
}

impl Crypto for MockCrypto {
    fn string_to_key(
        &self,
        enctype: Enctype,
        passphrase: &[u8],
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> anyhow::Result<Keyblock> {
        let mut contents = Self::key_bytes(passphrase, salt);
        if let Some(params) = s2kparams {
            contents.extend_from_slice(params);
        }
        Ok(Keyblock::new(enctype, contents))
    }

    fn decrypt(
        &self,
        key: &Keyblock,
        _enctype: Enctype,
        ciphertext: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let (len, rest) = ciphertext
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("mock crypto: truncated ciphertext"))?;
        let len = *len as usize;
        if rest.len() < len || rest[..len] != key.contents[..] {
            return Err(anyhow::anyhow!("mock crypto: integrity check failed"));
        }
        Ok(rest[len..].to_vec())
    }

    fn random_bytes(&self, n: usize) -> anyhow::Result<Vec<u8>> {
        let seed = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(seed
            .to_be_bytes()
            .iter()
            .cycle()
            .take(n)
            .copied()
            .collect())
    }
}

/// Transport driven by a queue of reply builders. The last handler is
/// reused once the queue runs dry, so "the KDC always answers X" scripts
/// are a single push.
pub struct ScriptedTransport {
    codec: MockCodec,
    handlers: VecDeque<Box<dyn FnMut(&KdcRequest) -> Vec<u8>>>,
    pub rounds: Vec<(Vec<u8>, bool)>,
}

impl ScriptedTransport {
    pub fn new(codec: &MockCodec) -> Self {
        Self {
            codec: codec.clone(),
            handlers: VecDeque::new(),
            rounds: vec![],
        }
    }

    pub fn push<F>(&mut self, handler: F)
    where
        F: FnMut(&KdcRequest) -> Vec<u8> + 'static,
    {
        self.handlers.push_back(Box::new(handler));
    }
}

impl Transport for ScriptedTransport {
    fn send_to_kdc(
        &mut self,
        _context: &Context,
        request: &[u8],
        realm: &[u8],
        _use_master: &mut bool,
        tcp_only: bool,
    ) -> anyhow::Result<Vec<u8>> {
        let decoded = self.codec.sent_request(request);
        self.rounds.push((realm.to_vec(), tcp_only));
        if self.handlers.len() > 1 {
            let mut handler = self.handlers.pop_front().expect("handler queue");
            Ok(handler(&decoded))
        } else {
            let handler = self
                .handlers
                .front_mut()
                .ok_or_else(|| anyhow::anyhow!("scripted transport exhausted"))?;
            Ok(handler(&decoded))
        }
    }
}

pub fn context_with_profile(ini: &str) -> Context {
    Context::with_profile(
        Profile::from_ini(ini).expect("test profile"),
        Box::new(MockCodec::new()),
        Box::new(MockCrypto::new()),
    )
    .expect("test context")
}

pub fn test_context() -> Context {
    context_with_profile("")
}

/// Context plus handles onto the collaborators it was built with.
pub fn harness(ini: &str) -> (Context, MockCodec, MockCrypto) {
    let codec = MockCodec::new();
    let crypto = MockCrypto::new();
    let context = Context::with_profile(
        Profile::from_ini(ini).expect("test profile"),
        Box::new(codec.clone()),
        Box::new(crypto.clone()),
    )
    .expect("test context");
    (context, codec, crypto)
}

/// Tag-length-value with a short-form length; enough for test tickets.
pub fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 128);
    let mut out = vec![tag, content.len() as u8];
    out.extend_from_slice(content);
    out
}

/// A DER-encoded ticket for `server` with an opaque encrypted part, valid
/// input for `Ticket::decode_from`.
pub fn ticket_der(server: &Principal) -> Vec<u8> {
    let der_int = |value: u8| der_tlv(0x02, &[value]);
    let der_gs = |s: &[u8]| der_tlv(0x1b, s);

    let mut name_string = vec![];
    for component in &server.components {
        name_string.extend(der_gs(component));
    }
    let principal_name = der_tlv(
        0x30,
        &[
            der_tlv(0xa0, &der_int(server.name_type.0 as u8)),
            der_tlv(0xa1, &der_tlv(0x30, &name_string)),
        ]
        .concat(),
    );

    let encrypted_data = der_tlv(
        0x30,
        &[
            der_tlv(0xa0, &der_int(23)),
            der_tlv(0xa1, &der_int(1)),
            der_tlv(0xa2, &der_tlv(0x04, &[0xde, 0xad, 0xbe, 0xef])),
        ]
        .concat(),
    );

    let body = der_tlv(
        0x30,
        &[
            der_tlv(0xa0, &der_int(5)),
            der_tlv(0xa1, &der_gs(&server.realm)),
            der_tlv(0xa2, &principal_name),
            der_tlv(0xa3, &encrypted_data),
        ]
        .concat(),
    );

    der_tlv(0x61, &body)
}

/// An enc-part echoing the request, the shape every well-behaved KDC reply
/// takes in these tests.
pub fn enc_part_for(
    request: &KdcRequest,
    session: Keyblock,
    times: TicketTimes,
    flags: Flags,
) -> EncKdcReplyPart {
    EncKdcReplyPart {
        session,
        nonce: request.nonce,
        flags,
        times,
        server: request.server.clone().expect("request has a server"),
        caddrs: vec![],
        enc_padata: vec![],
    }
}

/// Assembles a full AS-REP for `request`, encrypting `enc_part` under `key`.
pub fn as_rep_for(
    codec: &MockCodec,
    request: &KdcRequest,
    key: &Keyblock,
    enc_part: EncKdcReplyPart,
) -> Vec<u8> {
    let server = request.server.clone().expect("request has a server");
    let plaintext = codec.stash_enc_part(enc_part);
    let ciphertext = MockCrypto::encrypt(key, &plaintext);
    let reply = KdcReply {
        msg_type: crate::message::KRB5_AS_REP,
        padata: vec![],
        client: request.client.clone(),
        ticket: Ticket {
            server: server.clone(),
            enc_part: crate::EncData {
                enctype: key.enctype,
                kvno: Some(1),
                ciphertext: ciphertext.clone(),
            },
        },
        ticket_bytes: ticket_der(&server),
        enc_part: crate::EncData {
            enctype: key.enctype,
            kvno: None,
            ciphertext,
        },
        enc_part2: None,
    };
    codec.stash_as_rep(reply)
}

/// A KRB-ERROR skeleton from the realm's TGS.
pub fn krb_error(realm: &[u8], error: crate::ErrorCode) -> KrbError {
    KrbError {
        ctime: 0,
        cusec: 0,
        stime: 1_234_567,
        susec: 0,
        error,
        client: None,
        server: Principal::tgs_for_realm(realm),
        text: vec![],
        e_data: vec![],
    }
}
