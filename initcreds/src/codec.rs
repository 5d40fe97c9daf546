use crate::{EncKdcReplyPart, EtypeInfo2, KdcReply, KdcRequest, KrbError, PaData};

/// Typed ASN.1 boundary. The negotiation core never touches DER itself
/// beyond the outer tag byte used for reply classification; encoding and
/// decoding of whole protocol messages is delegated here.
pub trait Codec {
    fn encode_as_req(&self, request: &KdcRequest) -> anyhow::Result<Vec<u8>>;

    /// The KDC-REQ-BODY alone, as bound into checksums by pre-authentication
    /// mechanisms and FAST.
    fn encode_as_req_body(&self, request: &KdcRequest) -> anyhow::Result<Vec<u8>>;

    fn decode_as_rep(&self, reply: &[u8]) -> anyhow::Result<KdcReply>;

    fn decode_krb_error(&self, reply: &[u8]) -> anyhow::Result<KrbError>;

    fn decode_padata_sequence(&self, data: &[u8]) -> anyhow::Result<Vec<PaData>>;

    fn decode_enc_as_rep_part(&self, data: &[u8]) -> anyhow::Result<EncKdcReplyPart>;

    fn decode_etype_info2(&self, data: &[u8]) -> anyhow::Result<Vec<EtypeInfo2>>;
}
