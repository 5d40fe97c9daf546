use crate::Context;

/// KDC transport. Locating a KDC of the realm, UDP/TCP selection, retries
/// and timeouts all live behind this seam; the negotiation core only asks
/// for one request/reply round.
pub trait Transport {
    /// Sends an encoded request to a KDC of `realm` and returns the raw
    /// reply. `use_master` may be flipped on by the transport when it had to
    /// fall back to the master KDC; `tcp_only` forces TCP from the start.
    fn send_to_kdc(
        &mut self,
        context: &Context,
        request: &[u8],
        realm: &[u8],
        use_master: &mut bool,
        tcp_only: bool,
    ) -> anyhow::Result<Vec<u8>>;
}
