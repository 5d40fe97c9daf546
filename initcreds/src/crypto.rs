mod enctype;

pub use self::enctype::Enctype;

use rand::Rng;
use zeroize::Zeroize;

#[derive(Clone)]
pub struct Keyblock {
    pub enctype: Enctype,
    pub contents: Vec<u8>,
}

impl Keyblock {
    pub fn new(enctype: Enctype, contents: Vec<u8>) -> Self {
        Self { enctype, contents }
    }
}

impl Zeroize for Keyblock {
    fn zeroize(&mut self) {
        self.contents.zeroize();
    }
}

// Key material must not survive release of the block.
impl Drop for Keyblock {
    fn drop(&mut self) {
        self.contents.zeroize();
    }
}

impl std::fmt::Debug for Keyblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyblock")
            .field("enctype", &self.enctype)
            .field("length", &self.contents.len())
            .finish()
    }
}

/// Symmetric primitives consumed by the negotiation core. Enctype-specific
/// key derivation and decryption live behind this seam.
pub trait Crypto {
    fn string_to_key(
        &self,
        enctype: Enctype,
        passphrase: &[u8],
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> anyhow::Result<Keyblock>;

    fn decrypt(
        &self,
        key: &Keyblock,
        enctype: Enctype,
        ciphertext: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    fn random_bytes(&self, n: usize) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        rand::thread_rng()
            .try_fill(&mut buf[..])
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(buf)
    }
}
