use crate::{Context, Enctype, Keyblock, Principal};
use zeroize::Zeroizing;

#[derive(Debug)]
pub struct Prompt {
    pub prompt: String,
    pub hidden: bool,
    pub reply: Zeroizing<Vec<u8>>,
}

impl Prompt {
    pub fn new(prompt: &str, hidden: bool) -> Self {
        Self {
            prompt: prompt.to_owned(),
            hidden,
            reply: Zeroizing::new(vec![]),
        }
    }
}

/// User interaction callback. Invoked synchronously from the pre-auth
/// dispatcher; it must not re-enter the negotiation context it serves.
pub trait Prompter {
    fn prompt(&self, banner: Option<&str>, prompts: &mut [Prompt]) -> anyhow::Result<()>;
}

/// Source of the client's long-term AS key.
pub trait KeySource {
    fn get_as_key(
        &self,
        context: &Context,
        client: &Principal,
        enctype: Enctype,
        prompter: Option<&dyn Prompter>,
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> anyhow::Result<Keyblock>;

    /// Whether a failed reply decrypt warrants fetching a fresh key and
    /// decrypting once more. Sources keying from single-use data answer
    /// false to suppress the second attempt.
    fn retry_on_decrypt_failure(&self) -> bool {
        true
    }
}

/// Derives the AS key from a passphrase with string-to-key, prompting for
/// the passphrase when constructed without one.
pub struct PasswordKeySource {
    password: Zeroizing<Vec<u8>>,
}

impl PasswordKeySource {
    pub fn new(password: &[u8]) -> Self {
        Self {
            password: Zeroizing::new(password.to_owned()),
        }
    }

    pub fn prompt_only() -> Self {
        Self {
            password: Zeroizing::new(vec![]),
        }
    }
}

impl KeySource for PasswordKeySource {
    fn get_as_key(
        &self,
        context: &Context,
        client: &Principal,
        enctype: Enctype,
        prompter: Option<&dyn Prompter>,
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> anyhow::Result<Keyblock> {
        if !self.password.is_empty() {
            return context
                .crypto()
                .string_to_key(enctype, &self.password, salt, s2kparams);
        }

        let prompter =
            prompter.ok_or_else(|| anyhow::anyhow!("no prompter to ask for a password"))?;
        let mut prompts = [Prompt::new(
            &format!("Password for {}", client.unparse_name()?),
            true,
        )];
        prompter.prompt(None, &mut prompts)?;
        context
            .crypto()
            .string_to_key(enctype, &prompts[0].reply, salt, s2kparams)
    }
}
