use crate::{Credential, Principal};
use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Credential storage. File-backed caches live outside this crate; the
/// negotiation core only ever stores through this trait.
pub trait CredentialCache {
    fn store(&mut self, credential: &Credential) -> anyhow::Result<()>;
}

static MEMORY_CACHES: Lazy<Mutex<HashMap<String, Arc<Mutex<MemoryCache>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide `MEMORY:` cache. Caches of the same name resolve to the
/// same storage for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    name: String,
    principal: Option<Principal>,
    credentials: Vec<Credential>,
}

impl MemoryCache {
    pub fn resolve(name: &str) -> anyhow::Result<Arc<Mutex<Self>>> {
        let mut caches = MEMORY_CACHES.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let cache = caches.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(MemoryCache {
                name: name.to_owned(),
                principal: None,
                credentials: vec![],
            }))
        });
        Ok(Arc::clone(cache))
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn initialize(&mut self, principal: Principal) {
        self.principal = Some(principal);
        self.credentials.clear();
    }

    pub fn get_principal(&self) -> anyhow::Result<Principal> {
        match &self.principal {
            Some(principal) => Ok(principal.to_owned()),
            None => Err(anyhow::anyhow!("credential cache has no principal")),
        }
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }
}

impl CredentialCache for MemoryCache {
    fn store(&mut self, credential: &Credential) -> anyhow::Result<()> {
        if self.principal.is_none() {
            self.principal = Some(credential.client.to_owned());
        }
        self.credentials.push(credential.to_owned());
        Ok(())
    }
}
