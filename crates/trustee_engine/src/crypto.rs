//! The decommitment accumulator and the lock that makes it single-user.

use std::fmt::Write as _;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Stateful accumulator. Not safe for concurrent use; obtain it through [`CryptoEngine::acquire`].
pub trait Cryptosystem: Send {
    fn add(&mut self, decommitment: &str);
    fn compute_bundle(&mut self) -> String;
}

pub trait CryptosystemFactory: Send + Sync {
    fn create(&self, decommitment_key: &str) -> Box<dyn Cryptosystem>;
}

/// Chains SHA-256 over the key and every added decommitment, length-prefixed.
pub struct DigestCryptosystem {
    hasher: Sha256,
}

impl DigestCryptosystem {
    pub fn new(decommitment_key: &str) -> Self {
        let mut hasher = Sha256::new();
        update_framed(&mut hasher, decommitment_key);
        Self { hasher }
    }
}

fn update_framed(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

impl Cryptosystem for DigestCryptosystem {
    fn add(&mut self, decommitment: &str) {
        update_framed(&mut self.hasher, decommitment);
    }

    fn compute_bundle(&mut self) -> String {
        let digest = self.hasher.clone().finalize();
        let mut bundle = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(bundle, "{byte:02x}");
        }
        bundle
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DigestFactory;

impl CryptosystemFactory for DigestFactory {
    fn create(&self, decommitment_key: &str) -> Box<dyn Cryptosystem> {
        Box::new(DigestCryptosystem::new(decommitment_key))
    }
}

/// Process-wide capability for the accumulator. At most one [`CryptoSession`] exists at a time.
#[derive(Clone)]
pub struct CryptoEngine {
    factory: Arc<Mutex<Box<dyn CryptosystemFactory>>>,
}

impl CryptoEngine {
    pub fn new(factory: impl CryptosystemFactory + 'static) -> Self {
        Self {
            factory: Arc::new(Mutex::new(Box::new(factory))),
        }
    }

    /// Waits until no other session is open, then starts a fresh accumulator.
    pub async fn acquire(&self, decommitment_key: &str) -> CryptoSession {
        let guard = self.factory.clone().lock_owned().await;
        let accumulator = guard.create(decommitment_key);
        CryptoSession {
            accumulator,
            _guard: guard,
        }
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new(DigestFactory)
    }
}

pub struct CryptoSession {
    accumulator: Box<dyn Cryptosystem>,
    _guard: OwnedMutexGuard<Box<dyn CryptosystemFactory>>,
}

impl Cryptosystem for CryptoSession {
    fn add(&mut self, decommitment: &str) {
        self.accumulator.add(decommitment);
    }

    fn compute_bundle(&mut self) -> String {
        self.accumulator.compute_bundle()
    }
}
