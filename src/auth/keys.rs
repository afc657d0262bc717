//! Signing key material.
//!
//! The key pair is loaded once at startup from PEM files and shared read-only
//! by every request. `watch` polls the files and swaps in a new pair when they
//! change; a request always works against a single `Arc<KeyPair>` snapshot.

use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    SecretKey,
};
use secrecy::{ExposeSecret, SecretString};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, SystemTime},
};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, error, info, instrument};

use super::error::KeyError;

/// ES256 key pair: the private half signs, the public half verifies.
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    /// Pair a signing key with its verifying key.
    ///
    /// # Errors
    /// Returns `KeyError::Malformed` if the public key does not belong to the private key.
    pub fn new(
        signing: SigningKey,
        verifying: VerifyingKey,
        public_path: &Path,
    ) -> Result<Self, KeyError> {
        let derived = signing.verifying_key().to_encoded_point(true);
        if derived.as_bytes() != verifying.to_encoded_point(true).as_bytes() {
            return Err(KeyError::Malformed {
                path: public_path.to_path_buf(),
            });
        }
        Ok(Self { signing, verifying })
    }

    /// Build a pair from a signing key alone, deriving the public half.
    #[must_use]
    pub fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = VerifyingKey::from(&signing);
        Self { signing, verifying }
    }

    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }
}

/// Parse a PKCS#8 (`PRIVATE KEY`) or SEC1 (`EC PRIVATE KEY`) PEM document.
#[must_use]
pub fn parse_private_key(pem: &str) -> Option<SigningKey> {
    if let Ok(key) = SigningKey::from_pkcs8_pem(pem) {
        return Some(key);
    }
    SecretKey::from_sec1_pem(pem).ok().map(SigningKey::from)
}

/// Parse an SPKI (`PUBLIC KEY`) PEM document.
#[must_use]
pub fn parse_public_key(pem: &str) -> Option<VerifyingKey> {
    VerifyingKey::from_public_key_pem(pem).ok()
}

async fn read_pem(path: &Path, deadline: Duration) -> Result<SecretString, KeyError> {
    let contents = timeout(deadline, tokio::fs::read_to_string(path))
        .await
        .map_err(|_| KeyError::Timeout {
            path: path.to_path_buf(),
        })?
        .map_err(|source| KeyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(SecretString::from(contents))
}

/// Load the verification key from a PEM file.
///
/// # Errors
/// Returns an error if the file cannot be read within `deadline` or is not a P-256 public key.
#[instrument]
pub async fn load_public_key(path: &Path, deadline: Duration) -> Result<VerifyingKey, KeyError> {
    let pem = read_pem(path, deadline).await?;
    parse_public_key(pem.expose_secret()).ok_or_else(|| KeyError::Malformed {
        path: path.to_path_buf(),
    })
}

/// Load the signing key from a PEM file.
///
/// # Errors
/// Returns an error if the file cannot be read within `deadline` or is not a P-256 private key.
#[instrument]
pub async fn load_private_key(path: &Path, deadline: Duration) -> Result<SigningKey, KeyError> {
    let pem = read_pem(path, deadline).await?;
    parse_private_key(pem.expose_secret()).ok_or_else(|| KeyError::Malformed {
        path: path.to_path_buf(),
    })
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Owns the active key pair and knows where to reload it from.
pub struct KeyProvider {
    private_path: PathBuf,
    public_path: PathBuf,
    deadline: Duration,
    current: RwLock<Arc<KeyPair>>,
    stamps: Mutex<(Option<SystemTime>, Option<SystemTime>)>,
}

impl KeyProvider {
    /// Load both halves of the key pair.
    ///
    /// # Errors
    /// Missing, unreadable, malformed or mismatched keys are fatal configuration errors.
    pub async fn load(
        private_path: impl Into<PathBuf>,
        public_path: impl Into<PathBuf>,
        deadline: Duration,
    ) -> Result<Self, KeyError> {
        let private_path = private_path.into();
        let public_path = public_path.into();

        let pair = Self::read_pair(&private_path, &public_path, deadline).await?;
        let stamps = (modified(&private_path).await, modified(&public_path).await);

        info!(
            "Loaded signing keys from {} and {}",
            private_path.display(),
            public_path.display()
        );

        Ok(Self {
            private_path,
            public_path,
            deadline,
            current: RwLock::new(Arc::new(pair)),
            stamps: Mutex::new(stamps),
        })
    }

    /// Wrap an already constructed pair; `reload` and `watch` are no-ops for it.
    #[must_use]
    pub fn from_pair(pair: KeyPair) -> Self {
        Self {
            private_path: PathBuf::new(),
            public_path: PathBuf::new(),
            deadline: Duration::ZERO,
            current: RwLock::new(Arc::new(pair)),
            stamps: Mutex::new((None, None)),
        }
    }

    async fn read_pair(
        private_path: &Path,
        public_path: &Path,
        deadline: Duration,
    ) -> Result<KeyPair, KeyError> {
        let signing = load_private_key(private_path, deadline).await?;
        let verifying = load_public_key(public_path, deadline).await?;
        KeyPair::new(signing, verifying, public_path)
    }

    /// Snapshot of the active key pair.
    #[must_use]
    pub fn current(&self) -> Arc<KeyPair> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read both key files and swap them in.
    ///
    /// # Errors
    /// On failure the previous pair stays active and the error is returned.
    pub async fn reload(&self) -> Result<(), KeyError> {
        if self.private_path.as_os_str().is_empty() {
            return Ok(());
        }

        let pair = Self::read_pair(&self.private_path, &self.public_path, self.deadline).await?;
        let stamps = (
            modified(&self.private_path).await,
            modified(&self.public_path).await,
        );

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(pair);
        *self.stamps.lock().unwrap_or_else(PoisonError::into_inner) = stamps;

        info!("Reloaded signing keys");
        Ok(())
    }

    async fn changed(&self) -> bool {
        let latest = (
            modified(&self.private_path).await,
            modified(&self.public_path).await,
        );
        *self.stamps.lock().unwrap_or_else(PoisonError::into_inner) != latest
    }

    /// Poll the key files every `every` and reload when they change.
    pub fn watch(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !provider.changed().await {
                    continue;
                }
                debug!("Key files changed, reloading");
                if let Err(err) = provider.reload().await {
                    error!("Failed to reload signing keys, keeping previous pair: {err}");
                }
            }
        })
    }
}
