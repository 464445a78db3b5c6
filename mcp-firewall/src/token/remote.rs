//! Encrypted remote token store backed by a Redis-compatible KV service.
//!
//! Records are serialized to JSON and sealed with AES-256-GCM before leaving
//! the process; the stored value is `nonce ‖ ciphertext ‖ tag`. The cipher
//! key is derived once from the deployment's key material with
//! PBKDF2-HMAC-SHA256. TTL is enforced natively by the KV service.

use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Context as _;
use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::Sha256;
use url::Url;
use zeroize::Zeroize as _;

use crate::error::FirewallError;
use crate::token::TokenRecord;
use crate::token::store::TokenStore;

/// Every store I/O is bounded by this deadline.
const STORE_IO_DEADLINE: Duration = Duration::from_secs(2);

const KDF_ITERATIONS: u32 = 150_000;
const KDF_SALT: &[u8; 16] = b"mcp-firewall/kdf";

const NONCE_LEN: usize = 12;

const KEY_PREFIX: &str = "fw:token:";

struct RecordCipher {
    cipher: Aes256Gcm,
}

impl RecordCipher {
    fn new(key_material: &[u8]) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(key_material, KDF_SALT, KDF_ITERATIONS, &mut key);

        let cipher = Aes256Gcm::new_from_slice(&key).expect("derived key is exactly 32 bytes");
        key.zeroize();

        Self { cipher }
    }

    fn seal(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| anyhow::anyhow!("AEAD encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Tag verification failure is a hard error: the stored value was
    /// tampered with or sealed under a different key.
    fn open(&self, blob: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(blob.len() > NONCE_LEN, "stored value shorter than a nonce");

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow::anyhow!("AEAD tag verification failed"))
    }
}

pub struct RemoteTokenStore {
    manager: ConnectionManager,
    cipher: RecordCipher,
    ttl_secs: u64,
}

impl RemoteTokenStore {
    pub async fn connect(url: &Url, key_material: &[u8], ttl: time::Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url.as_str()).context("invalid remote store URL")?;

        let manager = tokio::time::timeout(STORE_IO_DEADLINE, client.get_connection_manager())
            .await
            .context("remote store connection deadline exceeded")?
            .context("failed to connect to the remote store")?;

        Ok(Self {
            manager,
            cipher: RecordCipher::new(key_material),
            ttl_secs: u64::try_from(ttl.whole_seconds().max(1)).expect("positive TTL"),
        })
    }

    fn key(handle: &str) -> String {
        format!("{KEY_PREFIX}{handle}")
    }
}

async fn deadline<T>(
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, FirewallError> {
    match tokio::time::timeout(STORE_IO_DEADLINE, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(FirewallError::BackendUnavailable(
            anyhow::Error::new(error).context("remote store command failed"),
        )),
        Err(_) => Err(FirewallError::BackendUnavailable(anyhow::anyhow!(
            "remote store deadline exceeded"
        ))),
    }
}

#[async_trait]
impl TokenStore for RemoteTokenStore {
    async fn put(&self, record: TokenRecord) -> Result<(), FirewallError> {
        let plaintext = serde_json::to_vec(&record)
            .map_err(|error| FirewallError::BackendUnavailable(anyhow::Error::new(error)))?;

        let blob = self
            .cipher
            .seal(&plaintext)
            .map_err(FirewallError::BackendUnavailable)?;

        let mut manager = self.manager.clone();
        deadline(manager.set_ex::<_, _, ()>(Self::key(&record.handle), blob, self.ttl_secs)).await
    }

    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>, FirewallError> {
        let mut manager = self.manager.clone();
        let blob: Option<Vec<u8>> = deadline(manager.get(Self::key(handle))).await?;

        let Some(blob) = blob else {
            return Ok(None);
        };

        let plaintext = self.cipher.open(&blob).map_err(FirewallError::BackendUnavailable)?;

        let record: TokenRecord = serde_json::from_slice(&plaintext)
            .map_err(|error| FirewallError::BackendUnavailable(anyhow::Error::new(error)))?;

        Ok(Some(record))
    }

    async fn extend_ttl(&self, handle: &str) -> Result<(), FirewallError> {
        let mut manager = self.manager.clone();
        let ttl = i64::try_from(self.ttl_secs).expect("TTL fits in i64");
        deadline(manager.expire::<_, ()>(Self::key(handle), ttl)).await
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}
