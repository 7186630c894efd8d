//! Out-of-band share transfer between devices.
//!
//! A new device publishes a request carrying a fresh encryption public key
//! at a rendezvous record both sides can address (derived from the service
//! provider's postbox key). An existing device that already holds shares
//! lists open requests, picks one, and answers it by encrypting one of its
//! share stores to the request's key. The requester polls until the answer
//! arrives, decrypts it and reconciles the share against the latest
//! generation. The storage layer sees only ciphertext.

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use async_trait::async_trait;

use crate::constants::SHARE_TRANSFER_DOMAIN;
use crate::curve;
use crate::ecies::{self, EncryptedMessage};
use crate::error::{Error, Result};
use crate::orchestrator::{Module, ThresholdKey};
use crate::sss::ShareStore;

/// One pending transfer request, keyed in the store by the hex form of
/// `enc_pub_key`. `encrypted_share` is empty until a holder approves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRequest {
    #[serde(with = "curve::serde_point")]
    pub enc_pub_key: ProjectivePoint,
    pub encrypted_share: Option<EncryptedMessage>,
    /// Index hexes the requester claims to already hold, so an approver
    /// can pick a share the requester is missing.
    pub available_share_indexes: Vec<String>,
    pub user_agent: String,
    pub timestamp: u64,
}

/// Rendezvous record holding all open requests. Carries its own nonce and
/// follows the same optimistic-concurrency rule as metadata: a write at a
/// non-increasing nonce loses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareTransferStore {
    pub nonce: u64,
    pub requests: HashMap<String, ShareRequest>,
}

/// Pointer recorded in metadata's general store so the transfer location
/// is auditable from the key's own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareTransferStorePointer {
    pub address: String,
}

/// Both sides can compute the rendezvous address before either holds any
/// metadata: it hangs off the shared service provider's postbox key.
fn transfer_address(api: &ThresholdKey) -> String {
    format!(
        "{}:{}",
        SHARE_TRANSFER_DOMAIN,
        curve::point_to_hex(&api.provider().postbox_pub_key())
    )
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Share transfer, packaged as a pluggable module.
///
/// Holds the requester-side ephemeral decryption key between
/// [`ShareTransferModule::request_new_share`] and the matching status
/// check; everything else is stateless over the rendezvous record.
pub struct ShareTransferModule {
    poll_interval: Duration,
    enc_key: Mutex<Option<Scalar>>,
}

impl Default for ShareTransferModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareTransferModule {
    pub fn new() -> Self {
        ShareTransferModule {
            poll_interval: Duration::from_secs(1),
            enc_key: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        ShareTransferModule {
            poll_interval,
            enc_key: Mutex::new(None),
        }
    }

    async fn load_store(&self, api: &ThresholdKey) -> Result<ShareTransferStore> {
        match api.storage().get(&transfer_address(api)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ShareTransferStore::default()),
        }
    }

    async fn save_store(&self, api: &ThresholdKey, mut store: ShareTransferStore) -> Result<()> {
        store.nonce += 1;
        api.storage()
            .set(
                &transfer_address(api),
                serde_json::to_vec(&store)?,
                store.nonce,
            )
            .await
    }

    /// Requester side: publishes a new request and returns its key (the
    /// hex encryption public key), which both sides use to refer to it.
    pub async fn request_new_share(
        &self,
        api: &ThresholdKey,
        user_agent: &str,
        available_share_indexes: &[Scalar],
    ) -> Result<String> {
        let enc_key = curve::random_scalar();
        let enc_pub_key = curve::pub_key_point(&enc_key);
        let enc_pub_key_hex = curve::point_to_hex(&enc_pub_key);

        let mut store = self.load_store(api).await?;
        store.requests.insert(
            enc_pub_key_hex.clone(),
            ShareRequest {
                enc_pub_key,
                encrypted_share: None,
                available_share_indexes: available_share_indexes
                    .iter()
                    .map(curve::scalar_to_hex)
                    .collect(),
                user_agent: user_agent.to_string(),
                timestamp: now_secs(),
            },
        );
        self.save_store(api, store).await?;

        *self
            .enc_key
            .lock()
            .map_err(|_| Error::Storage("transfer key lock poisoned".to_string()))? =
            Some(enc_key);
        info!(request = %enc_pub_key_hex, "published share transfer request");
        Ok(enc_pub_key_hex)
    }

    /// Holder side: lists open (not yet approved) request keys.
    pub async fn look_for_requests(&self, api: &ThresholdKey) -> Result<Vec<String>> {
        let store = self.load_store(api).await?;
        let mut open: Vec<String> = store
            .requests
            .iter()
            .filter(|(_, r)| r.encrypted_share.is_none())
            .map(|(k, _)| k.clone())
            .collect();
        open.sort();
        Ok(open)
    }

    /// Holder side: answers a request with the holder's share at
    /// `share_index` under the latest generation.
    pub async fn approve_request_with_share_index(
        &self,
        api: &ThresholdKey,
        enc_pub_key_hex: &str,
        share_index: &Scalar,
    ) -> Result<()> {
        let share_store = api.output_share_store(share_index)?;
        self.approve_request(api, enc_pub_key_hex, &share_store)
            .await
    }

    /// Holder side: answers a request with an explicit share store.
    pub async fn approve_request(
        &self,
        api: &ThresholdKey,
        enc_pub_key_hex: &str,
        share_store: &ShareStore,
    ) -> Result<()> {
        let mut store = self.load_store(api).await?;
        let request = store
            .requests
            .get_mut(enc_pub_key_hex)
            .ok_or(Error::ShareNotFound)?;
        let to = curve::point_from_hex(enc_pub_key_hex)?;
        request.encrypted_share = Some(ecies::encrypt(&to, &share_store.to_bytes()?)?);
        self.save_store(api, store).await?;
        info!(request = %enc_pub_key_hex, "approved share transfer request");
        Ok(())
    }

    /// Requester side: one poll. On approval, decrypts the delivered
    /// share, reconciles it to the latest generation, registers it
    /// locally, and removes the spent request from the rendezvous record.
    pub async fn request_status_check(
        &self,
        api: &mut ThresholdKey,
        enc_pub_key_hex: &str,
    ) -> Result<Option<ShareStore>> {
        let mut store = self.load_store(api).await?;
        let request = store
            .requests
            .get(enc_pub_key_hex)
            .ok_or(Error::ShareNotFound)?;
        let Some(message) = request.encrypted_share.clone() else {
            return Ok(None);
        };

        let enc_key = self
            .enc_key
            .lock()
            .map_err(|_| Error::Storage("transfer key lock poisoned".to_string()))?
            .take()
            .ok_or(Error::InvalidState("no transfer request pending here"))?;
        let delivered = ShareStore::from_bytes(&ecies::decrypt(&enc_key, &message)?)?;

        // Catch-up also verifies the share against its committed public
        // share before we accept it.
        let latest = api.catchup_to_latest_share(delivered).await?;
        api.input_share_store(latest.clone());

        store.requests.remove(enc_pub_key_hex);
        self.save_store(api, store).await?;
        debug!(request = %enc_pub_key_hex, "share transfer completed");
        Ok(Some(latest))
    }

    /// Requester side: polls until the request is approved.
    pub async fn await_share(
        &self,
        api: &mut ThresholdKey,
        enc_pub_key_hex: &str,
    ) -> Result<ShareStore> {
        loop {
            if let Some(share_store) = self.request_status_check(api, enc_pub_key_hex).await? {
                return Ok(share_store);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Withdraws a request (either side may clean up).
    pub async fn cancel_request(&self, api: &ThresholdKey, enc_pub_key_hex: &str) -> Result<()> {
        let mut store = self.load_store(api).await?;
        if store.requests.remove(enc_pub_key_hex).is_none() {
            return Err(Error::ShareNotFound);
        }
        self.save_store(api, store).await?;
        if let Ok(mut guard) = self.enc_key.lock() {
            *guard = None;
        }
        Ok(())
    }

    /// Drops every request, spent or open.
    pub async fn reset_share_transfer_store(&self, api: &ThresholdKey) -> Result<()> {
        let mut store = self.load_store(api).await?;
        store.requests.clear();
        self.save_store(api, store).await
    }
}

#[async_trait]
impl Module for ShareTransferModule {
    fn name(&self) -> &str {
        SHARE_TRANSFER_DOMAIN
    }

    fn bind(&self, _api: &mut ThresholdKey) {}

    /// Records the rendezvous address in metadata's general store so the
    /// transfer location is visible from the key's own state.
    async fn initialize(&self, api: &mut ThresholdKey) -> Result<()> {
        if api
            .metadata()?
            .get_general_store_domain(SHARE_TRANSFER_DOMAIN)
            .is_some()
        {
            return Ok(());
        }
        let pointer = ShareTransferStorePointer {
            address: transfer_address(api),
        };
        api.set_general_store(SHARE_TRANSFER_DOMAIN, serde_json::to_value(&pointer)?)
            .await
    }
}
