use k256::{ProjectivePoint, Scalar};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use async_trait::async_trait;

use crate::constants::{
    DEFAULT_SHARE_COUNT, DEFAULT_THRESHOLD, METADATA_PREFIX, PROVIDER_SHARE_PREFIX,
};
use crate::curve;
use crate::ecies::{self, EncryptedMessage};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::provider::ServiceProvider;
use crate::sss::{self, Polynomial, PolynomialId, Share, ShareStore};
use crate::storage::StorageLayer;

/// Held shares of one generation, keyed by canonical index hex.
pub type ShareStoreMap = HashMap<String, ShareStore>;

/// Refresh hook: receives the module's general-store domain value plus the
/// superseded and replacement share maps, returns the new domain value.
/// Lets a module re-anchor its own secrets against the new share set.
pub type RefreshMiddleware =
    Box<dyn Fn(Option<Value>, &ShareStoreMap, &ShareStoreMap) -> Result<Option<Value>> + Send + Sync>;

/// Reconstruct hook: recovers a module's auxiliary secrets once the primary
/// key is available.
pub type ReconstructKeyMiddleware =
    Box<dyn Fn(&Metadata, &Scalar) -> Result<Vec<Scalar>> + Send + Sync>;

/// Converts a bare share scalar to and from an opaque external
/// representation (e.g. a mnemonic form).
pub struct ShareSerializationMiddleware {
    pub serialize: Box<dyn Fn(&Scalar, &str) -> Result<Value> + Send + Sync>,
    pub deserialize: Box<dyn Fn(&Value, &str) -> Result<Scalar> + Send + Sync>,
}

/// Contract for pluggable modules. The orchestrator never branches on a
/// module's identity: registration lets the module bind whatever middleware
/// it needs, and `initialize` runs after the key itself is set up.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at registration; the module installs its middleware here.
    fn bind(&self, api: &mut ThresholdKey);

    /// Called at the end of [`ThresholdKey::initialize`].
    async fn initialize(&self, api: &mut ThresholdKey) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InitializeParams {
    /// A share this device already holds, if any.
    pub input: Option<ShareStore>,
    /// Import an externally generated private key instead of sampling one.
    pub import_key: Option<Scalar>,
    /// Fail with `ExistingKeyNotFound` instead of creating a fresh key.
    pub never_initialize_new_key: bool,
}

#[derive(Debug)]
pub struct KeyDetails {
    pub pub_key: ProjectivePoint,
    pub threshold: usize,
    pub total_shares: usize,
    /// Shares still missing before the key can be reconstructed here.
    pub required_shares: usize,
    pub share_descriptions: HashMap<String, Vec<String>>,
}

pub struct InitializeNewKeyResult {
    pub priv_key: Scalar,
    pub device_share: ShareStore,
    pub backup_share: ShareStore,
}

pub struct ReconstructedKey {
    pub priv_key: Scalar,
    /// Auxiliary secrets recovered by reconstruct middleware.
    pub aux_keys: Vec<Scalar>,
}

impl ReconstructedKey {
    pub fn all_keys(&self) -> Vec<Scalar> {
        let mut keys = vec![self.priv_key];
        keys.extend_from_slice(&self.aux_keys);
        keys
    }
}

pub struct GenerateNewShareResult {
    pub new_share_store: ShareStore,
    pub new_share_index: Scalar,
}

pub struct RefreshSharesResult {
    pub share_stores: ShareStoreMap,
}

/// The stateful engine driving a threshold key through its lifecycle:
/// uninitialized, initialized (public state plus at least one local share),
/// and key-available (private key reconstructed in memory).
///
/// One instance is a single sequential writer; cross-device concurrency is
/// resolved by the storage layer's nonce check, never by locking. Raw share
/// scalars live only in the in-memory share map — metadata and storage see
/// commitments and ciphertexts exclusively.
pub struct ThresholdKey {
    storage: Arc<dyn StorageLayer>,
    provider: Arc<dyn ServiceProvider>,
    metadata: Option<Metadata>,
    shares: HashMap<PolynomialId, ShareStoreMap>,
    priv_key: Option<Scalar>,
    modules: Vec<Arc<dyn Module>>,
    refresh_middleware: Vec<(String, RefreshMiddleware)>,
    reconstruct_key_middleware: Vec<(String, ReconstructKeyMiddleware)>,
    share_serialization_middleware: Option<ShareSerializationMiddleware>,
}

fn metadata_address(pub_key: &ProjectivePoint) -> String {
    format!("{}:{}", METADATA_PREFIX, curve::point_to_hex(pub_key))
}

fn provider_share_address(postbox_pub: &ProjectivePoint) -> String {
    format!("{}:{}", PROVIDER_SHARE_PREFIX, curve::point_to_hex(postbox_pub))
}

/// The combined public key can be read off any share store: the first
/// commitment of its generation is `secret * G`, which refresh never
/// changes.
fn metadata_address_of(store: &ShareStore) -> Result<String> {
    let first = store
        .polynomial_id
        .split('|')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Serialization("empty polynomial id".to_string()))?;
    Ok(format!("{METADATA_PREFIX}:{first}"))
}

impl ThresholdKey {
    pub fn new(storage: Arc<dyn StorageLayer>, provider: Arc<dyn ServiceProvider>) -> Self {
        ThresholdKey {
            storage,
            provider,
            metadata: None,
            shares: HashMap::new(),
            priv_key: None,
            modules: Vec::new(),
            refresh_middleware: Vec::new(),
            reconstruct_key_middleware: Vec::new(),
            share_serialization_middleware: None,
        }
    }

    pub fn metadata(&self) -> Result<&Metadata> {
        self.metadata
            .as_ref()
            .ok_or(Error::InvalidState("orchestrator is not initialized"))
    }

    pub fn pub_key(&self) -> Result<ProjectivePoint> {
        Ok(self.metadata()?.pub_key)
    }

    /// The reconstructed private key, if this instance reached the
    /// key-available state.
    pub fn private_key(&self) -> Result<Scalar> {
        self.priv_key
            .ok_or(Error::InvalidState("private key not reconstructed"))
    }

    pub fn storage(&self) -> &Arc<dyn StorageLayer> {
        &self.storage
    }

    pub fn provider(&self) -> &Arc<dyn ServiceProvider> {
        &self.provider
    }

    // ---- module & middleware registries -------------------------------

    /// Registers a module: binds its middleware now, runs its `initialize`
    /// hook at the end of [`ThresholdKey::initialize`].
    pub fn register_module(&mut self, module: Arc<dyn Module>) {
        module.bind(self);
        self.modules.push(module);
    }

    pub fn add_refresh_middleware(&mut self, module_name: &str, middleware: RefreshMiddleware) {
        self.refresh_middleware
            .push((module_name.to_string(), middleware));
    }

    pub fn add_reconstruct_key_middleware(
        &mut self,
        module_name: &str,
        middleware: ReconstructKeyMiddleware,
    ) {
        self.reconstruct_key_middleware
            .push((module_name.to_string(), middleware));
    }

    pub fn add_share_serialization_middleware(
        &mut self,
        middleware: ShareSerializationMiddleware,
    ) {
        self.share_serialization_middleware = Some(middleware);
    }

    pub fn serialize_share(&self, share: &Scalar, format: &str) -> Result<Value> {
        let mw = self
            .share_serialization_middleware
            .as_ref()
            .ok_or(Error::InvalidState("no share serialization middleware"))?;
        (mw.serialize)(share, format)
    }

    pub fn deserialize_share(&self, value: &Value, format: &str) -> Result<Scalar> {
        let mw = self
            .share_serialization_middleware
            .as_ref()
            .ok_or(Error::InvalidState("no share serialization middleware"))?;
        (mw.deserialize)(value, format)
    }

    // ---- lifecycle ----------------------------------------------------

    /// Brings this device to the initialized state: adopts an existing
    /// share (given directly or recovered from the service provider's
    /// postbox), or creates a brand-new key when nothing exists yet.
    ///
    /// # Arguments
    ///
    /// * `params` - An optional input share, an optional key to import
    ///   into a fresh setup, and the `never_initialize_new_key` switch.
    ///
    /// # Returns
    ///
    /// The key's details after all registered module hooks have run, or
    /// `Error::ExistingKeyNotFound` when no key exists and creation is
    /// disabled.
    pub async fn initialize(&mut self, params: InitializeParams) -> Result<KeyDetails> {
        if let Some(input) = params.input {
            let latest = self.catchup_to_latest_share(input).await?;
            self.input_share_store(latest);
        } else {
            let address = provider_share_address(&self.provider.postbox_pub_key());
            match self.storage.get(&address).await? {
                Some(bytes) => {
                    let message: EncryptedMessage = serde_json::from_slice(&bytes)?;
                    let store = ShareStore::from_bytes(&self.provider.decrypt(&message)?)?;
                    debug!("recovered device share from provider postbox");
                    match self.catchup_to_latest_share(store).await {
                        Ok(latest) => self.input_share_store(latest),
                        // Postbox entry with no metadata behind it: an
                        // earlier key creation never completed. The entry
                        // is dead weight, not an existing key.
                        Err(Error::ExistingKeyNotFound)
                            if !params.never_initialize_new_key =>
                        {
                            self.initialize_new_key(params.import_key, false).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                None if params.never_initialize_new_key => {
                    return Err(Error::ExistingKeyNotFound);
                }
                None => {
                    self.initialize_new_key(params.import_key, false).await?;
                }
            }
        }

        let modules = self.modules.clone();
        for module in modules {
            module.initialize(self).await?;
        }
        self.get_key_details()
    }

    /// Creates a fresh secret (or adopts `user_input`), applies the default
    /// 2-of-2 policy — one device share, one backup share — persists the
    /// initial metadata, and parks an encrypted copy of the device share in
    /// the provider's postbox for future sessions.
    pub async fn initialize_new_key(
        &mut self,
        user_input: Option<Scalar>,
        initialize_modules: bool,
    ) -> Result<InitializeNewKeyResult> {
        if self.metadata.is_some() {
            return Err(Error::InvalidState("key already initialized"));
        }
        let secret = user_input.unwrap_or_else(curve::random_scalar);
        let poly = Polynomial::generate(DEFAULT_THRESHOLD, Some(secret))?;
        let indexes: Vec<Scalar> = (1..=DEFAULT_SHARE_COUNT as u64).map(Scalar::from).collect();
        let shares = poly.shares_at(&indexes);
        let poly_id = poly.public_commitment().polynomial_id();

        let mut metadata = Metadata::new(curve::pub_key_point(&secret));
        metadata.add_from_polynomial_and_shares(&poly, &shares);

        let device_share = ShareStore::new(shares[0].clone(), poly_id.clone());
        let backup_share = ShareStore::new(shares[1].clone(), poly_id);

        // Metadata goes first: if it fails nothing is written and the whole
        // call can simply be retried. The postbox copy is the recoverable
        // side — a leftover entry from an interrupted creation is replaced
        // at the next nonce instead of blocking forever.
        self.persist(metadata).await?;
        let postbox = self.provider.encrypt(&device_share.to_bytes()?)?;
        let postbox_bytes = serde_json::to_vec(&postbox)?;
        let postbox_address = provider_share_address(&self.provider.postbox_pub_key());
        match self
            .storage
            .set(&postbox_address, postbox_bytes.clone(), 1)
            .await
        {
            Ok(()) => {}
            Err(Error::MetadataConflict(stored)) => {
                self.storage
                    .set(&postbox_address, postbox_bytes, stored + 1)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        self.input_share_store(device_share.clone());
        self.priv_key = Some(secret);
        info!(
            pub_key = %curve::point_to_hex(&curve::pub_key_point(&secret)),
            "initialized new threshold key"
        );

        if initialize_modules {
            let modules = self.modules.clone();
            for module in modules {
                module.initialize(self).await?;
            }
        }
        Ok(InitializeNewKeyResult {
            priv_key: secret,
            device_share,
            backup_share,
        })
    }

    /// Reconciles a held share with the newest persisted generation.
    ///
    /// Fetches the latest metadata (addressed by the pub key embedded in
    /// the share's generation) and, while the share belongs to a superseded
    /// polynomial, follows the stored refresh chain: each hop decrypts the
    /// self-addressed replacement share with the scalar already in hand.
    /// A missing link means the index was pruned — the share is dead and
    /// the result is `ShareStale`.
    pub async fn catchup_to_latest_share(&mut self, share_store: ShareStore) -> Result<ShareStore> {
        let address = metadata_address_of(&share_store)?;
        let bytes = self
            .storage
            .get(&address)
            .await?
            .ok_or(Error::ExistingKeyNotFound)?;
        let metadata = Metadata::deserialize(&bytes)?;

        let mut current = share_store;
        // One hop per generation at most; anything more is a broken chain.
        for _ in 0..=metadata.poly_id_list.len() {
            if &current.polynomial_id == metadata.latest_polynomial_id()? {
                self.verify_share_commitment(&metadata, &current)?;
                self.metadata = Some(metadata);
                return Ok(current);
            }
            current = match metadata.encrypted_share(&current) {
                Ok(next) => next,
                Err(Error::EncryptedShareUnavailable(_)) => {
                    return Err(Error::ShareStale(format!(
                        "index {} was pruned by a refresh",
                        curve::scalar_to_hex(&current.share.index)
                    )))
                }
                Err(e) => return Err(e),
            };
        }
        Err(Error::ShareStale("refresh chain does not terminate".to_string()))
    }

    /// Registers a share store into the local share map. No validation —
    /// see [`ThresholdKey::input_share_store_safe`] for the checked variant.
    pub fn input_share_store(&mut self, share_store: ShareStore) {
        self.shares
            .entry(share_store.polynomial_id.clone())
            .or_default()
            .insert(curve::scalar_to_hex(&share_store.share.index), share_store);
    }

    /// Registers a share store after re-validating its commitment against
    /// metadata; rejects with `InvalidShareCommitment` on any mismatch.
    pub fn input_share_store_safe(&mut self, share_store: ShareStore) -> Result<()> {
        let metadata = self.metadata()?;
        self.verify_share_commitment(metadata, &share_store)?;
        self.input_share_store(share_store);
        Ok(())
    }

    fn verify_share_commitment(&self, metadata: &Metadata, store: &ShareStore) -> Result<()> {
        let expected = metadata
            .public_share(&store.polynomial_id, &store.share.index)
            .ok_or(Error::InvalidShareCommitment)?;
        if expected.commitment != store.share.public_share().commitment {
            return Err(Error::InvalidShareCommitment);
        }
        Ok(())
    }

    /// Registers a bare share scalar: identifies its generation and index
    /// by matching commitments, then validates and stores it.
    pub fn input_share(&mut self, share: Scalar) -> Result<()> {
        let store = self.metadata()?.share_to_share_store(share)?;
        self.input_share_store_safe(store)
    }

    /// Hands back the bare scalar of a held share of the latest generation.
    pub fn output_share(&self, share_index: &Scalar) -> Result<Scalar> {
        Ok(self.output_share_store(share_index)?.share.value)
    }

    /// Hands a held share of the latest generation back out.
    pub fn output_share_store(&self, share_index: &Scalar) -> Result<ShareStore> {
        let latest_id = self.metadata()?.latest_polynomial_id()?;
        self.shares
            .get(latest_id)
            .and_then(|m| m.get(&curve::scalar_to_hex(share_index)))
            .cloned()
            .ok_or(Error::ShareNotFound)
    }

    /// Reconstructs the private key from locally held shares, reconciling
    /// every share to the latest generation first. Runs the registered
    /// reconstruct middleware afterwards to recover auxiliary secrets.
    pub async fn reconstruct_key(&mut self) -> Result<ReconstructedKey> {
        self.metadata()?;
        let pool: Vec<ShareStore> = self
            .shares
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();

        let mut reconciled: Vec<ShareStore> = Vec::new();
        for store in pool {
            match self.catchup_to_latest_share(store).await {
                Ok(latest) => {
                    self.input_share_store(latest.clone());
                    reconciled.push(latest);
                }
                // Pruned or deleted shares no longer count toward the
                // threshold; reconstruction proceeds with what remains.
                Err(Error::ShareStale(reason)) => {
                    debug!(%reason, "skipping stale share during reconstruction");
                }
                Err(Error::InvalidShareCommitment) => {
                    debug!("skipping share with no commitment in the latest generation");
                }
                Err(e) => return Err(e),
            }
        }

        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?.clone();
        let threshold = metadata.latest_public_polynomial()?.threshold();
        let shares: Vec<Share> = reconciled
            .iter()
            .filter(|s| s.polynomial_id == latest_id)
            .map(|s| s.share.clone())
            .collect();

        let priv_key = sss::reconstruct(&shares, threshold)?;
        if curve::pub_key_point(&priv_key) != metadata.pub_key {
            return Err(Error::InvalidShareCommitment);
        }
        self.priv_key = Some(priv_key);
        debug!("private key reconstructed");

        let metadata = self.metadata()?;
        let mut aux_keys = Vec::new();
        for (name, middleware) in &self.reconstruct_key_middleware {
            let mut recovered = middleware(metadata, &priv_key)?;
            debug!(module = %name, count = recovered.len(), "reconstruct middleware ran");
            aux_keys.append(&mut recovered);
        }
        Ok(ReconstructedKey { priv_key, aux_keys })
    }

    /// Recovers the full latest polynomial from held shares (plus the
    /// private key, when available, as the point at x = 0).
    pub fn reconstruct_latest_poly(&self) -> Result<Polynomial> {
        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?;
        let threshold = metadata.latest_public_polynomial()?.threshold();

        let mut points: Vec<Share> = Vec::new();
        if let Some(priv_key) = self.priv_key {
            points.push(Share::new(Scalar::ZERO, priv_key));
        }
        if let Some(held) = self.shares.get(latest_id) {
            points.extend(held.values().map(|s| s.share.clone()));
        }
        let poly = sss::interpolate_polynomial(&points, threshold)?;
        if &poly.public_commitment().polynomial_id() != latest_id {
            return Err(Error::InvalidShareCommitment);
        }
        Ok(poly)
    }

    /// Extends the current generation with one previously unused index.
    /// The secret, the public key and all existing commitments are
    /// untouched; only the new index's commitment is added.
    pub async fn generate_new_share(&mut self) -> Result<GenerateNewShareResult> {
        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?.clone();
        let taken = metadata.share_indexes_for(&latest_id)?;

        let mut candidate = taken.len() as u64 + 1;
        while taken.contains(&Scalar::from(candidate)) {
            candidate += 1;
        }
        self.generate_share_at(Scalar::from(candidate)).await
    }

    /// Explicit-index variant of [`ThresholdKey::generate_new_share`].
    pub async fn generate_share_at(&mut self, index: Scalar) -> Result<GenerateNewShareResult> {
        let poly = self.reconstruct_latest_poly()?;
        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?.clone();
        if metadata.public_share(&latest_id, &index).is_some() {
            return Err(Error::DuplicateShareIndex(curve::scalar_to_hex(&index)));
        }

        let share = poly.share_at(&index);
        let mut fork = metadata.clone();
        fork.add_public_share(&latest_id, share.public_share());
        self.persist(fork).await?;

        let store = ShareStore::new(share, latest_id);
        self.input_share_store(store.clone());
        info!(index = %curve::scalar_to_hex(&index), "issued new share");
        Ok(GenerateNewShareResult {
            new_share_store: store,
            new_share_index: index,
        })
    }

    /// Removes one index's commitment from the latest generation and drops
    /// any local copy. Bookkeeping only: the secret is not rotated, later
    /// reconstructions simply have fewer candidate shares.
    pub async fn delete_share(&mut self, share_index: &Scalar) -> Result<()> {
        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?.clone();
        let key = curve::scalar_to_hex(share_index);
        if metadata.public_share(&latest_id, share_index).is_none() {
            return Err(Error::ShareNotFound);
        }

        let mut fork = metadata.clone();
        if let Some(generation) = fork.public_shares.get_mut(&latest_id) {
            generation.remove(&key);
        }
        self.persist(fork).await?;

        if let Some(held) = self.shares.get_mut(&latest_id) {
            held.remove(&key);
        }
        info!(index = %key, "deleted share");
        Ok(())
    }

    /// Security rotation: re-shares the same secret under a brand-new
    /// polynomial with a new threshold and index set.
    ///
    /// The public key is unchanged, so external identity is preserved, but
    /// every index of `previous_poly_id` that does not survive into the new
    /// set loses reconstruction ability — its commitment no longer appears
    /// under the latest polynomial and no refresh-chain entry is written
    /// for it. Surviving indexes get a self-addressed encrypted replacement
    /// so their holders can catch up. Atomic from the caller's view: all
    /// mutation happens on a cloned fork that is discarded if persistence
    /// fails.
    ///
    /// # Arguments
    ///
    /// * `new_threshold` - Threshold of the replacement polynomial.
    /// * `new_share_indexes` - The full replacement index set; must be
    ///   distinct and at least `new_threshold` long.
    /// * `previous_poly_id` - The generation being superseded.
    ///
    /// # Returns
    ///
    /// The freshly issued share stores, keyed by canonical index hex.
    pub async fn refresh_shares(
        &mut self,
        new_threshold: usize,
        new_share_indexes: &[Scalar],
        previous_poly_id: &PolynomialId,
    ) -> Result<RefreshSharesResult> {
        let metadata = self.metadata()?;
        if new_share_indexes.len() < new_threshold {
            return Err(Error::InsufficientShares {
                have: new_share_indexes.len(),
                need: new_threshold,
            });
        }
        for (i, index) in new_share_indexes.iter().enumerate() {
            if new_share_indexes[..i].contains(index) {
                return Err(Error::DuplicateShareIndex(curve::scalar_to_hex(index)));
            }
        }

        let secret = match self.priv_key {
            Some(key) => key,
            None => {
                let held: Vec<Share> = self
                    .shares
                    .get(previous_poly_id)
                    .map(|m| m.values().map(|s| s.share.clone()).collect())
                    .unwrap_or_default();
                let previous_threshold = metadata
                    .public_polynomials
                    .get(previous_poly_id)
                    .ok_or(Error::ShareNotFound)?
                    .threshold();
                sss::reconstruct(&held, previous_threshold)?
            }
        };
        if curve::pub_key_point(&secret) != metadata.pub_key {
            return Err(Error::InvalidShareCommitment);
        }

        let poly = Polynomial::generate(new_threshold, Some(secret))?;
        let new_shares = poly.shares_at(new_share_indexes);
        let new_poly_id = poly.public_commitment().polynomial_id();

        let mut fork = metadata.clone();
        fork.add_from_polynomial_and_shares(&poly, &new_shares);

        let mut new_stores = ShareStoreMap::new();
        for share in &new_shares {
            new_stores.insert(
                curve::scalar_to_hex(&share.index),
                ShareStore::new(share.clone(), new_poly_id.clone()),
            );
        }

        // Refresh chain: every surviving index gets its replacement share
        // encrypted to the old commitment, readable only with the old
        // share scalar. Pruned indexes get nothing and go stale.
        for old_index in fork.share_indexes_for(previous_poly_id)? {
            let key = curve::scalar_to_hex(&old_index);
            let Some(replacement) = new_stores.get(&key) else {
                continue;
            };
            let old_commitment = fork
                .public_share(previous_poly_id, &old_index)
                .ok_or(Error::ShareNotFound)?
                .commitment;
            let message = ecies::encrypt(&old_commitment, &replacement.to_bytes()?)?;
            fork.set_encrypted_share(&curve::point_x_hex(&old_commitment)?, &message)?;
        }

        let old_stores = self
            .shares
            .get(previous_poly_id)
            .cloned()
            .unwrap_or_default();
        for (name, middleware) in &self.refresh_middleware {
            let domain = fork.get_general_store_domain(name).cloned();
            if let Some(updated) = middleware(domain, &old_stores, &new_stores)? {
                fork.set_general_store_domain(name, updated);
            }
            debug!(module = %name, "refresh middleware ran");
        }

        self.persist(fork).await?;
        for store in new_stores.values() {
            self.input_share_store(store.clone());
        }
        info!(
            threshold = new_threshold,
            shares = new_share_indexes.len(),
            "refreshed share set"
        );
        Ok(RefreshSharesResult {
            share_stores: new_stores,
        })
    }

    /// Persists the current metadata with an incremented nonce, after
    /// applying `adjust` to the scoped store.
    pub async fn sync_share_metadata_with(
        &mut self,
        adjust: impl FnOnce(&mut HashMap<String, Value>),
    ) -> Result<()> {
        let mut fork = self.metadata()?.clone();
        adjust(&mut fork.scoped_store);
        self.persist(fork).await
    }

    /// Persists the current metadata with an incremented nonce.
    pub async fn sync_share_metadata(&mut self) -> Result<()> {
        self.sync_share_metadata_with(|_| {}).await
    }

    /// Pushes a metadata fork with nonce + 1; on success the fork becomes
    /// the live metadata, on failure it is dropped and the previously
    /// synced state stays authoritative.
    async fn persist(&mut self, mut fork: Metadata) -> Result<()> {
        fork.nonce += 1;
        let bytes = fork.serialize()?;
        self.storage
            .set(&metadata_address(&fork.pub_key), bytes, fork.nonce)
            .await?;
        debug!(nonce = fork.nonce, "persisted metadata");
        self.metadata = Some(fork);
        Ok(())
    }

    // ---- module-facing conveniences ----------------------------------

    /// Encrypts a payload to the threshold key's public point. Anything
    /// encrypted this way is readable only after reconstruction.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedMessage> {
        ecies::encrypt(&self.pub_key()?, plaintext)
    }

    /// Decrypts a payload encrypted to the threshold key. Requires the
    /// key-available state.
    pub fn decrypt(&self, message: &EncryptedMessage) -> Result<Vec<u8>> {
        ecies::decrypt(&self.private_key()?, message)
    }

    /// Replaces a module's general-store domain and persists.
    pub async fn set_general_store(&mut self, domain: &str, value: Value) -> Result<()> {
        let mut fork = self.metadata()?.clone();
        fork.set_general_store_domain(domain, value);
        self.persist(fork).await
    }

    /// Inserts (or replaces, matching on `"id"`) a typed item under the
    /// module's item-store domain and persists.
    pub async fn set_store_item(&mut self, module_name: &str, item: Value) -> Result<()> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or(Error::InvalidState("store item requires an \"id\" field"))?
            .to_string();
        let mut fork = self.metadata()?.clone();
        let mut items = match fork.get_item_store_domain(module_name) {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        };
        items.retain(|existing| existing.get("id").and_then(Value::as_str) != Some(id.as_str()));
        items.push(item);
        fork.set_item_store_domain(module_name, Value::Array(items));
        self.persist(fork).await
    }

    pub fn store_item(&self, module_name: &str, id: &str) -> Result<Value> {
        self.store_items(module_name)?
            .into_iter()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))
            .ok_or(Error::ShareNotFound)
    }

    pub fn store_items(&self, module_name: &str) -> Result<Vec<Value>> {
        Ok(match self.metadata()?.get_item_store_domain(module_name) {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        })
    }

    pub async fn delete_store_item(&mut self, module_name: &str, id: &str) -> Result<()> {
        let mut fork = self.metadata()?.clone();
        let mut items = match fork.get_item_store_domain(module_name) {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        };
        let before = items.len();
        items.retain(|existing| existing.get("id").and_then(Value::as_str) != Some(id));
        if items.len() == before {
            return Err(Error::ShareNotFound);
        }
        fork.set_item_store_domain(module_name, Value::Array(items));
        self.persist(fork).await
    }

    /// Appends a free-text description for a share index; persists when
    /// `update_metadata` is set.
    pub async fn add_share_description(
        &mut self,
        share_index: &Scalar,
        description: &str,
        update_metadata: bool,
    ) -> Result<()> {
        let mut fork = self.metadata()?.clone();
        fork.add_share_description(share_index, description);
        if update_metadata {
            self.persist(fork).await
        } else {
            self.metadata = Some(fork);
            Ok(())
        }
    }

    pub fn get_key_details(&self) -> Result<KeyDetails> {
        let metadata = self.metadata()?;
        let latest_id = metadata.latest_polynomial_id()?;
        let threshold = metadata.latest_public_polynomial()?.threshold();
        let total_shares = metadata.share_indexes_for(latest_id)?.len();
        let held = self.shares.get(latest_id).map_or(0, ShareStoreMap::len);
        Ok(KeyDetails {
            pub_key: metadata.pub_key,
            threshold,
            total_shares,
            required_shares: threshold.saturating_sub(held),
            share_descriptions: metadata.share_descriptions(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LocalServiceProvider;
    use crate::storage::MemoryStorage;

    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_logging() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fresh_tkey() -> (ThresholdKey, Arc<MemoryStorage>, Arc<LocalServiceProvider>) {
        init_logging();
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(LocalServiceProvider::random());
        let tkey = ThresholdKey::new(storage.clone(), provider.clone());
        (tkey, storage, provider)
    }

    /// Storage whose metadata writes can be switched off, simulating a
    /// partial outage of the remote store.
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_metadata: AtomicBool,
    }

    #[async_trait]
    impl StorageLayer for FlakyStorage {
        async fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(address).await
        }

        async fn set(&self, address: &str, value: Vec<u8>, expected_nonce: u64) -> Result<()> {
            if self.fail_metadata.load(Ordering::SeqCst) && address.starts_with(METADATA_PREFIX) {
                return Err(Error::Storage("simulated outage".to_string()));
            }
            self.inner.set(address, value, expected_nonce).await
        }
    }

    #[tokio::test]
    async fn test_initialize_new_key_default_policy() {
        let (mut tkey, _, _) = fresh_tkey();
        let result = tkey.initialize_new_key(None, false).await.unwrap();

        let details = tkey.get_key_details().unwrap();
        assert_eq!(details.threshold, 2);
        assert_eq!(details.total_shares, 2);
        assert_eq!(details.required_shares, 1);
        assert_eq!(details.pub_key, curve::pub_key_point(&result.priv_key));
        assert_eq!(result.device_share.share.index, Scalar::from(1u64));
        assert_eq!(result.backup_share.share.index, Scalar::from(2u64));
    }

    #[tokio::test]
    async fn test_reconstruct_with_both_shares_yields_secret() {
        let (mut tkey, _, _) = fresh_tkey();
        let secret = curve::random_scalar();
        let result = tkey.initialize_new_key(Some(secret), false).await.unwrap();
        assert_eq!(result.priv_key, secret);

        tkey.input_share_store_safe(result.backup_share).unwrap();
        let reconstructed = tkey.reconstruct_key().await.unwrap();
        assert_eq!(reconstructed.priv_key, secret);
        assert!(reconstructed.aux_keys.is_empty());
    }

    #[tokio::test]
    async fn test_reconstruct_below_threshold_fails() {
        let (mut tkey, storage, _) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();

        // A second device that only holds the backup share.
        let provider = Arc::new(LocalServiceProvider::random());
        let mut other = ThresholdKey::new(storage, provider);
        other
            .initialize(InitializeParams {
                input: Some(init.backup_share),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            other.reconstruct_key().await,
            Err(Error::InsufficientShares { have: 1, need: 2 })
        ));
    }

    #[tokio::test]
    async fn test_initialize_from_provider_postbox() {
        let (mut tkey, storage, provider) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();

        // New session, same provider: bootstrap without any input share.
        let mut session = ThresholdKey::new(storage, provider);
        let details = session.initialize(InitializeParams::default()).await.unwrap();
        assert_eq!(details.pub_key, curve::pub_key_point(&init.priv_key));
        assert_eq!(details.required_shares, 1);

        session.input_share_store_safe(init.backup_share).unwrap();
        let reconstructed = session.reconstruct_key().await.unwrap();
        assert_eq!(reconstructed.priv_key, init.priv_key);
    }

    #[tokio::test]
    async fn test_never_initialize_new_key_without_existing() {
        let (mut tkey, _, _) = fresh_tkey();
        let result = tkey
            .initialize(InitializeParams {
                never_initialize_new_key: true,
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(Error::ExistingKeyNotFound)));
    }

    #[tokio::test]
    async fn test_import_key_is_honored() {
        let (mut tkey, _, _) = fresh_tkey();
        let imported = curve::random_scalar();
        let details = tkey
            .initialize(InitializeParams {
                import_key: Some(imported),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(details.pub_key, curve::pub_key_point(&imported));
    }

    #[tokio::test]
    async fn test_input_share_store_safe_rejects_forgeries() {
        let (mut tkey, _, _) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();

        let mut forged = init.backup_share.clone();
        forged.share.value += Scalar::ONE;
        assert!(matches!(
            tkey.input_share_store_safe(forged),
            Err(Error::InvalidShareCommitment)
        ));

        let mut unknown_index = init.backup_share;
        unknown_index.share.index = Scalar::from(40u64);
        assert!(matches!(
            tkey.input_share_store_safe(unknown_index),
            Err(Error::InvalidShareCommitment)
        ));
    }

    #[tokio::test]
    async fn test_bare_share_scalar_round_trip() {
        let (mut tkey, _, _) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();

        // A bare scalar is identified by its commitment alone.
        tkey.input_share(init.backup_share.share.value).unwrap();
        assert_eq!(
            tkey.output_share(&Scalar::from(2u64)).unwrap(),
            init.backup_share.share.value
        );
        assert!(matches!(
            tkey.input_share(curve::random_scalar()),
            Err(Error::ShareNotFound)
        ));
    }

    #[tokio::test]
    async fn test_generate_new_share_extends_generation() {
        let (mut tkey, _, _) = fresh_tkey();
        let secret = curve::random_scalar();
        let init = tkey.initialize_new_key(Some(secret), false).await.unwrap();
        let poly_id_before = tkey.metadata().unwrap().latest_polynomial_id().unwrap().clone();

        let issued = tkey.generate_new_share().await.unwrap();
        assert_eq!(issued.new_share_index, Scalar::from(3u64));

        let metadata = tkey.metadata().unwrap();
        // Same generation, same pub key, one more committed index.
        assert_eq!(metadata.latest_polynomial_id().unwrap(), &poly_id_before);
        assert_eq!(metadata.pub_key, curve::pub_key_point(&secret));
        assert_eq!(metadata.share_indexes_for(&poly_id_before).unwrap().len(), 3);

        // The new share really lies on the original polynomial.
        let shares = vec![init.backup_share.share, issued.new_share_store.share];
        assert_eq!(sss::reconstruct(&shares, 2).unwrap(), secret);
    }

    #[tokio::test]
    async fn test_generate_share_at_duplicate_index_fails() {
        let (mut tkey, _, _) = fresh_tkey();
        tkey.initialize_new_key(None, false).await.unwrap();
        assert!(matches!(
            tkey.generate_share_at(Scalar::from(2u64)).await,
            Err(Error::DuplicateShareIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_then_reconstruct_respects_threshold() {
        // End-to-end walk: 2-of-2, delete the device share, issue a
        // replacement, reconstruct with {backup, new}, and verify the
        // deleted share alone is insufficient.
        let (mut tkey, storage, _) = fresh_tkey();
        let secret = curve::random_scalar();
        let init = tkey.initialize_new_key(Some(secret), false).await.unwrap();

        tkey.delete_share(&Scalar::from(1u64)).await.unwrap();
        tkey.input_share_store_safe(init.backup_share.clone()).unwrap();

        let issued = tkey.generate_new_share().await.unwrap();
        assert_eq!(issued.new_share_index, Scalar::from(3u64));
        assert_eq!(tkey.reconstruct_key().await.unwrap().priv_key, secret);

        // A device holding only the deleted share cannot reconstruct.
        let provider = Arc::new(LocalServiceProvider::random());
        let mut loner = ThresholdKey::new(storage, provider);
        loner.metadata = Some(tkey.metadata().unwrap().clone());
        loner.input_share_store(init.device_share);
        assert!(matches!(
            loner.reconstruct_key().await,
            Err(Error::InsufficientShares { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_unknown_share_fails() {
        let (mut tkey, _, _) = fresh_tkey();
        tkey.initialize_new_key(None, false).await.unwrap();
        assert!(matches!(
            tkey.delete_share(&Scalar::from(9u64)).await,
            Err(Error::ShareNotFound)
        ));
    }

    #[tokio::test]
    async fn test_refresh_preserves_key_and_invalidates_pruned_shares() {
        let (mut tkey, storage, _) = fresh_tkey();
        let secret = curve::random_scalar();
        let init = tkey.initialize_new_key(Some(secret), false).await.unwrap();
        let previous_poly_id = init.device_share.polynomial_id.clone();
        let pub_key_before = tkey.pub_key().unwrap();

        // Rotate to 2-of-3 at indexes {2, 5, 6}: index 1 is pruned,
        // index 2 survives.
        let refreshed = tkey
            .refresh_shares(
                2,
                &[Scalar::from(2u64), Scalar::from(5u64), Scalar::from(6u64)],
                &previous_poly_id,
            )
            .await
            .unwrap();
        assert_eq!(refreshed.share_stores.len(), 3);
        assert_eq!(tkey.pub_key().unwrap(), pub_key_before);
        assert_eq!(tkey.reconstruct_key().await.unwrap().priv_key, secret);

        // The pruned device share is dead: no refresh-chain entry exists.
        let provider = Arc::new(LocalServiceProvider::random());
        let mut stale = ThresholdKey::new(storage.clone(), provider);
        assert!(matches!(
            stale.catchup_to_latest_share(init.device_share).await,
            Err(Error::ShareStale(_))
        ));

        // The surviving backup holder catches up through the stored chain
        // and lands on a share valid under the new polynomial.
        let provider = Arc::new(LocalServiceProvider::random());
        let mut survivor = ThresholdKey::new(storage, provider);
        let caught_up = survivor
            .catchup_to_latest_share(init.backup_share)
            .await
            .unwrap();
        assert_eq!(caught_up.share.index, Scalar::from(2u64));
        assert_eq!(
            &caught_up.polynomial_id,
            survivor.metadata().unwrap().latest_polynomial_id().unwrap()
        );
    }

    #[tokio::test]
    async fn test_interrupted_key_creation_is_retryable() {
        init_logging();
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            fail_metadata: AtomicBool::new(true),
        });
        let provider = Arc::new(LocalServiceProvider::random());
        let mut tkey = ThresholdKey::new(storage.clone(), provider.clone());

        // Metadata store is down: creation fails and writes nothing, not
        // even the postbox entry.
        assert!(matches!(
            tkey.initialize_new_key(None, false).await,
            Err(Error::Storage(_))
        ));
        assert!(tkey.metadata().is_err());
        let postbox_address = provider_share_address(&provider.postbox_pub_key());
        assert!(storage.get(&postbox_address).await.unwrap().is_none());

        // Outage over: the same instance retries cleanly.
        storage.fail_metadata.store(false, Ordering::SeqCst);
        let init = tkey.initialize_new_key(None, false).await.unwrap();

        // And a fresh session bootstraps from the postbox as usual.
        let mut session = ThresholdKey::new(storage, provider);
        session.initialize(InitializeParams::default()).await.unwrap();
        session.input_share_store_safe(init.backup_share).unwrap();
        assert_eq!(
            session.reconstruct_key().await.unwrap().priv_key,
            init.priv_key
        );
    }

    #[tokio::test]
    async fn test_dangling_postbox_entry_does_not_block_creation() {
        init_logging();
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(LocalServiceProvider::random());

        // A postbox entry whose metadata was never persisted.
        let orphan_poly = Polynomial::generate(2, None).unwrap();
        let orphan = ShareStore::new(
            orphan_poly.share_at(&Scalar::from(1u64)),
            orphan_poly.public_commitment().polynomial_id(),
        );
        let message = provider.encrypt(&orphan.to_bytes().unwrap()).unwrap();
        storage
            .set(
                &provider_share_address(&provider.postbox_pub_key()),
                serde_json::to_vec(&message).unwrap(),
                1,
            )
            .await
            .unwrap();

        // Strict bootstrap still reports no existing key.
        let mut strict = ThresholdKey::new(storage.clone(), provider.clone());
        assert!(matches!(
            strict
                .initialize(InitializeParams {
                    never_initialize_new_key: true,
                    ..Default::default()
                })
                .await,
            Err(Error::ExistingKeyNotFound)
        ));

        // Normal initialization replaces the orphan with a fresh key.
        let mut tkey = ThresholdKey::new(storage.clone(), provider.clone());
        let details = tkey.initialize(InitializeParams::default()).await.unwrap();
        assert_ne!(details.pub_key, curve::pub_key_point(orphan_poly.secret()));

        // The postbox now holds the new key's device share.
        let mut session = ThresholdKey::new(storage, provider);
        let bootstrapped = session.initialize(InitializeParams::default()).await.unwrap();
        assert_eq!(bootstrapped.pub_key, details.pub_key);
    }

    #[tokio::test]
    async fn test_catchup_walks_multiple_refresh_generations() {
        let (mut tkey, storage, _) = fresh_tkey();
        let secret = curve::random_scalar();
        let init = tkey.initialize_new_key(Some(secret), false).await.unwrap();
        let gen1 = init.device_share.polynomial_id.clone();

        // Two rotations, index 2 surviving both.
        let second = tkey
            .refresh_shares(2, &[Scalar::from(2u64), Scalar::from(3u64)], &gen1)
            .await
            .unwrap();
        let gen2 = second
            .share_stores
            .values()
            .next()
            .unwrap()
            .polynomial_id
            .clone();
        let third = tkey
            .refresh_shares(2, &[Scalar::from(2u64), Scalar::from(4u64)], &gen2)
            .await
            .unwrap();

        // A first-generation share catches up hop by hop through both
        // stored chain entries.
        let provider = Arc::new(LocalServiceProvider::random());
        let mut survivor = ThresholdKey::new(storage, provider);
        let caught_up = survivor
            .catchup_to_latest_share(init.backup_share)
            .await
            .unwrap();
        assert_eq!(caught_up.share.index, Scalar::from(2u64));
        assert_eq!(
            &caught_up.polynomial_id,
            survivor.metadata().unwrap().latest_polynomial_id().unwrap()
        );
        assert_ne!(caught_up.polynomial_id, gen1);
        assert_ne!(caught_up.polynomial_id, gen2);

        // The caught-up share is live: it reconstructs with a current one.
        survivor.input_share_store_safe(caught_up).unwrap();
        let gen3_share = third.share_stores[&curve::scalar_to_hex(&Scalar::from(4u64))].clone();
        survivor.input_share_store_safe(gen3_share).unwrap();
        assert_eq!(survivor.reconstruct_key().await.unwrap().priv_key, secret);
    }

    #[tokio::test]
    async fn test_refresh_runs_middleware_with_old_and_new_maps() {
        let (mut tkey, _, _) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();
        let previous_poly_id = init.device_share.polynomial_id.clone();

        tkey.add_refresh_middleware(
            "witness",
            Box::new(|domain, old, new| {
                assert!(domain.is_none());
                Ok(Some(serde_json::json!({
                    "old": old.len(),
                    "new": new.len(),
                })))
            }),
        );
        tkey.refresh_shares(2, &[Scalar::from(1u64), Scalar::from(2u64)], &previous_poly_id)
            .await
            .unwrap();

        let recorded = tkey
            .metadata()
            .unwrap()
            .get_general_store_domain("witness")
            .cloned()
            .unwrap();
        assert_eq!(recorded, serde_json::json!({"old": 1, "new": 2}));
    }

    #[tokio::test]
    async fn test_reconstruct_middleware_contributes_aux_keys() {
        let (mut tkey, _, _) = fresh_tkey();
        let aux = curve::random_scalar();
        tkey.add_reconstruct_key_middleware(
            "seedPhrase",
            Box::new(move |_, _| Ok(vec![aux])),
        );

        let init = tkey.initialize_new_key(None, false).await.unwrap();
        tkey.input_share_store_safe(init.backup_share).unwrap();
        let reconstructed = tkey.reconstruct_key().await.unwrap();
        assert_eq!(reconstructed.aux_keys, vec![aux]);
        assert_eq!(reconstructed.all_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_writer_gets_conflict() {
        let (mut tkey, storage, provider) = fresh_tkey();
        tkey.initialize_new_key(None, false).await.unwrap();

        // A second instance syncs to the same state, then falls behind.
        let mut rival = ThresholdKey::new(storage, provider);
        rival.initialize(InitializeParams::default()).await.unwrap();

        tkey.sync_share_metadata().await.unwrap();
        match rival.sync_share_metadata().await {
            Err(Error::MetadataConflict(nonce)) => assert_eq!(nonce, 2),
            other => panic!("expected MetadataConflict, got {other:?}"),
        }
        // The rival's live metadata is untouched and a re-fetch (catch-up)
        // makes the retry succeed.
        let held = rival.output_share_store(&Scalar::from(1u64)).unwrap();
        rival.catchup_to_latest_share(held).await.unwrap();
        rival.sync_share_metadata().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_items_round_trip() {
        let (mut tkey, _, _) = fresh_tkey();
        tkey.initialize_new_key(None, false).await.unwrap();

        tkey.set_store_item("seedPhrase", serde_json::json!({"id": "sp1", "phrase": "..."}))
            .await
            .unwrap();
        tkey.set_store_item("seedPhrase", serde_json::json!({"id": "sp2"}))
            .await
            .unwrap();
        tkey.set_store_item("seedPhrase", serde_json::json!({"id": "sp1", "phrase": "updated"}))
            .await
            .unwrap();

        assert_eq!(tkey.store_items("seedPhrase").unwrap().len(), 2);
        let item = tkey.store_item("seedPhrase", "sp1").unwrap();
        assert_eq!(item["phrase"], "updated");

        tkey.delete_store_item("seedPhrase", "sp2").await.unwrap();
        assert!(tkey.store_item("seedPhrase", "sp2").is_err());
        assert!(tkey.delete_store_item("seedPhrase", "sp2").await.is_err());
    }

    #[tokio::test]
    async fn test_encrypt_requires_reconstruction_to_decrypt() {
        let (mut tkey, _, _) = fresh_tkey();
        let init = tkey.initialize_new_key(None, false).await.unwrap();
        let message = tkey.encrypt(b"module secret").unwrap();

        // Fresh instance: initialized but key not available.
        let (mut other, _, _) = fresh_tkey();
        other.metadata = Some(tkey.metadata().unwrap().clone());
        assert!(matches!(
            other.decrypt(&message),
            Err(Error::InvalidState(_))
        ));

        other.input_share_store(init.device_share);
        other.input_share_store(init.backup_share);
        // No remote fetch needed for decrypt itself once the key is known.
        other.priv_key = Some(init.priv_key);
        assert_eq!(other.decrypt(&message).unwrap(), b"module secret");
    }

    #[tokio::test]
    async fn test_module_hooks_run_on_initialize() {
        struct Recorder;

        #[async_trait]
        impl Module for Recorder {
            fn name(&self) -> &str {
                "recorder"
            }

            fn bind(&self, api: &mut ThresholdKey) {
                api.add_reconstruct_key_middleware("recorder", Box::new(|_, _| Ok(vec![])));
            }

            async fn initialize(&self, api: &mut ThresholdKey) -> Result<()> {
                api.add_share_description(&Scalar::from(1u64), "registered by module", true)
                    .await
            }
        }

        let (mut tkey, _, _) = fresh_tkey();
        tkey.register_module(Arc::new(Recorder));
        tkey.initialize(InitializeParams::default()).await.unwrap();

        let details = tkey.get_key_details().unwrap();
        let index_hex = curve::scalar_to_hex(&Scalar::from(1u64));
        assert_eq!(
            details.share_descriptions[&index_hex],
            vec!["registered by module".to_string()]
        );
    }

    #[tokio::test]
    async fn test_share_serialization_middleware_round_trip() {
        let (mut tkey, _, _) = fresh_tkey();
        tkey.add_share_serialization_middleware(ShareSerializationMiddleware {
            serialize: Box::new(|share, _format| Ok(Value::String(curve::scalar_to_hex(share)))),
            deserialize: Box::new(|value, _format| {
                curve::scalar_from_hex(value.as_str().unwrap_or_default())
            }),
        });

        let share = curve::random_scalar();
        let encoded = tkey.serialize_share(&share, "hex").unwrap();
        assert_eq!(tkey.deserialize_share(&encoded, "hex").unwrap(), share);
    }
}
