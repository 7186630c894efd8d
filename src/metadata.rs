use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::constants::{
    ENCRYPTED_SHARES_DOMAIN, SHARE_DESCRIPTIONS_DOMAIN, WIRE_SENTINEL, WIRE_SEPARATOR,
};
use crate::curve;
use crate::ecies::{self, EncryptedMessage};
use crate::error::{Error, Result};
use crate::sss::{Polynomial, PolynomialId, PublicPolynomial, PublicShare, Share, ShareStore};

/// Versioned public state of a threshold key, synchronized across devices.
///
/// Holds the combined public key (invariant across refreshes), every
/// historical polynomial commitment with its committed share indexes, and
/// three opaque per-module key-value stores. Only the orchestrator mutates
/// it; every persisted mutation carries a strictly increased nonce.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub pub_key: ProjectivePoint,
    pub public_polynomials: HashMap<PolynomialId, PublicPolynomial>,
    /// Per generation: committed holder index (canonical hex) to its
    /// public share.
    pub public_shares: HashMap<PolynomialId, BTreeMap<String, PublicShare>>,
    /// Generation history in creation order; the last entry is current.
    pub poly_id_list: Vec<PolynomialId>,
    pub general_store: HashMap<String, Value>,
    pub item_store: HashMap<String, Value>,
    pub scoped_store: HashMap<String, Value>,
    pub nonce: u64,
}

/// Persisted envelope. The polynomial history is squashed into the compact
/// pipe/sentinel strings; public shares are not stored, they are re-derived
/// from the commitments on read.
#[derive(Serialize, Deserialize)]
struct MetadataWire {
    pub_key: String,
    poly_id_list: Vec<String>,
    general_store: HashMap<String, Value>,
    item_store: HashMap<String, Value>,
    scoped_store: HashMap<String, Value>,
    nonce: u64,
}

impl Metadata {
    pub fn new(pub_key: ProjectivePoint) -> Self {
        Metadata {
            pub_key,
            public_polynomials: HashMap::new(),
            public_shares: HashMap::new(),
            poly_id_list: Vec::new(),
            general_store: HashMap::new(),
            item_store: HashMap::new(),
            scoped_store: HashMap::new(),
            nonce: 0,
        }
    }

    /// Records a new sharing generation; it becomes the latest.
    pub fn add_public_polynomial(&mut self, public_polynomial: PublicPolynomial) {
        let poly_id = public_polynomial.polynomial_id();
        self.public_polynomials
            .insert(poly_id.clone(), public_polynomial);
        self.poly_id_list.push(poly_id);
    }

    /// Records a committed holder index under an existing generation.
    pub fn add_public_share(&mut self, poly_id: &PolynomialId, public_share: PublicShare) {
        self.public_shares
            .entry(poly_id.clone())
            .or_default()
            .insert(curve::scalar_to_hex(&public_share.index), public_share);
    }

    /// Records a generation and all of its share commitments in one call.
    pub fn add_from_polynomial_and_shares(&mut self, polynomial: &Polynomial, shares: &[Share]) {
        let public_polynomial = polynomial.public_commitment();
        let poly_id = public_polynomial.polynomial_id();
        self.add_public_polynomial(public_polynomial);
        for share in shares {
            self.add_public_share(&poly_id, share.public_share());
        }
    }

    pub fn latest_polynomial_id(&self) -> Result<&PolynomialId> {
        self.poly_id_list
            .last()
            .ok_or(Error::InvalidState("metadata holds no polynomial yet"))
    }

    pub fn latest_public_polynomial(&self) -> Result<&PublicPolynomial> {
        let poly_id = self.latest_polynomial_id()?;
        self.public_polynomials
            .get(poly_id)
            .ok_or(Error::InvalidState("latest polynomial id has no commitment"))
    }

    /// All committed holder indexes under a generation, numerically sorted.
    pub fn share_indexes_for(&self, poly_id: &PolynomialId) -> Result<Vec<Scalar>> {
        let shares = self
            .public_shares
            .get(poly_id)
            .ok_or(Error::ShareNotFound)?;
        // BTreeMap keys are zero-padded big-endian hex, so the natural
        // ordering is already numeric.
        shares.keys().map(|k| curve::scalar_from_hex(k)).collect()
    }

    pub fn public_share(&self, poly_id: &PolynomialId, index: &Scalar) -> Option<&PublicShare> {
        self.public_shares
            .get(poly_id)?
            .get(&curve::scalar_to_hex(index))
    }

    /// Identifies a bare share scalar: searches every historical public
    /// share for a commitment equal to `value * G` and wraps the match with
    /// its generation.
    pub fn share_to_share_store(&self, value: Scalar) -> Result<ShareStore> {
        let commitment = curve::pub_key_point(&value);
        for (poly_id, shares) in &self.public_shares {
            for public_share in shares.values() {
                if public_share.commitment == commitment {
                    return Ok(ShareStore::new(
                        Share::new(public_share.index, value),
                        poly_id.clone(),
                    ));
                }
            }
        }
        Err(Error::ShareNotFound)
    }

    pub fn set_general_store_domain(&mut self, domain: &str, value: Value) {
        self.general_store.insert(domain.to_string(), value);
    }

    pub fn get_general_store_domain(&self, domain: &str) -> Option<&Value> {
        self.general_store.get(domain)
    }

    pub fn set_item_store_domain(&mut self, domain: &str, value: Value) {
        self.item_store.insert(domain.to_string(), value);
    }

    pub fn get_item_store_domain(&self, domain: &str) -> Option<&Value> {
        self.item_store.get(domain)
    }

    pub fn set_scoped_store(&mut self, domain: &str, value: Value) {
        self.scoped_store.insert(domain.to_string(), value);
    }

    pub fn get_scoped_store(&self, domain: &str) -> Option<&Value> {
        self.scoped_store.get(domain)
    }

    /// Stores a self-addressed encrypted backup: ciphertext readable only
    /// with the share scalar whose commitment x-coordinate keys it.
    pub fn set_encrypted_share(&mut self, commitment_x: &str, message: &EncryptedMessage) -> Result<()> {
        let mut domain = match self.scoped_store.get(ENCRYPTED_SHARES_DOMAIN) {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        domain.insert(commitment_x.to_string(), serde_json::to_value(message)?);
        self.scoped_store
            .insert(ENCRYPTED_SHARES_DOMAIN.to_string(), Value::Object(domain));
        Ok(())
    }

    /// Recovers the replacement share store backed up for `share_store`'s
    /// holder: looks up the ciphertext by the share commitment's
    /// x-coordinate and decrypts it with the share's own scalar.
    pub fn encrypted_share(&self, share_store: &ShareStore) -> Result<ShareStore> {
        let commitment = share_store.share.public_share().commitment;
        let key = curve::point_x_hex(&commitment)?;
        let message = self
            .scoped_store
            .get(ENCRYPTED_SHARES_DOMAIN)
            .and_then(|domain| domain.get(&key))
            .ok_or_else(|| Error::EncryptedShareUnavailable(key.clone()))?;
        let message: EncryptedMessage = serde_json::from_value(message.clone())?;
        let plaintext = ecies::decrypt(&share_store.share.value, &message)?;
        ShareStore::from_bytes(&plaintext)
    }

    /// Per-index audit trail of holder identity/channel. Append-only, with
    /// explicit delete-by-value.
    pub fn add_share_description(&mut self, index: &Scalar, description: &str) {
        let key = curve::scalar_to_hex(index);
        let mut domain = match self.general_store.get(SHARE_DESCRIPTIONS_DOMAIN) {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let entry = domain.entry(key).or_insert_with(|| Value::Array(vec![]));
        if let Value::Array(list) = entry {
            list.push(Value::String(description.to_string()));
        }
        self.general_store
            .insert(SHARE_DESCRIPTIONS_DOMAIN.to_string(), Value::Object(domain));
    }

    pub fn delete_share_description(&mut self, index: &Scalar, description: &str) -> Result<()> {
        let key = curve::scalar_to_hex(index);
        let domain = self
            .general_store
            .get_mut(SHARE_DESCRIPTIONS_DOMAIN)
            .and_then(|v| v.as_object_mut())
            .ok_or(Error::ShareNotFound)?;
        let list = domain
            .get_mut(&key)
            .and_then(|v| v.as_array_mut())
            .ok_or(Error::ShareNotFound)?;
        let before = list.len();
        list.retain(|v| v.as_str() != Some(description));
        if list.len() == before {
            return Err(Error::ShareNotFound);
        }
        Ok(())
    }

    pub fn share_descriptions(&self) -> HashMap<String, Vec<String>> {
        let mut out = HashMap::new();
        if let Some(Value::Object(domain)) = self.general_store.get(SHARE_DESCRIPTIONS_DOMAIN) {
            for (index, list) in domain {
                let descriptions = list
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                out.insert(index.clone(), descriptions);
            }
        }
        out
    }

    /// Canonical persisted form.
    ///
    /// Each generation is squashed to one string: the compressed point
    /// commitments joined with `|`, the `0x0` sentinel, then the committed
    /// share indexes sorted numerically and joined the same way. Sorted
    /// indexes keep the encoding stable for equality and diff checks.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut poly_id_list = Vec::with_capacity(self.poly_id_list.len());
        for poly_id in &self.poly_id_list {
            let mut parts: Vec<&str> = poly_id.split(WIRE_SEPARATOR).collect();
            parts.push(WIRE_SENTINEL);
            let indexes = self.public_shares.get(poly_id);
            let sorted: Vec<&str> = indexes
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            parts.extend(sorted);
            poly_id_list.push(parts.join(WIRE_SEPARATOR));
        }

        let wire = MetadataWire {
            pub_key: curve::point_to_hex(&self.pub_key),
            poly_id_list,
            general_store: self.general_store.clone(),
            item_store: self.item_store.clone(),
            scoped_store: self.scoped_store.clone(),
            nonce: self.nonce,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parses the persisted form. Public shares are not trusted from the
    /// wire: every one is re-derived by homomorphically evaluating the
    /// polynomial commitment at its index.
    pub fn deserialize(bytes: &[u8]) -> Result<Metadata> {
        let wire: MetadataWire = serde_json::from_slice(bytes)?;
        let mut metadata = Metadata::new(curve::point_from_hex(&wire.pub_key)?);
        metadata.general_store = wire.general_store;
        metadata.item_store = wire.item_store;
        metadata.scoped_store = wire.scoped_store;
        metadata.nonce = wire.nonce;

        for serialized in &wire.poly_id_list {
            let parts: Vec<&str> = serialized.split(WIRE_SEPARATOR).collect();
            let sentinel = parts
                .iter()
                .position(|p| *p == WIRE_SENTINEL)
                .ok_or_else(|| {
                    Error::Serialization("polynomial encoding lacks the 0x0 sentinel".to_string())
                })?;
            let (commitments_hex, indexes_hex) = parts.split_at(sentinel);

            let commitments = commitments_hex
                .iter()
                .map(|h| curve::point_from_hex(h))
                .collect::<Result<Vec<_>>>()?;
            let public_polynomial = PublicPolynomial::new(commitments);
            let poly_id = public_polynomial.polynomial_id();

            for index_hex in &indexes_hex[1..] {
                let index = curve::scalar_from_hex(index_hex)?;
                let public_share = public_polynomial.public_share_at(&index);
                metadata.add_public_share(&poly_id, public_share);
            }
            metadata.add_public_polynomial(public_polynomial);
        }
        Ok(metadata)
    }
}
