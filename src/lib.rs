//! # Threshold Key Management with Shamir Secret Sharing
//!
//! This library implements the core of a threshold key-management system: a
//! single private key is split into shares distributed across devices and
//! collaborators, and any `t` of them reconstruct it. Public bookkeeping is
//! synchronized through a versioned metadata record, and shares move between
//! devices over an encrypted out-of-band transfer protocol.
//!
//! ## Shamir's Secret Sharing (SSS)
//!
//! Shamir's Secret Sharing is a cryptographic algorithm created by Adi
//! Shamir. A secret is divided into parts, giving each participant its own
//! unique part, with the property that a certain number of these parts are
//! needed to reconstruct the secret.
//!
//! ### The Mathematics Behind SSS
//!
//! The idea of SSS is based on polynomial interpolation in finite fields.
//! Given a secret `S`, the algorithm chooses a random polynomial of degree
//! `t-1` (where `t` is the threshold number of shares needed to reconstruct
//! the secret):
//!
//! ```ignore
//! f(x) = a0 + a1*x + a2*x^2 + ... + a(t-1)*x^(t-1)
//! ```
//!
//! where `a0 = S` (the secret), and `a1, ..., a(t-1)` are randomly chosen
//! coefficients. Each share corresponds to a point `(x, f(x))` on this
//! polynomial. With at least `t` points, the polynomial and hence the secret
//! can be reconstructed using Lagrange interpolation.
//!
//! Here the field is the secp256k1 scalar field, which buys verifiability
//! for free: publishing `ai * G` for each coefficient commits to the whole
//! polynomial, and anyone can check a share against the commitments by
//! evaluating them "in the exponent" without learning any coefficient.
//!
//! ### Share Refresh
//!
//! Shares can be refreshed without changing the secret itself: a new
//! polynomial with the same constant term (the secret) and fresh
//! higher-degree coefficients is generated and new shares are issued under
//! it. The combined public key `S * G` never changes, while shares of
//! superseded polynomials stop counting toward the threshold.
//!
//! ### Example: Splitting and Reconstructing
//!
//! ```rust
//! use keyquorum::sss::{self, Polynomial};
//! use k256::Scalar;
//!
//! let poly = Polynomial::generate(2, None).unwrap();
//! let shares = poly.shares_at(&[Scalar::from(1u64), Scalar::from(2u64)]);
//!
//! let secret = sss::reconstruct(&shares, 2).unwrap();
//! assert_eq!(&secret, poly.secret());
//! ```
//!
//! ## Modules
//!
//! - `sss`: polynomials, shares, commitments, interpolation.
//! - `metadata`: the versioned public state synchronized across devices.
//! - `orchestrator`: the stateful engine driving the key lifecycle.
//! - `storage`: the nonce-versioned remote key-value store contract.
//! - `provider`: the authentication collaborator holding the postbox key.
//! - `transfer`: encrypted out-of-band share transfer between devices.

/// The `sss` module implements Shamir's Secret Sharing over the secp256k1
/// scalar field: secret polynomials, shares, elliptic-curve coefficient
/// commitments, and Lagrange interpolation for both secret reconstruction
/// and full polynomial recovery.
pub mod sss;

/// The `metadata` module defines the versioned public state of a threshold
/// key: every historical polynomial commitment, the committed share
/// indexes, per-module stores, and the compact persisted wire format.
pub mod metadata;

/// The `orchestrator` module drives the key lifecycle: initialization,
/// reconstruction, share issuance and deletion, refresh, and the module and
/// middleware registries everything else plugs into.
pub mod orchestrator;

/// The `storage` module specifies the remote key-value store the
/// orchestrator persists to, including the strictly-increasing-nonce rule
/// that resolves concurrent writers, plus an in-memory implementation.
pub mod storage;

/// The `provider` module defines the service provider contract: the
/// authentication-anchored postbox keypair that lets a fresh device
/// bootstrap its first share without out-of-band transfer.
pub mod provider;

/// The `transfer` module implements out-of-band share transfer: a
/// requesting device publishes an ephemeral encryption key, a holding
/// device answers with a share encrypted to it.
pub mod transfer;

/// The `ecies` module provides hybrid encryption to a curve point, used for
/// every ciphertext this library persists or transfers.
pub mod ecies;

/// The `curve` module collects secp256k1 codec helpers: hex encodings of
/// scalars and points plus their serde adapters.
pub mod curve;

/// The `constants` module defines wire-format markers, storage address
/// prefixes and default sharing parameters.
pub mod constants;

/// The `error` module defines the crate-wide error type.
pub mod error;

pub use error::{Error, Result};
