use core::fmt;

use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::WIRE_SEPARATOR;
use crate::curve::{self, serde_scalar};
use crate::error::{Error, Result};

/// Deterministic identifier for one sharing generation: the polynomial's
/// compressed point commitments joined with `|`.
pub type PolynomialId = String;

/// A polynomial over the secp256k1 scalar field.
///
/// The constant term is the shared secret; the remaining coefficients are
/// random. Degree is `threshold - 1`, so any `threshold` evaluations pin the
/// polynomial down and fewer reveal nothing about the constant term.
#[derive(Clone, PartialEq, Eq)]
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Builds a polynomial of degree `threshold - 1` with random
    /// coefficients.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Number of shares needed to reconstruct the constant
    ///   term; must be at least 2.
    /// * `secret` - The constant term, or `None` to sample a fresh one.
    ///
    /// # Returns
    ///
    /// The polynomial, or `Error::InvalidState` for a threshold below 2.
    pub fn generate(threshold: usize, secret: Option<Scalar>) -> Result<Self> {
        if threshold < 2 {
            return Err(Error::InvalidState("threshold must be at least 2"));
        }
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(secret.unwrap_or_else(curve::random_scalar));
        for _ in 1..threshold {
            coefficients.push(Scalar::random(&mut OsRng));
        }
        Ok(Polynomial { coefficients })
    }

    /// Number of shares required to reconstruct the constant term.
    pub fn threshold(&self) -> usize {
        self.coefficients.len()
    }

    /// The constant term (the shared secret).
    pub fn secret(&self) -> &Scalar {
        &self.coefficients[0]
    }

    /// Evaluates the polynomial at `x` via Horner's method.
    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        let mut acc = Scalar::ZERO;
        for coeff in self.coefficients.iter().rev() {
            acc = acc * x + coeff;
        }
        acc
    }

    /// The share held by `index`: a point on the polynomial.
    pub fn share_at(&self, index: &Scalar) -> Share {
        Share {
            index: *index,
            value: self.evaluate(index),
        }
    }

    /// Shares for every requested holder index.
    pub fn shares_at(&self, indexes: &[Scalar]) -> Vec<Share> {
        indexes.iter().map(|i| self.share_at(i)).collect()
    }

    /// Public commitment: each coefficient multiplied by the base point.
    pub fn public_commitment(&self) -> PublicPolynomial {
        PublicPolynomial {
            commitments: self
                .coefficients
                .iter()
                .map(|c| ProjectivePoint::GENERATOR * c)
                .collect(),
        }
    }
}

// Coefficients are secret material; keep them out of logs.
impl fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polynomial")
            .field("threshold", &self.threshold())
            .field("coefficients", &"[REDACTED]")
            .finish()
    }
}

/// Elliptic-curve commitments to a polynomial's coefficients.
///
/// Publicly verifiable: anyone can evaluate the committed polynomial "in the
/// exponent" without learning a single coefficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPolynomial {
    commitments: Vec<ProjectivePoint>,
}

impl PublicPolynomial {
    pub fn new(commitments: Vec<ProjectivePoint>) -> Self {
        PublicPolynomial { commitments }
    }

    pub fn threshold(&self) -> usize {
        self.commitments.len()
    }

    pub fn commitments(&self) -> &[ProjectivePoint] {
        &self.commitments
    }

    /// The sharing generation's identifier: compressed commitments joined
    /// in coefficient order.
    pub fn polynomial_id(&self) -> PolynomialId {
        self.commitments
            .iter()
            .map(curve::point_to_hex)
            .collect::<Vec<_>>()
            .join(WIRE_SEPARATOR)
    }

    /// Homomorphically evaluates the committed polynomial at `index`
    /// (Horner over points): the result equals `f(index) * G` without
    /// knowledge of `f`.
    pub fn evaluate_at(&self, index: &Scalar) -> ProjectivePoint {
        let mut acc = ProjectivePoint::IDENTITY;
        for commitment in self.commitments.iter().rev() {
            acc = acc * index + commitment;
        }
        acc
    }

    /// The public share a real secret share at `index` would commit to.
    pub fn public_share_at(&self, index: &Scalar) -> PublicShare {
        PublicShare {
            index: *index,
            commitment: self.evaluate_at(index),
        }
    }
}

/// A single private share: one point on the secret polynomial.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    #[serde(with = "serde_scalar")]
    pub index: Scalar,
    #[serde(with = "serde_scalar")]
    pub value: Scalar,
}

impl Share {
    pub fn new(index: Scalar, value: Scalar) -> Self {
        Share { index, value }
    }

    /// The publicly verifiable counterpart: `value * G`.
    pub fn public_share(&self) -> PublicShare {
        PublicShare {
            index: self.index,
            commitment: curve::pub_key_point(&self.value),
        }
    }
}

// The share value is secret material; keep it out of logs.
impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &curve::scalar_to_hex(&self.index))
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Publicly verifiable share record: holder index plus the commitment
/// `value * G`. Never reveals the share value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicShare {
    pub index: Scalar,
    pub commitment: ProjectivePoint,
}

/// A share bound to the polynomial generation it belongs to. This is the
/// unit persisted on a device and transferred between devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStore {
    pub share: Share,
    pub polynomial_id: PolynomialId,
}

impl ShareStore {
    pub fn new(share: Share, polynomial_id: PolynomialId) -> Self {
        ShareStore {
            share,
            polynomial_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Reconstructs the secret (the constant term) from `threshold` or more
/// shares of the same polynomial via Lagrange interpolation at x = 0.
///
/// Any subset of `threshold` distinct-index shares yields the identical
/// secret, independent of which subset is chosen.
///
/// # Arguments
///
/// * `shares` - Points on the polynomial; duplicate indexes count once.
/// * `threshold` - The polynomial's threshold (degree + 1).
///
/// # Returns
///
/// The constant term, or `Error::InsufficientShares` when fewer than
/// `threshold` distinct indexes are present.
///
/// # Examples
///
/// ```
/// use keyquorum::sss::{self, Polynomial};
/// use k256::Scalar;
///
/// let poly = Polynomial::generate(2, None).unwrap();
/// let shares = poly.shares_at(&[Scalar::from(1u64), Scalar::from(2u64)]);
/// assert_eq!(&sss::reconstruct(&shares, 2).unwrap(), poly.secret());
/// ```
pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<Scalar> {
    let points = distinct_by_index(shares);
    if points.len() < threshold {
        return Err(Error::InsufficientShares {
            have: points.len(),
            need: threshold,
        });
    }
    let points = &points[..threshold];

    let mut secret = Scalar::ZERO;
    for (i, share) in points.iter().enumerate() {
        let mut weight = Scalar::ONE;
        for (j, other) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            // L_i(0) factor: x_j / (x_j - x_i)
            let denom = other.index - share.index;
            let inv = Option::<Scalar>::from(denom.invert())
                .ok_or_else(|| Error::Crypto("duplicate share index in interpolation".into()))?;
            weight *= other.index * inv;
        }
        secret += weight * share.value;
    }
    Ok(secret)
}

/// Recovers the full coefficient vector of the degree `threshold - 1`
/// polynomial passing through the given shares. Needed when an existing
/// generation must be extended with a new share index.
pub fn interpolate_polynomial(shares: &[Share], threshold: usize) -> Result<Polynomial> {
    let points = distinct_by_index(shares);
    if points.len() < threshold {
        return Err(Error::InsufficientShares {
            have: points.len(),
            need: threshold,
        });
    }
    let points = &points[..threshold];

    let mut coefficients = vec![Scalar::ZERO; threshold];
    for (i, share) in points.iter().enumerate() {
        // Basis numerator: product of (x - x_j) for j != i, built up one
        // linear factor at a time.
        let mut basis = vec![Scalar::ZERO; threshold];
        basis[0] = Scalar::ONE;
        let mut degree = 0;
        let mut denom = Scalar::ONE;
        for (j, other) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            for k in (0..=degree).rev() {
                let c = basis[k];
                basis[k + 1] += c;
                basis[k] = c * (-other.index);
            }
            degree += 1;
            denom *= share.index - other.index;
        }
        let scale = share.value
            * Option::<Scalar>::from(denom.invert())
                .ok_or_else(|| Error::Crypto("duplicate share index in interpolation".into()))?;
        for (coeff, b) in coefficients.iter_mut().zip(basis.iter()) {
            *coeff += scale * b;
        }
    }
    Ok(Polynomial { coefficients })
}

fn distinct_by_index(shares: &[Share]) -> Vec<Share> {
    let mut seen = HashSet::new();
    shares
        .iter()
        .filter(|s| seen.insert(s.index.to_bytes()))
        .cloned()
        .collect()
}
