//! secp256k1 scalar and point helpers.
//!
//! All group arithmetic comes from `k256`; this module only adds the
//! canonical text encodings the rest of the crate speaks: lowercase hex for
//! scalars (32 bytes, big-endian, zero-padded) and SEC1 compressed hex for
//! points. The curve parameters are compile-time constants of `k256` —
//! there is no mutable global curve state anywhere.

use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// Fresh uniformly random scalar mod the curve order.
pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// Public key point for a private scalar: `scalar * G`.
pub fn pub_key_point(scalar: &Scalar) -> ProjectivePoint {
    ProjectivePoint::GENERATOR * scalar
}

/// Canonical scalar encoding: 64 lowercase hex chars, big-endian.
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.to_bytes())
}

/// Parses a scalar from big-endian hex, left-padding short encodings.
/// Rejects values at or above the curve order.
pub fn scalar_from_hex(encoded: &str) -> Result<Scalar> {
    let raw = hex::decode(encoded).map_err(|e| Error::Crypto(format!("bad scalar hex: {e}")))?;
    if raw.len() > 32 {
        return Err(Error::Crypto(format!("scalar too long: {} bytes", raw.len())));
    }
    let mut buf = [0u8; 32];
    buf[32 - raw.len()..].copy_from_slice(&raw);
    let repr = FieldBytes::from(buf);
    Option::<Scalar>::from(Scalar::from_repr(repr))
        .ok_or_else(|| Error::Crypto("scalar out of field range".to_string()))
}

/// SEC1 compressed point encoding as lowercase hex (33 bytes: parity tag
/// plus x-coordinate).
pub fn point_to_hex(point: &ProjectivePoint) -> String {
    hex::encode(point.to_affine().to_encoded_point(true).as_bytes())
}

/// Parses a point from SEC1 hex (compressed or uncompressed). The identity
/// point is rejected: it never appears in valid commitments.
pub fn point_from_hex(encoded: &str) -> Result<ProjectivePoint> {
    let raw = hex::decode(encoded).map_err(|e| Error::Crypto(format!("bad point hex: {e}")))?;
    let ep = EncodedPoint::from_bytes(&raw)
        .map_err(|e| Error::Crypto(format!("bad SEC1 encoding: {e}")))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&ep))
        .ok_or_else(|| Error::Crypto("point not on curve".to_string()))?;
    let point = ProjectivePoint::from(affine);
    if point == ProjectivePoint::IDENTITY {
        return Err(Error::Crypto("identity point".to_string()));
    }
    Ok(point)
}

/// Hex of a point's affine x-coordinate. Used as the lookup key for
/// self-addressed encrypted share backups.
pub fn point_x_hex(point: &ProjectivePoint) -> Result<String> {
    let ep = point.to_affine().to_encoded_point(false);
    let x = ep
        .x()
        .ok_or_else(|| Error::Crypto("identity point has no x-coordinate".to_string()))?;
    Ok(hex::encode(x))
}

/// Serde adapter for `Scalar` fields: canonical hex on the wire.
pub mod serde_scalar {
    use k256::Scalar;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scalar: &Scalar, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::scalar_to_hex(scalar))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Scalar, D::Error> {
        let encoded = String::deserialize(de)?;
        super::scalar_from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `ProjectivePoint` fields: SEC1 compressed hex.
pub mod serde_point {
    use k256::ProjectivePoint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(point: &ProjectivePoint, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::point_to_hex(point))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<ProjectivePoint, D::Error> {
        let encoded = String::deserialize(de)?;
        super::point_from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}
