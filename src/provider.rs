use k256::{ProjectivePoint, Scalar};

use crate::curve;
use crate::ecies::{self, EncryptedMessage};
use crate::error::Result;

/// Authentication collaborator that anchors a threshold key to a login.
///
/// Supplies the postbox keypair: the signing/authentication key the first
/// device share is encrypted to, so that a fresh device which can
/// authenticate (and therefore obtain the postbox key) can bootstrap
/// without any out-of-band transfer.
pub trait ServiceProvider: Send + Sync {
    /// The provider-held private scalar.
    fn postbox_key(&self) -> Scalar;

    /// Public point of the postbox key; also used to address the
    /// provider's storage entries.
    fn postbox_pub_key(&self) -> ProjectivePoint {
        curve::pub_key_point(&self.postbox_key())
    }

    /// Encrypts a payload to the postbox key.
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedMessage> {
        ecies::encrypt(&self.postbox_pub_key(), plaintext)
    }

    /// Decrypts a payload addressed to the postbox key.
    fn decrypt(&self, message: &EncryptedMessage) -> Result<Vec<u8>> {
        ecies::decrypt(&self.postbox_key(), message)
    }
}

/// Provider backed by a locally held postbox key. Production deployments
/// would derive this key from an external login; tests construct it
/// directly.
pub struct LocalServiceProvider {
    postbox_key: Scalar,
}

impl LocalServiceProvider {
    pub fn new(postbox_key: Scalar) -> Self {
        LocalServiceProvider { postbox_key }
    }

    pub fn random() -> Self {
        LocalServiceProvider {
            postbox_key: curve::random_scalar(),
        }
    }
}

impl ServiceProvider for LocalServiceProvider {
    fn postbox_key(&self) -> Scalar {
        self.postbox_key
    }
}
