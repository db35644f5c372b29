use ed25519_dalek::{Signer, Verifier};

use crate::error::CoreError;
use crate::ids::{ActorId, Signature};

/// Domain separation for every digest an actor signs.
const SIGNING_CONTEXT: &str = "nestlog history record v1";

/// Key pair of an actor that modifies documents and signs the history
/// records describing those modifications.
pub struct ActorIdentity {
    signing_key: ed25519_dalek::SigningKey,
}

impl ActorIdentity {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn actor_id(&self) -> ActorId {
        let verifying_key = self.signing_key.verifying_key();
        ActorId::from_bytes(verifying_key.to_bytes())
    }

    /// Sign the keyed blake3 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let digest = signing_digest(message);
        let sig = self.signing_key.sign(&digest);
        Signature::from_bytes(sig.to_bytes())
    }
}

fn signing_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(SIGNING_CONTEXT);
    hasher.update(message);
    *hasher.finalize().as_bytes()
}

pub fn verify_signature(
    actor_id: &ActorId,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CoreError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(actor_id.as_bytes())
        .map_err(|_| CoreError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key
        .verify(&signing_digest(message), &sig)
        .map_err(|_| CoreError::InvalidSignature)
}
