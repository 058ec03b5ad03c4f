use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hashweave_types::{AddressBook, Event, GossipEvent, Hash, NodeId, UnsignedEvent};
use rand_core::{OsRng, RngCore};
use thiserror::Error;

pub mod mnemonic;

pub use mnemonic::mnemonic;

/// Length in bytes of an Ed25519 signature.
pub const SIGNATURE_BYTES: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signature has {0} bytes, expected {SIGNATURE_BYTES}")]
    SignatureLength(usize),
    #[error("malformed public key")]
    PublicKey,
    #[error("signature does not verify")]
    BadSignature,
    #[error("node {0} is not in the address book")]
    UnknownSigner(NodeId),
    #[error("invalid key seed: {0}")]
    Seed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Ed25519 key pair of the local node.
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let mut secret_key = [0u8; 32];
        OsRng.fill_bytes(&mut secret_key);
        Self::from_seed(secret_key)
    }

    /// Deterministic key pair from a 32 byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Parse a hex encoded 32 byte seed, as found in configuration files.
    pub fn from_hex_seed(seed: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(seed.trim(), &mut bytes)
            .map_err(|err| CryptoError::Seed(err.to_string()))?;
        Ok(Self::from_seed(bytes))
    }

    /// Get the public key as bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_BYTES] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a hash, e.g. an event identity or a state root.
    pub fn sign_hash(&self, hash: &Hash) -> Vec<u8> {
        self.sign(hash.as_bytes()).to_vec()
    }

    /// Sign an event. The signature covers the identity hash so it survives
    /// payload redaction.
    pub fn sign_event(&self, unsigned: UnsignedEvent) -> GossipEvent {
        let signature = self.sign_hash(&unsigned.compute_hash());
        GossipEvent::new(unsigned, signature)
    }
}

/// Signature checking provider used by intake and the state layer.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()>;
}

/// Default provider backed by `ed25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
        let bytes: [u8; SIGNATURE_BYTES] = signature
            .try_into()
            .map_err(|_| CryptoError::SignatureLength(signature.len()))?;
        let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::PublicKey)?;
        key.verify(message, &Signature::from_bytes(&bytes))
            .map_err(|_| CryptoError::BadSignature)
    }
}

/// Verify `signature` by `signer` over `hash` using the signer's key from
/// the address book.
pub fn verify_hash_signature(
    verifier: &dyn SignatureVerifier,
    book: &AddressBook,
    signer: NodeId,
    hash: &Hash,
    signature: &[u8],
) -> Result<()> {
    let address = book.get(signer).ok_or(CryptoError::UnknownSigner(signer))?;
    verifier.verify(&address.public_key, hash.as_bytes(), signature)
}

/// Verify an event's creator signature.
pub fn verify_event(verifier: &dyn SignatureVerifier, book: &AddressBook, event: &Event) -> Result<()> {
    verify_hash_signature(verifier, book, event.creator(), &event.hash(), event.signature())
}
