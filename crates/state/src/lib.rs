//! Signed states, the nexus holding the latest one, signature collection,
//! ISS detection and state proofs.

pub mod collector;
pub mod config;
pub mod error;
pub mod iss;
pub mod merkle;
pub mod metadata;
pub mod nexus;
pub mod proof;
pub mod signed_state;

pub use collector::SignatureCollector;
pub use config::StateConfig;
pub use error::{Result, StateError};
pub use iss::{IssDetector, IssKind, IssNotification};
pub use merkle::{MerkleNode, NodeIndex, StateTree, StateTreeBuilder};
pub use metadata::{SavedStateMetadata, METADATA_FILE_NAME};
pub use nexus::SignedStateNexus;
pub use proof::{NodeSignature, StateProof, StateProofNode};
pub use signed_state::{ReservedSignedState, SignatureOutcome, SignedState, SignedStateParams};
