//! Event intake, the event DAG and hashgraph virtual voting.

pub mod config;
pub mod creator;
pub mod dag;
pub mod engine;
pub mod error;
pub mod hashgraph;
pub mod intake;
pub mod window;

#[cfg(test)]
mod test_support;

pub use config::{ConsensusConfig, EventWindowConfig, HashingMode, IntakeConfig};
pub use creator::EventCreator;
pub use dag::{Dag, DagSnapshot, SharedDag};
pub use engine::{ConsensusEngine, EngineHandle, EngineOutput, IntakeMessage};
pub use error::{ConsensusError, IntakeRejection, Result};
pub use hashgraph::{ConsensusAlgorithm, Hashgraph, RestorePoint};
pub use intake::{IntakeEventCounter, IntakeInput, IntakePipeline};
pub use window::{EventWindowManager, StaleEventDetector};
