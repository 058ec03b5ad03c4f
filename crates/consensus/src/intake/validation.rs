use crate::error::IntakeRejection;
use hashweave_crypto::{verify_event, SignatureVerifier};
use hashweave_types::{AddressBook, Event, UnsignedEvent};
use std::sync::Arc;

/// Stateless checks applied to every event entering intake.
#[derive(Clone)]
pub struct EventValidator {
    book: Arc<AddressBook>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl EventValidator {
    pub fn new(book: Arc<AddressBook>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { book, verifier }
    }

    /// Structural checks that do not need the signature.
    pub fn check_fields(&self, event: &Event) -> Result<(), IntakeRejection> {
        if !self.book.contains(event.creator()) {
            return Err(IntakeRejection::UnknownCreator(event.creator()));
        }
        if let Some(parent) = event.self_parent() {
            if parent.creator != event.creator() {
                return Err(IntakeRejection::ForeignSelfParent(parent.creator));
            }
        }
        let expected = UnsignedEvent::expected_generation(event.self_parent(), event.other_parent());
        if expected != event.generation() {
            return Err(IntakeRejection::WrongGeneration {
                expected,
                actual: event.generation(),
            });
        }
        Ok(())
    }

    pub fn check_signature(&self, event: &Event) -> Result<(), IntakeRejection> {
        verify_event(self.verifier.as_ref(), &self.book, event)
            .map_err(|err| IntakeRejection::BadSignature(err.to_string()))
    }
}
