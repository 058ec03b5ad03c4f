//! Event intake: hashing, validation, deduplication and orphan buffering.
//!
//! Events enter through [`IntakePipeline::submit`] and leave in topological
//! order, ready to be inserted into the DAG. The pipeline is owned by the
//! consensus engine task, so every stage runs on the same logical thread.

mod counter;
mod dedup;
mod orphans;
mod validation;

pub use counter::IntakeEventCounter;
pub use dedup::{DedupOutcome, EventDeduplicator};
pub use orphans::{IntakeItem, OrphanBuffer};
pub use validation::EventValidator;

use crate::config::IntakeConfig;
use crate::error::IntakeRejection;
use hashweave_types::{Event, EventWindow, GossipEvent, NodeId};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// An event handed to intake, hashed or not depending on the hashing mode.
#[derive(Debug, Clone)]
pub enum IntakeInput {
    Unhashed(GossipEvent),
    Hashed(Event),
}

impl IntakeInput {
    pub fn into_event(self) -> Event {
        match self {
            IntakeInput::Unhashed(gossip) => gossip.into_hashed(),
            IntakeInput::Hashed(event) => event,
        }
    }
}

pub struct IntakePipeline {
    validator: EventValidator,
    deduplicator: EventDeduplicator,
    orphans: OrphanBuffer,
    counter: Arc<IntakeEventCounter>,
    window: EventWindow,
}

impl IntakePipeline {
    pub fn new(
        config: &IntakeConfig,
        validator: EventValidator,
        counter: Arc<IntakeEventCounter>,
        window: EventWindow,
    ) -> Self {
        Self {
            validator,
            deduplicator: EventDeduplicator::new(window),
            orphans: OrphanBuffer::new(window, config.orphan_timeout),
            counter,
            window,
        }
    }

    pub fn counter(&self) -> &Arc<IntakeEventCounter> {
        &self.counter
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.orphan_count()
    }

    /// `(duplicates, disparate)` counts seen by the deduplicator.
    pub fn dedup_counts(&self) -> (u64, u64) {
        (self.deduplicator.duplicate_count(), self.deduplicator.disparate_count())
    }

    /// Run one event through every stage. On success returns the events that
    /// are now ready for the DAG, which may be empty if the event is waiting
    /// for parents.
    pub fn submit(
        &mut self,
        input: IntakeInput,
        source: Option<NodeId>,
        now: Instant,
    ) -> Result<Vec<Event>, IntakeRejection> {
        let event = input.into_event();
        let admitted = self
            .admit(&event)
            .and_then(|()| self.orphans.add(IntakeItem { event, source }, now));
        match admitted {
            Ok(ready) => Ok(self.leave(ready)),
            Err(rejection) => {
                self.exited(source);
                Err(rejection)
            }
        }
    }

    fn admit(&mut self, event: &Event) -> Result<(), IntakeRejection> {
        if self.window.is_ancient(&event.descriptor()) {
            return Err(IntakeRejection::Ancient);
        }
        self.validator.check_fields(event)?;
        match self.deduplicator.handle(event) {
            DedupOutcome::Duplicate => return Err(IntakeRejection::Duplicate),
            DedupOutcome::Disparate => {
                warn!(
                    target = "intake",
                    event = %event.hash(),
                    creator = %event.creator(),
                    "event seen before with a different signature",
                );
            }
            DedupOutcome::New => {}
        }
        self.validator.check_signature(event)
    }

    fn leave(&self, items: Vec<IntakeItem>) -> Vec<Event> {
        items
            .into_iter()
            .map(|item| {
                self.exited(item.source);
                item.event
            })
            .collect()
    }

    fn exited(&self, source: Option<NodeId>) {
        if let Some(peer) = source {
            self.counter.event_exited(peer);
        }
    }

    /// Propagate a new window to every stage. Returns events released from
    /// the orphan buffer because their missing parents became ancient.
    pub fn set_window(&mut self, window: EventWindow) -> Vec<Event> {
        self.window = window;
        self.deduplicator.set_window(window);
        let (released, discarded) = self.orphans.set_window(window);
        if !discarded.is_empty() {
            debug!(
                target = "intake",
                count = discarded.len(),
                "discarded orphans that became ancient",
            );
        }
        for item in &discarded {
            self.exited(item.source);
        }
        self.leave(released)
    }

    /// Start over at `window`: every buffered orphan is dropped and events
    /// seen before are accepted again.
    pub fn reset(&mut self, window: EventWindow) -> usize {
        self.window = window;
        self.deduplicator.reset(window);
        let dropped = self.orphans.clear(window);
        for item in &dropped {
            self.exited(item.source);
        }
        dropped.len()
    }

    /// Drop orphans past their timeout.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let dropped = self.orphans.sweep(now);
        for item in &dropped {
            self.exited(item.source);
        }
        dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Network;
    use hashweave_crypto::{Ed25519Verifier, SignatureVerifier};
    use hashweave_types::{AncientMode, EventDescriptor, Hash};
    use std::time::Duration;

    /// Accepts any signature, so a second copy of an event can carry
    /// different signature bytes.
    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify(&self, _: &[u8; 32], _: &[u8], _: &[u8]) -> hashweave_crypto::Result<()> {
            Ok(())
        }
    }

    fn pipeline(net: &Network, counter: Arc<IntakeEventCounter>) -> IntakePipeline {
        pipeline_with(net, counter, Arc::new(Ed25519Verifier))
    }

    fn pipeline_with(
        net: &Network,
        counter: Arc<IntakeEventCounter>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> IntakePipeline {
        let config = IntakeConfig {
            orphan_timeout: Duration::from_secs(5),
            ..IntakeConfig::default()
        };
        let validator = EventValidator::new(net.book.clone(), verifier);
        IntakePipeline::new(
            &config,
            validator,
            counter,
            EventWindow::genesis(AncientMode::BirthRoundThreshold),
        )
    }

    #[test]
    fn orphans_are_released_in_topological_order() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let b = net.create(1, Some(0));
        let c = net.create(0, Some(1));
        let mut intake = pipeline(&net, Arc::new(IntakeEventCounter::new()));
        let now = Instant::now();

        assert!(intake.submit(IntakeInput::Unhashed(c.gossip().clone()), None, now).unwrap().is_empty());
        assert!(intake.submit(IntakeInput::Hashed(b.clone()), None, now).unwrap().is_empty());
        let ready = intake.submit(IntakeInput::Hashed(a.clone()), None, now).unwrap();
        let order: Vec<Hash> = ready.iter().map(Event::hash).collect();
        assert_eq!(order, vec![a.hash(), b.hash(), c.hash()]);
    }

    #[test]
    fn rejects_duplicates_and_bad_signatures() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let counter = Arc::new(IntakeEventCounter::new());
        let mut intake = pipeline(&net, counter.clone());
        let now = Instant::now();
        counter.event_entered(NodeId(1));
        counter.event_entered(NodeId(1));
        counter.event_entered(NodeId(1));

        assert_eq!(intake.submit(IntakeInput::Hashed(a.clone()), Some(NodeId(1)), now).unwrap().len(), 1);
        assert_eq!(
            intake.submit(IntakeInput::Hashed(a.clone()), Some(NodeId(1)), now),
            Err(IntakeRejection::Duplicate)
        );

        let forged = GossipEvent::new(a.unsigned().clone(), vec![0u8; 64]);
        assert!(matches!(
            intake.submit(IntakeInput::Unhashed(forged), Some(NodeId(1)), now),
            Err(IntakeRejection::BadSignature(_))
        ));
        assert_eq!(counter.backlog(NodeId(1)), 0);
    }

    #[test]
    fn rejects_wrong_generation() {
        let mut net = Network::new(&[10]);
        let a = net.create(0, None);
        let mut unsigned = a.unsigned().clone();
        unsigned.generation = 5;
        let event = net.keys[0].sign_event(unsigned);
        let mut intake = pipeline(&net, Arc::new(IntakeEventCounter::new()));
        assert_eq!(
            intake.submit(IntakeInput::Unhashed(event), None, Instant::now()),
            Err(IntakeRejection::WrongGeneration {
                expected: 0,
                actual: 5
            })
        );
    }

    #[test]
    fn orphans_time_out() {
        let mut net = Network::new(&[10, 10]);
        let _a = net.create(0, None);
        let b = net.create(1, Some(0));
        let counter = Arc::new(IntakeEventCounter::new());
        let mut intake = pipeline(&net, counter.clone());
        let start = Instant::now();
        counter.event_entered(NodeId(7));
        intake.submit(IntakeInput::Hashed(b), Some(NodeId(7)), start).unwrap();
        assert_eq!(intake.orphan_count(), 1);
        assert_eq!(intake.sweep(start + Duration::from_secs(1)), 0);
        assert_eq!(intake.sweep(start + Duration::from_secs(6)), 1);
        assert_eq!(intake.orphan_count(), 0);
        assert_eq!(counter.backlog(NodeId(7)), 0);
    }

    #[test]
    fn ancient_parents_stop_blocking() {
        let mut net = Network::new(&[10, 10]);
        let _a = net.create(0, None);
        net.birth_round = 5;
        let b = net.create(1, Some(0));
        let mut intake = pipeline(&net, Arc::new(IntakeEventCounter::new()));
        assert!(intake.submit(IntakeInput::Hashed(b.clone()), None, Instant::now()).unwrap().is_empty());
        let released = intake.set_window(
            EventWindow::genesis(AncientMode::BirthRoundThreshold).advance(6, 3, 1),
        );
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].hash(), b.hash());
    }

    /// Child of `parent` created by member 1 whose other-parent descriptor
    /// keeps the parent's hash but claims a much later generation.
    fn child_with_forged_parent(net: &Network, parent: &Event) -> Event {
        let forged = EventDescriptor {
            generation: 40,
            ..parent.descriptor()
        };
        let mut unsigned = parent.unsigned().clone();
        unsigned.creator = NodeId(1);
        unsigned.self_parent = None;
        unsigned.other_parent = Some(forged);
        unsigned.generation = 41;
        net.keys[1].sign_event(unsigned).into_hashed()
    }

    #[test]
    fn parent_descriptor_must_match_known_event() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let child = child_with_forged_parent(&net, &a);
        let mut intake = pipeline(&net, Arc::new(IntakeEventCounter::new()));
        let now = Instant::now();

        assert_eq!(intake.submit(IntakeInput::Hashed(a.clone()), None, now).unwrap().len(), 1);
        assert_eq!(
            intake.submit(IntakeInput::Hashed(child), None, now),
            Err(IntakeRejection::ParentMismatch(a.hash()))
        );
        assert_eq!(intake.orphan_count(), 0);
    }

    #[test]
    fn hash_match_alone_does_not_release_an_orphan() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let child = child_with_forged_parent(&net, &a);
        let mut intake = pipeline(&net, Arc::new(IntakeEventCounter::new()));
        let start = Instant::now();

        assert!(intake.submit(IntakeInput::Hashed(child), None, start).unwrap().is_empty());
        let ready = intake.submit(IntakeInput::Hashed(a.clone()), None, start).unwrap();
        assert_eq!(ready.iter().map(Event::hash).collect::<Vec<_>>(), vec![a.hash()]);
        assert_eq!(intake.orphan_count(), 1);
        assert_eq!(intake.sweep(start + Duration::from_secs(6)), 1);
    }

    #[test]
    fn disparate_copy_of_known_event_releases_its_slot() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let counter = Arc::new(IntakeEventCounter::new());
        let mut intake = pipeline_with(&net, counter.clone(), Arc::new(AcceptAll));
        let now = Instant::now();
        let peer = NodeId(1);
        counter.event_entered(peer);
        counter.event_entered(peer);

        assert_eq!(intake.submit(IntakeInput::Hashed(a.clone()), Some(peer), now).unwrap().len(), 1);
        let copy = GossipEvent::new(a.unsigned().clone(), vec![7u8; 64]);
        assert_eq!(
            intake.submit(IntakeInput::Unhashed(copy), Some(peer), now),
            Err(IntakeRejection::Duplicate)
        );
        assert_eq!(counter.backlog(peer), 0);
        assert_eq!(intake.dedup_counts(), (0, 1));
    }

    #[test]
    fn reset_drops_orphans_and_accepts_known_events_again() {
        let mut net = Network::new(&[10, 10]);
        let a = net.create(0, None);
        let b = net.create(1, Some(0));
        let orphan = net.create(0, Some(1));
        let counter = Arc::new(IntakeEventCounter::new());
        let mut intake = pipeline(&net, counter.clone());
        let now = Instant::now();
        let peer = NodeId(1);
        counter.event_entered(peer);
        counter.event_entered(peer);

        assert_eq!(intake.submit(IntakeInput::Hashed(a.clone()), Some(peer), now).unwrap().len(), 1);
        assert!(intake.submit(IntakeInput::Hashed(orphan), Some(peer), now).unwrap().is_empty());
        assert_eq!(counter.backlog(peer), 1);

        assert_eq!(intake.reset(EventWindow::genesis(AncientMode::BirthRoundThreshold)), 1);
        assert_eq!(intake.orphan_count(), 0);
        assert_eq!(counter.backlog(peer), 0);

        let ready = intake.submit(IntakeInput::Hashed(a.clone()), None, now).unwrap();
        assert_eq!(ready.iter().map(Event::hash).collect::<Vec<_>>(), vec![a.hash()]);
        assert_eq!(intake.submit(IntakeInput::Hashed(b), None, now).unwrap().len(), 1);
    }
}
