use hashweave_state::{SignedState, SignedStateNexus, SignedStateParams, StateTree};
use hashweave_types::{AncientMode, EventWindow, RunningEventHash, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn state(round: u64, notice: tokio::sync::mpsc::UnboundedSender<u64>) -> Arc<SignedState> {
    let tree = StateTree::from_leaves(vec![round.to_be_bytes().to_vec()], 2).unwrap();
    SignedState::with_destruction_notice(
        SignedStateParams {
            round,
            tree: Arc::new(tree),
            running_event_hash: RunningEventHash::default(),
            consensus_timestamp: Timestamp::from_millis(round),
            consensus_event_count: round,
            event_window: EventWindow::genesis(AncientMode::BirthRoundThreshold),
            epoch_hash: None,
            snapshot: None,
        },
        Some(notice),
    )
}

#[test]
fn interleaved_set_and_get_destroy_every_state_once() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let nexus = Arc::new(SignedStateNexus::new());
    let done = Arc::new(AtomicBool::new(false));
    let rounds = 500u64;

    let readers: Vec<_> = (0..6u64)
        .map(|seed| {
            let nexus = nexus.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut held = Vec::new();
                let mut last_round = 0;
                while !done.load(Ordering::Acquire) {
                    if let Some(reserved) = nexus.get("reader") {
                        assert!(!reserved.is_destroyed());
                        assert!(reserved.tree().is_some());
                        assert!(reserved.round() >= last_round);
                        last_round = reserved.round();
                        held.push(reserved);
                    }
                    if held.len() > rng.gen_range(0..8) {
                        held.remove(rng.gen_range(0..held.len()));
                    }
                }
            })
        })
        .collect();

    let states: Vec<_> = (1..=rounds).map(|round| state(round, tx.clone())).collect();
    for state in &states {
        nexus.set(state.try_reserve("nexus"));
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    nexus.clear();

    let mut destroyed = Vec::new();
    while let Ok(round) = rx.try_recv() {
        destroyed.push(round);
    }
    destroyed.sort_unstable();
    assert_eq!(destroyed, (1..=rounds).collect::<Vec<_>>());
    assert!(states.iter().all(|s| s.is_destroyed() && s.reservation_count() == 0));
}
