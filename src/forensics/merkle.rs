//! Merkle tree over event batches.
//!
//! Leaves are SHA-256 digests of each event's canonical JSON form
//! (deterministic because the event maps are ordered). Levels reduce
//! pair-wise; an odd node count duplicates the last node. The root is
//! what gets chained and signed.

use crate::error::{Result, SiemError};
use crate::model::Event;
use sha2::{Digest, Sha256};

const COMPONENT: &str = "forensics";

/// SHA-256 of the event's canonical JSON serialisation.
pub fn event_leaf(ev: &Event) -> Result<[u8; 32]> {
    let bytes = serde_json::to_vec(ev).map_err(|e| SiemError::serde(COMPONENT, e))?;
    Ok(Sha256::digest(&bytes).into())
}

/// Merkle root over the events, in sequence order. An empty batch is
/// an error: there is nothing to seal.
pub fn merkle_root(events: &[Event]) -> Result<[u8; 32]> {
    if events.is_empty() {
        return Err(SiemError::malformed(
            COMPONENT,
            "cannot build a merkle tree over zero events",
        ));
    }

    let mut level: Vec<[u8; 32]> = Vec::with_capacity(events.len());
    for ev in events {
        level.push(event_leaf(ev)?);
    }

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut hasher = Sha256::new();
            hasher.update(pair[0]);
            hasher.update(pair[1]);
            next.push(hasher.finalize().into());
        }
        level = next;
    }
    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn fixed_event(id: &str, message: &str) -> Event {
        let mut ev = Event::new("test", "h1", message);
        ev.id = id.to_string();
        ev.timestamp = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ev
    }

    #[test]
    fn root_is_deterministic() {
        let events = vec![fixed_event("a", "one"), fixed_event("b", "two")];
        assert_eq!(merkle_root(&events).unwrap(), merkle_root(&events).unwrap());
    }

    #[test]
    fn root_depends_on_order_and_content() {
        let ab = vec![fixed_event("a", "one"), fixed_event("b", "two")];
        let ba = vec![fixed_event("b", "two"), fixed_event("a", "one")];
        assert_ne!(merkle_root(&ab).unwrap(), merkle_root(&ba).unwrap());

        let mutated = vec![fixed_event("a", "one"), fixed_event("b", "two!")];
        assert_ne!(merkle_root(&ab).unwrap(), merkle_root(&mutated).unwrap());
    }

    #[test]
    fn identical_serialisations_give_identical_roots() {
        // two events that serialise to the same bytes are
        // interchangeable at the same positions
        let x = fixed_event("a", "same");
        let y = fixed_event("a", "same");
        assert_eq!(
            serde_json::to_vec(&x).unwrap(),
            serde_json::to_vec(&y).unwrap()
        );
        let with_x = vec![x, fixed_event("b", "other")];
        let with_y = vec![y, fixed_event("b", "other")];
        assert_eq!(redo(&with_x), redo(&with_y));
    }

    #[test]
    fn odd_count_duplicates_last_leaf() {
        // root(a, b, c) must equal root over (a, b, c, c) by construction
        let a = fixed_event("a", "1");
        let b = fixed_event("b", "2");
        let c = fixed_event("c", "3");
        let odd = merkle_root(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let padded = merkle_root(&[a, b, c.clone(), c]).unwrap();
        assert_eq!(odd, padded);
    }

    #[test]
    fn single_event_root_is_its_leaf() {
        let ev = fixed_event("solo", "only");
        assert_eq!(merkle_root(&[ev.clone()]).unwrap(), event_leaf(&ev).unwrap());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(merkle_root(&[]).is_err());
    }

    fn redo(events: &[Event]) -> [u8; 32] {
        merkle_root(events).unwrap()
    }

    #[test]
    fn larger_batches_reduce_consistently() {
        let events: Vec<Event> = (0..7)
            .map(|i| fixed_event(&format!("e{i}"), &format!("msg {i}")))
            .collect();
        // stable across invocations, sensitive to truncation
        assert_eq!(redo(&events), redo(&events));
        assert_ne!(redo(&events), redo(&events[..6]));
    }
}
