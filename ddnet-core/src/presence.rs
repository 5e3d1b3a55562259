//! Ephemeral presence tracking.
//!
//! Presence payloads are opaque application bytes keyed by peer. The tracker
//! is pure bookkeeping; transport and throttling live in the client crate.

use std::collections::HashMap;

use ddnet_types::PeerId;

/// Last-known presence payload per remote peer.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    states: HashMap<PeerId, Vec<u8>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload` as the latest presence for `peer`.
    ///
    /// Returns the previous payload, if any.
    pub fn update(&mut self, peer: PeerId, payload: Vec<u8>) -> Option<Vec<u8>> {
        self.states.insert(peer, payload)
    }

    /// Drop all state for a departed peer.
    pub fn remove(&mut self, peer: &PeerId) -> Option<Vec<u8>> {
        self.states.remove(peer)
    }

    /// Latest payload for `peer`, if one was seen.
    pub fn get(&self, peer: &PeerId) -> Option<&[u8]> {
        self.states.get(peer).map(Vec::as_slice)
    }

    /// Snapshot of all known peers and their latest payloads.
    pub fn snapshot(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.states
            .iter()
            .map(|(peer, payload)| (*peer, payload.clone()))
            .collect()
    }

    /// Number of peers with known presence.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no presence has been seen.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_types::{ClientId, DocumentId, PublicKeyBytes};

    fn peer(tag: u8) -> PeerId {
        let doc = DocumentId::derive(&PublicKeyBytes::new([tag; 33]), &[tag; 16]);
        let client = ClientId::from_bytes(&[tag; 16]).unwrap();
        PeerId::derive(&doc, &PublicKeyBytes::new([tag; 33]), &client)
    }

    #[test]
    fn update_stores_latest_payload() {
        let mut tracker = PresenceTracker::new();
        let p = peer(1);

        assert!(tracker.update(p, b"typing".to_vec()).is_none());
        assert_eq!(tracker.get(&p), Some(b"typing".as_slice()));

        let previous = tracker.update(p, b"idle".to_vec());
        assert_eq!(previous, Some(b"typing".to_vec()));
        assert_eq!(tracker.get(&p), Some(b"idle".as_slice()));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn remove_clears_peer_state() {
        let mut tracker = PresenceTracker::new();
        let p = peer(2);

        tracker.update(p, vec![1, 2, 3]);
        assert_eq!(tracker.remove(&p), Some(vec![1, 2, 3]));
        assert!(tracker.get(&p).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn snapshot_lists_all_peers() {
        let mut tracker = PresenceTracker::new();
        tracker.update(peer(1), b"a".to_vec());
        tracker.update(peer(2), b"b".to_vec());

        let mut snapshot = tracker.snapshot();
        snapshot.sort_by_key(|(_, payload)| payload.clone());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].1, b"a");
        assert_eq!(snapshot[1].1, b"b");
    }
}
