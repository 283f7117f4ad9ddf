//! Codec-specific-data store.
//!
//! The platform decoder must see the current parameter sets after every
//! start and after every flush, before any payload. The store keeps the
//! ordered blob list (typically SPS then PPS) behind one comparator so that
//! every source of parameter sets — extradata at open, in-band SPS/PPS,
//! resends after a flush — funnels through the same state.

use tracing::debug;

/// Ordered codec-configuration blobs with a resend cursor.
#[derive(Debug, Default)]
pub struct CsdStore {
    blobs: Vec<Vec<u8>>,
    next_send: usize,
}

impl CsdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored blobs atomically and rearm the resend cursor.
    pub fn replace(&mut self, blobs: Vec<Vec<u8>>) {
        debug!(count = blobs.len(), "replacing codec configuration blobs");
        self.blobs = blobs;
        self.next_send = 0;
    }

    /// Whether `candidate` matches the stored sequence exactly.
    pub fn matches(&self, candidate: &[&[u8]]) -> bool {
        self.blobs.len() == candidate.len()
            && self
                .blobs
                .iter()
                .zip(candidate)
                .all(|(a, b)| a.as_slice() == *b)
    }

    /// Rearm the resend cursor; all blobs will be sent again before payload.
    pub fn rearm(&mut self) {
        self.next_send = 0;
    }

    /// Next blob awaiting resend, if any.
    ///
    /// The cursor moves only on [`advance`](Self::advance), after the blob
    /// was actually queued, so a failed or retried queue attempt cannot skip
    /// a parameter set.
    pub fn pending(&self) -> Option<&[u8]> {
        self.blobs.get(self.next_send).map(Vec::as_slice)
    }

    /// Commit the blob returned by the last [`pending`](Self::pending) call.
    pub fn advance(&mut self) {
        if self.next_send < self.blobs.len() {
            self.next_send += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(blobs: &[&[u8]]) -> CsdStore {
        let mut store = CsdStore::new();
        store.replace(blobs.iter().map(|b| b.to_vec()).collect());
        store
    }

    #[test]
    fn empty_store_has_nothing_pending() {
        let store = CsdStore::new();
        assert!(store.is_empty());
        assert_eq!(store.pending(), None);
    }

    #[test]
    fn drains_in_order() {
        let mut store = store_with(&[b"sps", b"pps"]);
        assert_eq!(store.pending(), Some(b"sps".as_slice()));
        store.advance();
        assert_eq!(store.pending(), Some(b"pps".as_slice()));
        store.advance();
        assert_eq!(store.pending(), None);
        store.advance(); // past the end is a no-op
        assert_eq!(store.pending(), None);
    }

    #[test]
    fn pending_is_stable_until_advance() {
        let store = store_with(&[b"sps"]);
        assert_eq!(store.pending(), Some(b"sps".as_slice()));
        assert_eq!(store.pending(), Some(b"sps".as_slice()));
    }

    #[test]
    fn rearm_restarts_the_resend() {
        let mut store = store_with(&[b"sps", b"pps"]);
        store.advance();
        store.advance();
        assert_eq!(store.pending(), None);
        store.rearm();
        assert_eq!(store.pending(), Some(b"sps".as_slice()));
    }

    #[test]
    fn replace_resets_cursor() {
        let mut store = store_with(&[b"old"]);
        store.advance();
        store.replace(vec![b"new".to_vec()]);
        assert_eq!(store.pending(), Some(b"new".as_slice()));
    }

    #[test]
    fn comparator() {
        let store = store_with(&[b"sps", b"pps"]);
        assert!(store.matches(&[b"sps", b"pps"]));
        assert!(!store.matches(&[b"sps"]));
        assert!(!store.matches(&[b"sps", b"ppsX"]));
        assert!(!store.matches(&[b"pps", b"sps"]));
    }
}
