use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ApiError;

/// Per-file generation counters for optimistic concurrency.
///
/// Counters live only in memory: a restart forgets them and every open
/// editor must reload. What the tracker does NOT see is edits made to the
/// files by other processes; only saves racing through this server are
/// detected.
#[derive(Debug, Default)]
pub struct VersionTracker {
    generations: Mutex<HashMap<String, u64>>,
}

impl VersionTracker {
    /// Returns the current generation for a file, recording 0 the first
    /// time the file is seen in this process.
    pub fn get_or_init(&self, filename: &str) -> u64 {
        let mut map = self.generations.lock().unwrap();
        *map.entry(filename.to_string()).or_insert(0)
    }

    /// Atomically compares the claimed generation with the stored one and,
    /// on a match, advances it by exactly 1.
    ///
    /// A stale claim leaves the map untouched and reports the generation
    /// the caller would need to have.
    pub fn check_and_advance(&self, filename: &str, claimed: u64) -> Result<u64, ApiError> {
        let mut map = self.generations.lock().unwrap();
        let current = map.entry(filename.to_string()).or_insert(0);

        if *current != claimed {
            return Err(ApiError::Conflict { current: *current });
        }

        *current += 1;
        Ok(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero_and_advances_by_one() {
        let tracker = VersionTracker::default();
        assert_eq!(tracker.get_or_init("notes.txt"), 0);
        assert_eq!(tracker.check_and_advance("notes.txt", 0).unwrap(), 1);
        assert_eq!(tracker.check_and_advance("notes.txt", 1).unwrap(), 2);
        assert_eq!(tracker.get_or_init("notes.txt"), 2);
    }

    #[test]
    fn stale_claim_is_rejected_without_mutation() {
        let tracker = VersionTracker::default();
        tracker.check_and_advance("notes.txt", 0).unwrap();

        let err = tracker.check_and_advance("notes.txt", 0).unwrap_err();
        assert!(matches!(err, ApiError::Conflict { current: 1 }));
        // Still at 1: the failed attempt consumed nothing.
        assert_eq!(tracker.get_or_init("notes.txt"), 1);
    }

    #[test]
    fn files_are_tracked_independently() {
        let tracker = VersionTracker::default();
        tracker.check_and_advance("a.txt", 0).unwrap();
        tracker.check_and_advance("a.txt", 1).unwrap();
        assert_eq!(tracker.get_or_init("b.txt"), 0);
    }

    #[test]
    fn two_racing_saves_have_exactly_one_winner() {
        let tracker = Arc::new(VersionTracker::default());
        tracker.get_or_init("notes.txt");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.check_and_advance("notes.txt", 0).is_ok())
            })
            .collect();

        let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(wins.iter().filter(|w| **w).count(), 1);
        assert_eq!(tracker.get_or_init("notes.txt"), 1);
    }
}
