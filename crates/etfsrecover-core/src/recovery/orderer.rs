//! Recovery ordering
//!
//! Replay order is ascending sequence number. Colliding sequence numbers are
//! broken by ascending physical offset so the order is total and repeatable.

use super::scanner::ScannedEntry;

/// Sort scanned entries into replay order
pub fn order_for_replay(mut entries: Vec<ScannedEntry>) -> Vec<ScannedEntry> {
    entries.sort_by_key(|entry| (entry.transaction.sequence, entry.physical_offset));

    let collisions = entries
        .windows(2)
        .filter(|pair| pair[0].transaction.sequence == pair[1].transaction.sequence)
        .count();
    if collisions > 0 {
        tracing::warn!(
            "{} sequence number collisions; falling back to physical offset order",
            collisions
        );
    }

    entries
}
