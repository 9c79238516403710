//! Per-client version vectors.
//!
//! A [`Version`] records, for each client, the highest sequence number
//! this replica has integrated (inclusive). Because sequence numbers
//! start at zero, "never seen anything from this client" and "seen
//! sequence number zero" are different states; the map distinguishes
//! them by absence rather than by a zero default.
//!
//! Only integration advances the vector.

use rustc_hash::FxHashMap;

use super::id::{ClientId, Id};

/// Per-client high-water marks of observed sequence numbers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    entries: FxHashMap<ClientId, u32>,
}

impl Version {
    /// Create an empty version vector.
    pub fn new() -> Version {
        return Version {
            entries: FxHashMap::default(),
        };
    }

    /// The highest observed sequence number for a client, if any.
    #[inline]
    pub fn seen(&self, client: ClientId) -> Option<u32> {
        return self.entries.get(&client).copied();
    }

    /// The sequence number the next run from this client must start at.
    #[inline]
    pub fn next_seq(&self, client: ClientId) -> u32 {
        return match self.seen(client) {
            Some(seq) => seq + 1,
            None => 0,
        };
    }

    /// Raise the watermark for a client to at least `seq`.
    pub fn observe(&mut self, client: ClientId, seq: u32) {
        let entry = self.entries.entry(client).or_insert(seq);
        *entry = (*entry).max(seq);
    }

    /// Whether a character identity has been observed.
    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        return match self.seen(id.client) {
            Some(seq) => id.seq <= seq,
            None => false,
        };
    }

    /// Whether an origin has been observed. The head/tail origin is
    /// trivially contained.
    #[inline]
    pub fn contains_origin(&self, origin: Option<Id>) -> bool {
        return match origin {
            Some(id) => self.contains(id),
            None => true,
        };
    }

    /// Iterate over all (client, watermark) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u32)> + '_ {
        return self.entries.iter().map(|(c, s)| (*c, *s));
    }
}
