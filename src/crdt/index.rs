//! Per-client item index.
//!
//! For each client the sequence store keeps a vector of item handles
//! sorted by starting sequence number. Because every client's items
//! cover `[0, watermark]` with no gaps or overlaps, the vector is a
//! partition of that range, and a lookup by sequence number can start
//! from an interpolated guess instead of the middle: an entry's index is
//! roughly proportional to its sequence number.
//!
//! The index is maintained by the sequence store: fresh integrations
//! append (a new run always carries the client's highest sequence
//! numbers), splits insert the right half directly after the left, and
//! coalescing removes the absorbed entry.

use rustc_hash::FxHashMap;

use super::primitives::id::ClientId;
use super::sequence::ItemHandle;

/// Handle vectors per client, each sorted by starting sequence number.
#[derive(Clone, Debug, Default)]
pub struct ClientIndex {
    entries: FxHashMap<ClientId, Vec<ItemHandle>>,
}

impl ClientIndex {
    /// Create an empty index.
    pub fn new() -> ClientIndex {
        return ClientIndex {
            entries: FxHashMap::default(),
        };
    }

    /// The handle at `entry` for a client.
    #[inline]
    pub fn entry(&self, client: ClientId, entry: usize) -> ItemHandle {
        return self.entries[&client][entry];
    }

    /// All handles for a client, in sequence-number order.
    pub fn handles(&self, client: ClientId) -> &[ItemHandle] {
        return self
            .entries
            .get(&client)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
    }

    /// Iterate over the clients present in the index.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        return self.entries.keys().copied();
    }

    /// Append a handle for a client's newest run.
    pub fn push(&mut self, client: ClientId, handle: ItemHandle) {
        self.entries.entry(client).or_default().push(handle);
    }

    /// Insert the right half of a split directly after its left half.
    pub fn insert_after(&mut self, client: ClientId, entry: usize, handle: ItemHandle) {
        self.entries
            .get_mut(&client)
            .expect("split of an unindexed item")
            .insert(entry + 1, handle);
    }

    /// Remove the entry for a run absorbed by coalescing.
    pub fn remove(&mut self, client: ClientId, entry: usize) -> ItemHandle {
        return self
            .entries
            .get_mut(&client)
            .expect("removal from an unindexed client")
            .remove(entry);
    }

    /// Find the entry whose run covers `seq` for the given client.
    ///
    /// `span_of` maps a handle to the run's (starting seq, length). The
    /// search probes at `seq / last_covered_seq` of the vector first,
    /// then narrows with ordinary binary-search steps.
    pub fn find(
        &self,
        client: ClientId,
        seq: u32,
        span_of: impl Fn(ItemHandle) -> (u32, usize),
    ) -> Option<usize> {
        let entries = self.entries.get(&client)?;
        if entries.is_empty() {
            return None;
        }

        let last = entries.len() - 1;
        let (last_seq, last_len) = span_of(entries[last]);
        if last_seq == seq {
            // Fresh appends dominate real edit traces.
            return Some(last);
        }

        let top = last_seq as usize + last_len - 1;
        let probe = if top == 0 { 0 } else { seq as usize * last / top };

        let mut lo: isize = 0;
        let mut hi: isize = last as isize;
        let mut mid = probe.min(last) as isize;
        while lo <= hi {
            let (mid_seq, mid_len) = span_of(entries[mid as usize]);
            if mid_seq <= seq {
                if seq < mid_seq + mid_len as u32 {
                    return Some(mid as usize);
                }
                lo = mid + 1;
            } else {
                hi = mid - 1;
            }
            mid = (lo + hi) / 2;
        }

        return None;
    }
}
