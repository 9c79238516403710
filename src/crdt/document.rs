//! The replicated document.
//!
//! A [`Document`] is one replica's complete state: the ordered item
//! store plus the version vector of everything it has integrated. Local
//! edits translate visible positions into new items or tombstones;
//! remote items arrive through [`Document::merge_from`] and pass through
//! the same integration routine local inserts use.
//!
//! # Integration
//!
//! Placement of a new item among concurrent siblings follows the Fugue
//! rule. Starting just after the item's left origin, the scan walks
//! toward the right origin comparing each encountered item's origins
//! with the new item's:
//!
//! - an item whose left origin precedes ours ends the scan; we belong
//!   before it,
//! - a sibling with both origins equal to ours is ordered by client id,
//! - a sibling whose right origin precedes ours may still be overtaken,
//!   so the scan continues without moving the destination,
//! - everything else moves the destination past the examined item.
//!
//! Left-origin precedence gives runs a left-to-right bias, and the
//! client tie-break makes the order total, so every replica that has
//! seen the same items arrives at the same sequence.
//!
//! # Merge
//!
//! `merge_from(dest, src)` reconciles in two phases: first every run
//! present in `src` but unknown to `dest` is cropped to its unseen
//! suffix and integrated once its causal prerequisites are in, then
//! `src`'s tombstones are carved into `dest`. The call works in one
//! direction; reconciling two replicas takes one call each way.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{DocError, Result};

use super::item::Item;
use super::primitives::id::{ClientId, Id};
use super::primitives::version::Version;
use super::sequence::Sequence;

/// One replica of the shared text.
#[derive(Clone, Default)]
pub struct Document {
    sequence: Sequence,
    version: Version,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Document {
        return Document {
            sequence: Sequence::new(),
            version: Version::new(),
        };
    }

    /// Number of visible characters, in code points.
    pub fn len(&self) -> usize {
        return self.sequence.visible_len();
    }

    /// Whether the visible text is empty.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// The visible text: live runs concatenated in document order.
    pub fn content(&self) -> String {
        return self.sequence.content();
    }

    /// Number of items in the sequence, tombstones included. Exposed
    /// for measuring fragmentation.
    pub fn item_count(&self) -> usize {
        return self.sequence.item_count();
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Insert `content` at visible position `pos` on behalf of `client`.
    ///
    /// `pos` may equal the current length, which appends. The origins of
    /// the new run are the characters visibly adjacent to `pos` at this
    /// moment; they anchor the run for every future integration.
    pub fn insert(&mut self, client: ClientId, pos: usize, content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(DocError::InvalidArgument("insert content must not be empty"));
        }

        let anchor = match self.sequence.find_by_visible_position(pos, true) {
            Ok(found) => Some(found),
            // An overflow of zero is an append at end-of-document.
            Err(DocError::OutOfBounds { overflow: 0 }) => None,
            Err(err) => return Err(err),
        };

        let (origin_left, origin_right) = match anchor {
            None => {
                // End of document. The raw tail supplies the left
                // origin even when it is a tombstone.
                let left = self.sequence.tail().map(|t| self.sequence.item(t).last_id());
                (left, None)
            }
            Some((h, 0)) => {
                // Start of an item; the previous item supplies the left
                // origin, tombstoned or not.
                let left = self.sequence.prev(h).map(|p| self.sequence.item(p).last_id());
                (left, Some(self.sequence.item(h).id))
            }
            Some((h, within)) => {
                let item = self.sequence.item(h);
                (Some(item.id_at(within - 1)), Some(item.id_at(within)))
            }
        };

        let seq = self.version.next_seq(client);
        let item = Item::new(Id::new(client, seq), origin_left, origin_right, content.to_string());
        return self.integrate(item);
    }

    /// Tombstone `length` visible characters starting at `pos`.
    ///
    /// The affected runs stay in the sequence as tombstones; only their
    /// visibility changes. Nothing is mutated unless the whole range is
    /// deletable.
    pub fn delete(&mut self, pos: usize, length: usize) -> Result<()> {
        if length == 0 {
            return Err(DocError::InvalidArgument("delete length must be positive"));
        }
        let (start, within) = self.sequence.find_by_visible_position(pos, false)?;
        if pos + length > self.sequence.visible_len() {
            return Err(DocError::InsufficientItems);
        }

        // Work from an item boundary; keep the prefix of a mid-item start.
        let mut cur = if within > 0 {
            let (_, right) = self.sequence.split_two(start, within);
            right
        } else {
            Some(start)
        };

        let mut remaining = length;
        while remaining > 0 {
            let Some(h) = cur else { break };
            let (dead, len) = {
                let item = self.sequence.item(h);
                (item.deleted, item.length)
            };
            if dead {
                cur = self.sequence.next(h);
                continue;
            }
            if remaining >= len {
                remaining -= len;
                self.sequence.tombstone(h);
                let mut survivor = h;
                if self.sequence.can_merge_left(survivor) {
                    survivor = self.sequence.merge_left(survivor);
                }
                if self.sequence.can_merge_right(survivor) {
                    self.sequence.merge_right(survivor);
                }
                cur = self.sequence.next(survivor);
            } else {
                // The run outlives the deletion; tombstone a prefix.
                let (left, _) = self.sequence.split_two(h, remaining);
                let left = left.expect("prefix split is non-empty");
                self.sequence.tombstone(left);
                if self.sequence.can_merge_left(left) {
                    self.sequence.merge_left(left);
                }
                return Ok(());
            }
        }
        debug_assert_eq!(remaining, 0, "length was validated up front");
        return Ok(());
    }

    // =========================================================================
    // Integration
    // =========================================================================

    /// Place a new item deterministically among concurrent siblings.
    ///
    /// The item's sequence number must be the next one expected from its
    /// client. On success the version vector covers the whole run.
    fn integrate(&mut self, item: Item) -> Result<()> {
        let id = item.id;
        if id.seq != self.version.next_seq(id.client) {
            return Err(DocError::InvalidSeq);
        }
        self.version.observe(id.client, id.seq + item.length as u32 - 1);

        // Initial destination: just after the left origin's character,
        // rolling over to the next item when that character is the last
        // of its run.
        let left = self.sequence.resolve_origin(item.origin_left)?;
        let mut dest = self.sequence.head();
        let mut dest_within = 0;
        if let Some((lh, l_pos)) = left {
            dest = Some(lh);
            dest_within = l_pos + 1;
            if dest_within > self.sequence.item(lh).length - 1 {
                dest = self.sequence.next(lh);
                dest_within = 0;
            }
        }
        let right = self.sequence.resolve_origin(item.origin_right)?;
        let right_handle = right.map(|(h, _)| h);

        // Scan forward for the final insertion point. The tentative
        // destination trails the cursor and only advances while
        // `scanning` is false.
        let mut scanning = false;
        let mut other = dest;
        loop {
            if !scanning {
                dest = other;
            }
            let Some(oh) = other else { break };
            if Some(oh) == right_handle {
                break;
            }

            let (other_left, other_right, other_client) = {
                let o = self.sequence.item(oh);
                (o.origin_left, o.origin_right, o.id.client)
            };
            let o_left = self.sequence.resolve_origin(other_left)?;
            match self.sequence.order(o_left, left) {
                // Its left origin precedes ours: we belong before it.
                Ordering::Less => break,
                Ordering::Equal => {
                    let o_right = self.sequence.resolve_origin(other_right)?;
                    let order_right = self.sequence.order(o_right, right);
                    if order_right == Ordering::Equal && id.client < other_client {
                        break;
                    }
                    // A sibling reaching less far right may still be
                    // overtaken; hold the destination while it might.
                    scanning = order_right == Ordering::Less;
                }
                Ordering::Greater => scanning = false,
            }
            dest_within = 0;
            other = self.sequence.next(oh);
        }

        let placed = match dest {
            None => self.sequence.insert_after(self.sequence.tail(), item),
            Some(dh) => self.sequence.insert_at(dh, dest_within, item),
        };
        if self.sequence.can_merge_left(placed) {
            self.sequence.merge_left(placed);
        }
        return Ok(());
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Reconcile this document with another replica's state.
    ///
    /// One-directional: `self` learns everything `src` knows, `src` is
    /// untouched. Call once in each direction to equalize two replicas.
    ///
    /// On error `self` may hold any prefix of the integrated items and
    /// should be discarded.
    pub fn merge_from(&mut self, src: &Document) -> Result<()> {
        // Phase 1: integrate runs we have not seen, cropped to their
        // unseen suffix. Candidates wait until their causal
        // prerequisites (predecessor character and both origins) are
        // covered by our version; repeated passes drain the list.
        let mut missing: Vec<Item> = src
            .sequence
            .iter()
            .filter_map(|(_, item)| crop_to_unseen(item, &self.version))
            .collect();

        while !missing.is_empty() {
            let mut progressed = false;
            let mut i = 0;
            while i < missing.len() {
                if self.can_insert_now(&missing[i]) {
                    let item = missing.remove(i);
                    self.integrate(item)?;
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            if !progressed {
                return Err(DocError::IntegrationDeadlock);
            }
        }

        // Phase 2: carve src's tombstones into our items. Idempotent;
        // already-tombstoned ranges are skipped.
        for (_, from) in src.sequence.iter() {
            if !from.deleted {
                continue;
            }
            self.apply_tombstone(from.id, from.length);
        }
        return Ok(());
    }

    /// Whether a candidate's causal prerequisites are all integrated.
    fn can_insert_now(&self, item: &Item) -> bool {
        if self.version.contains(item.id) {
            return false;
        }
        if item.id.seq > 0 && !self.version.contains(Id::new(item.id.client, item.id.seq - 1)) {
            return false;
        }
        return self.version.contains_origin(item.origin_left)
            && self.version.contains_origin(item.origin_right);
    }

    /// Tombstone every live character of ours covered by the identity
    /// range `[from_id.seq, from_id.seq + from_len)`.
    fn apply_tombstone(&mut self, from_id: Id, from_len: usize) {
        let from_end = from_id.seq + from_len as u32;
        let mut cur = self.sequence.head();
        while let Some(h) = cur {
            let (id, len, dead) = {
                let item = self.sequence.item(h);
                (item.id, item.length, item.deleted)
            };
            let end = id.seq + len as u32;
            let overlaps = id.client == from_id.client && from_id.seq < end && id.seq < from_end;
            if dead || !overlaps {
                cur = self.sequence.next(h);
                continue;
            }

            // Carve the overlap out as its own item and tombstone it.
            let skip = from_id.seq.saturating_sub(id.seq) as usize;
            let keep = end.saturating_sub(from_end) as usize;
            let overlap = len - skip - keep;
            let (_, target) = self.sequence.split_two(h, skip);
            let target = target.expect("overlap begins inside the item");
            let (middle, _) = self.sequence.split_two(target, overlap);
            let mut middle = middle.expect("overlap is non-empty");
            self.sequence.tombstone(middle);
            if self.sequence.can_merge_left(middle) {
                middle = self.sequence.merge_left(middle);
            }
            if self.sequence.can_merge_right(middle) {
                self.sequence.merge_right(middle);
            }
            cur = self.sequence.next(middle);
        }
    }

    // =========================================================================
    // Bookkeeping checks
    // =========================================================================

    /// Verify the internal bookkeeping: cached lengths, the visible
    /// counter, origin resolvability, coalesced form, and the
    /// index/version partition. Panics on any violation; meant for
    /// tests and fuzzing.
    pub fn check_consistency(&self) {
        let mut live_chars = 0;
        for (h, item) in self.sequence.iter() {
            assert_eq!(
                item.content.chars().count(),
                item.length,
                "cached length out of sync"
            );
            assert!(item.length > 0, "zero-length item");
            if !item.deleted {
                live_chars += item.length;
            }
            let resolved = self
                .sequence
                .find_by_identity(item.id)
                .expect("item missing from index");
            assert_eq!(resolved, (h, 0), "index resolves to the wrong item");
            self.sequence
                .resolve_origin(item.origin_left)
                .expect("dangling left origin");
            self.sequence
                .resolve_origin(item.origin_right)
                .expect("dangling right origin");
            assert!(
                !self.sequence.can_merge_left(h),
                "adjacent items left uncoalesced"
            );
        }
        assert_eq!(live_chars, self.sequence.visible_len(), "visible count drifted");
        assert_eq!(self.content().chars().count(), self.sequence.visible_len());
        self.sequence.check_index(&self.version);
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Document {{")?;
        for (_, item) in self.sequence.iter() {
            writeln!(
                f,
                "  '{}' id={:?} left={:?} right={:?} deleted={} len={}",
                item.content.replace('\n', "\\n"),
                item.id,
                item.origin_left,
                item.origin_right,
                item.deleted,
                item.length
            )?;
        }
        writeln!(f, "  visible: {}", self.sequence.visible_len())?;
        for (client, seq) in self.version.iter() {
            writeln!(f, "  client {} seen {}", client.0, seq)?;
        }
        return write!(f, "}}");
    }
}

/// Crop a remote run against what `version` already covers.
///
/// Returns the run unchanged when fully unseen, its unseen suffix when
/// partially covered, and `None` when the version covers all of it.
fn crop_to_unseen(item: &Item, version: &Version) -> Option<Item> {
    let Some(seen) = version.seen(item.id.client) else {
        return Some(item.clone());
    };
    let last = item.id.seq + item.length as u32 - 1;
    if seen >= last {
        return None;
    }
    if seen < item.id.seq {
        return Some(item.clone());
    }
    let skip = (seen - item.id.seq + 1) as usize;
    return Some(item.suffix(skip));
}
