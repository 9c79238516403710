//! The ordered item store.
//!
//! Items live in an arena and are addressed by integer handles; document
//! order is a doubly linked list threaded through the arena. This keeps
//! the cyclic pointer graph (sequence order, per-client index, and the
//! origin references that point back into both) free of actual cycles.
//!
//! The store owns three pieces of bookkeeping that must stay consistent
//! on every mutation:
//!
//! - the link structure (head, tail, prev/next),
//! - the visible-length counter (live characters only),
//! - the per-client index (sorted, contiguous, one entry per item).
//!
//! Slots of items absorbed by coalescing are invalidated and never
//! reused; a stale handle is an internal bug and panics on access.

use std::cmp::Ordering;

use crate::error::{DocError, Result};

use super::index::ClientIndex;
use super::item::Item;
use super::primitives::id::{ClientId, Id};
use super::primitives::version::Version;

// =============================================================================
// Handles and nodes
// =============================================================================

/// A stable reference to an item in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemHandle(u32);

impl ItemHandle {
    /// Create a handle from a raw arena index.
    pub fn new(index: u32) -> ItemHandle {
        return ItemHandle(index);
    }

    /// The raw arena index.
    #[inline]
    pub fn index(self) -> usize {
        return self.0 as usize;
    }
}

#[derive(Clone, Debug)]
struct Node {
    item: Item,
    prev: Option<ItemHandle>,
    next: Option<ItemHandle>,
}

// =============================================================================
// Sequence
// =============================================================================

/// The ordered collection of items, live and tombstoned.
#[derive(Clone, Debug, Default)]
pub struct Sequence {
    arena: Vec<Option<Node>>,
    head: Option<ItemHandle>,
    tail: Option<ItemHandle>,
    /// Live characters: the sum of `length` over non-deleted items.
    visible: usize,
    index: ClientIndex,
}

impl Sequence {
    /// Create an empty sequence.
    pub fn new() -> Sequence {
        return Sequence {
            arena: Vec::new(),
            head: None,
            tail: None,
            visible: 0,
            index: ClientIndex::new(),
        };
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    fn node(&self, h: ItemHandle) -> &Node {
        return self.arena[h.index()].as_ref().expect("stale item handle");
    }

    fn node_mut(&mut self, h: ItemHandle) -> &mut Node {
        return self.arena[h.index()].as_mut().expect("stale item handle");
    }

    /// The item behind a handle.
    pub fn item(&self, h: ItemHandle) -> &Item {
        return &self.node(h).item;
    }

    /// First item in document order.
    #[inline]
    pub fn head(&self) -> Option<ItemHandle> {
        return self.head;
    }

    /// Last item in document order, tombstones included.
    #[inline]
    pub fn tail(&self) -> Option<ItemHandle> {
        return self.tail;
    }

    /// The item after `h` in document order.
    #[inline]
    pub fn next(&self, h: ItemHandle) -> Option<ItemHandle> {
        return self.node(h).next;
    }

    /// The item before `h` in document order.
    #[inline]
    pub fn prev(&self, h: ItemHandle) -> Option<ItemHandle> {
        return self.node(h).prev;
    }

    /// Number of live characters.
    #[inline]
    pub fn visible_len(&self) -> usize {
        return self.visible;
    }

    /// Number of items currently linked, tombstones included.
    pub fn item_count(&self) -> usize {
        return self.iter().count();
    }

    /// Iterate items in document order.
    pub fn iter(&self) -> Items<'_> {
        return Items {
            sequence: self,
            cur: self.head,
        };
    }

    /// The visible text: live items concatenated in document order.
    pub fn content(&self) -> String {
        let mut out = String::new();
        for (_, item) in self.iter() {
            if !item.deleted {
                out.push_str(&item.content);
            }
        }
        return out;
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Find the item containing visible offset `pos`, skipping
    /// tombstones, and the offset within it.
    ///
    /// With `stick_end` the next item is returned when `pos` lands on an
    /// item boundary, even a tombstoned one; insert uses this so a run
    /// can anchor on the start of any item. Delete passes `false`.
    ///
    /// Fails with `OutOfBounds` carrying how far past the live length
    /// the position reached; an overflow of zero means exactly
    /// end-of-document, which insert accepts.
    pub fn find_by_visible_position(
        &self,
        pos: usize,
        stick_end: bool,
    ) -> Result<(ItemHandle, usize)> {
        let mut pos = pos;
        let mut cur = self.head;
        while let Some(h) = cur {
            let item = self.item(h);
            if stick_end && pos == 0 {
                return Ok((h, 0));
            }
            if !item.deleted {
                if item.length > pos {
                    return Ok((h, pos));
                }
                pos -= item.length;
            }
            cur = self.next(h);
        }
        return Err(DocError::OutOfBounds { overflow: pos });
    }

    /// Find the item covering a character identity and the offset of
    /// that character within it. O(log n) in the client's item count.
    pub fn find_by_identity(&self, id: Id) -> Result<(ItemHandle, usize)> {
        let entry = self
            .index_entry(id.client, id.seq)
            .ok_or(DocError::NotFound)?;
        let h = self.index.entry(id.client, entry);
        let offset = (id.seq - self.item(h).id.seq) as usize;
        return Ok((h, offset));
    }

    /// Resolve an origin to its item and offset; `None` stays `None`.
    pub fn resolve_origin(&self, origin: Option<Id>) -> Result<Option<(ItemHandle, usize)>> {
        return match origin {
            Some(id) => Ok(Some(self.find_by_identity(id)?)),
            None => Ok(None),
        };
    }

    /// Index entry covering `seq` for `client`, if any.
    fn index_entry(&self, client: ClientId, seq: u32) -> Option<usize> {
        let arena = &self.arena;
        return self.index.find(client, seq, |h| {
            let item = &arena[h.index()].as_ref().expect("stale handle in index").item;
            (item.id.seq, item.length)
        });
    }

    /// Same-list precedence: does `a` come before `b` in document order?
    ///
    /// `None` sorts before every real location as the left argument and
    /// after every real location as the right argument; two offsets into
    /// the same item compare directly. Otherwise both cursors walk
    /// forward in lock-step until one reaches the other's start or the
    /// end of the list. Linear in the distance between the two, which in
    /// practice is the length of a concurrent-sibling run.
    pub fn order(
        &self,
        a: Option<(ItemHandle, usize)>,
        b: Option<(ItemHandle, usize)>,
    ) -> Ordering {
        let ((ah, a_pos), (bh, b_pos)) = match (a, b) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => (a, b),
        };
        if ah == bh {
            return a_pos.cmp(&b_pos);
        }

        let mut after_a = Some(ah);
        let mut after_b = Some(bh);
        loop {
            after_a = after_a.and_then(|h| self.next(h));
            after_b = after_b.and_then(|h| self.next(h));
            if after_a == Some(bh) || after_b.is_none() {
                return Ordering::Less;
            }
            if after_b == Some(ah) || after_a.is_none() {
                return Ordering::Greater;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Insert a fresh item after `at`; `None` inserts at the front.
    ///
    /// The item must carry its client's highest sequence range, which is
    /// what integration guarantees; split halves take a different path.
    pub fn insert_after(&mut self, at: Option<ItemHandle>, item: Item) -> ItemHandle {
        self.visible += item.visible_len();
        let client = item.id.client;
        let h = self.alloc(item);
        self.link_after(at, h);
        self.index.push(client, h);
        return h;
    }

    /// Insert a fresh item before `at`; `None` inserts at the back.
    pub fn insert_before(&mut self, at: Option<ItemHandle>, item: Item) -> ItemHandle {
        self.visible += item.visible_len();
        let client = item.id.client;
        let h = self.alloc(item);
        self.link_before(at, h);
        self.index.push(client, h);
        return h;
    }

    /// Split the item at `pos` characters.
    ///
    /// Returns `(left, right)`: `(None, item)` at position zero,
    /// `(item, None)` at the full length, and the two halves otherwise.
    /// The right half enters the index directly after the left so the
    /// client's entries stay sorted and contiguous.
    pub fn split_two(
        &mut self,
        at: ItemHandle,
        pos: usize,
    ) -> (Option<ItemHandle>, Option<ItemHandle>) {
        let (client, seq, length) = {
            let item = self.item(at);
            (item.id.client, item.id.seq, item.length)
        };
        assert!(pos <= length, "split position out of range");
        if pos == 0 {
            return (None, Some(at));
        }
        if pos == length {
            return (Some(at), None);
        }

        let entry = self
            .index_entry(client, seq)
            .expect("split of an unindexed item");
        let right = self.node_mut(at).item.split(pos);
        let rh = self.alloc(right);
        self.link_after(Some(at), rh);
        self.index.insert_after(client, entry, rh);
        return (Some(at), Some(rh));
    }

    /// Split at an item-relative position and insert `item` there.
    /// Returns the handle of the inserted item.
    pub fn insert_at(&mut self, at: ItemHandle, pos: usize, item: Item) -> ItemHandle {
        let (left, right) = self.split_two(at, pos);
        return match right {
            Some(r) => self.insert_before(Some(r), item),
            None => self.insert_after(left, item),
        };
    }

    /// Tombstone a live item, removing its characters from the visible
    /// length.
    pub fn tombstone(&mut self, h: ItemHandle) {
        let node = self.node_mut(h);
        debug_assert!(!node.item.deleted, "tombstoning a tombstone");
        node.item.deleted = true;
        let length = node.item.length;
        self.visible -= length;
    }

    // -------------------------------------------------------------------------
    // Coalescing
    // -------------------------------------------------------------------------

    /// Whether `h` is the direct continuation of its predecessor.
    pub fn can_merge_left(&self, h: ItemHandle) -> bool {
        let Some(p) = self.node(h).prev else {
            return false;
        };
        return self.item(p).can_append(self.item(h));
    }

    /// Whether the successor of `h` is its direct continuation.
    pub fn can_merge_right(&self, h: ItemHandle) -> bool {
        return match self.next(h) {
            Some(n) => self.can_merge_left(n),
            None => false,
        };
    }

    /// Fuse `h` into its predecessor and return the survivor.
    ///
    /// The absorbed characters move rather than appear or disappear, so
    /// the visible length is untouched.
    pub fn merge_left(&mut self, h: ItemHandle) -> ItemHandle {
        assert!(self.can_merge_left(h), "items are not coalescible");
        let prev = self.node(h).prev.expect("checked by can_merge_left");
        let absorbed = self.unlink(h);
        self.node_mut(prev).item.append(absorbed);
        return prev;
    }

    /// Fuse the successor of `h` into `h` and return the survivor.
    pub fn merge_right(&mut self, h: ItemHandle) -> ItemHandle {
        let n = self.next(h).expect("no right item to merge with");
        return self.merge_left(n);
    }

    /// Unlink an item absorbed by coalescing: drop its index entry,
    /// splice it out of the list, and invalidate its slot.
    fn unlink(&mut self, h: ItemHandle) -> Item {
        let (client, seq) = {
            let item = self.item(h);
            (item.id.client, item.id.seq)
        };
        let entry = self
            .index_entry(client, seq)
            .expect("unlinked item missing from index");
        debug_assert_eq!(self.index.entry(client, entry), h);
        self.index.remove(client, entry);

        let node = self.arena[h.index()].take().expect("stale item handle");
        match node.prev {
            Some(p) => self.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        return node.item;
    }

    // -------------------------------------------------------------------------
    // Bookkeeping checks
    // -------------------------------------------------------------------------

    /// Verify that the per-client index partitions each client's
    /// observed range: entries sorted, contiguous from zero, no gaps or
    /// overlaps, ending at the version watermark, one entry per linked
    /// item. Panics on any inconsistency; meant for tests and fuzzing.
    pub fn check_index(&self, version: &Version) {
        let mut indexed = 0;
        for client in self.index.clients() {
            let mut expected = 0u32;
            for &h in self.index.handles(client) {
                let item = self.item(h);
                assert_eq!(item.id.client, client, "index entry under the wrong client");
                assert_eq!(item.id.seq, expected, "gap or overlap in client index");
                expected = item.end_seq();
                indexed += 1;
            }
            if expected > 0 {
                assert_eq!(
                    version.seen(client),
                    Some(expected - 1),
                    "index does not cover the observed range"
                );
            }
        }
        assert_eq!(indexed, self.item_count(), "index entry count out of sync");
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn alloc(&mut self, item: Item) -> ItemHandle {
        let h = ItemHandle(self.arena.len() as u32);
        self.arena.push(Some(Node {
            item,
            prev: None,
            next: None,
        }));
        return h;
    }

    /// Pointer surgery only; counters and index are the caller's job.
    fn link_after(&mut self, at: Option<ItemHandle>, h: ItemHandle) {
        match at {
            None => match self.head {
                None => {
                    self.head = Some(h);
                    self.tail = Some(h);
                }
                Some(old) => {
                    self.node_mut(old).prev = Some(h);
                    self.node_mut(h).next = Some(old);
                    self.head = Some(h);
                }
            },
            Some(at) => {
                let after = self.node(at).next;
                self.node_mut(at).next = Some(h);
                self.node_mut(h).prev = Some(at);
                self.node_mut(h).next = after;
                match after {
                    Some(n) => self.node_mut(n).prev = Some(h),
                    None => self.tail = Some(h),
                }
            }
        }
    }

    fn link_before(&mut self, at: Option<ItemHandle>, h: ItemHandle) {
        match at {
            None => match self.tail {
                None => {
                    self.head = Some(h);
                    self.tail = Some(h);
                }
                Some(old) => {
                    self.node_mut(old).next = Some(h);
                    self.node_mut(h).prev = Some(old);
                    self.tail = Some(h);
                }
            },
            Some(at) => {
                let before = self.node(at).prev;
                self.node_mut(at).prev = Some(h);
                self.node_mut(h).next = Some(at);
                self.node_mut(h).prev = before;
                match before {
                    Some(p) => self.node_mut(p).next = Some(h),
                    None => self.head = Some(h),
                }
            }
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Iterator over items in document order.
pub struct Items<'a> {
    sequence: &'a Sequence,
    cur: Option<ItemHandle>,
}

impl<'a> Iterator for Items<'a> {
    type Item = (ItemHandle, &'a Item);

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.cur?;
        self.cur = self.sequence.next(h);
        return Some((h, self.sequence.item(h)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(client: u16, seq: u32, content: &str) -> Item {
        return Item::new(
            Id::new(ClientId(client), seq),
            None,
            None,
            content.to_string(),
        );
    }

    #[test]
    fn empty_sequence() {
        let seq = Sequence::new();
        assert_eq!(seq.visible_len(), 0);
        assert_eq!(seq.content(), "");
        assert_eq!(seq.item_count(), 0);
        assert_eq!(
            seq.find_by_visible_position(0, false),
            Err(DocError::OutOfBounds { overflow: 0 })
        );
    }

    #[test]
    fn insert_links_and_counts() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "ab"));
        let b = seq.insert_after(Some(a), item(2, 0, "cd"));

        assert_eq!(seq.content(), "abcd");
        assert_eq!(seq.visible_len(), 4);
        assert_eq!(seq.head(), Some(a));
        assert_eq!(seq.tail(), Some(b));
        assert_eq!(seq.next(a), Some(b));
        assert_eq!(seq.prev(b), Some(a));
    }

    #[test]
    fn insert_after_none_goes_to_front() {
        let mut seq = Sequence::new();
        seq.insert_after(None, item(1, 0, "b"));
        seq.insert_after(None, item(2, 0, "a"));
        assert_eq!(seq.content(), "ab");
    }

    #[test]
    fn insert_before_none_goes_to_back() {
        let mut seq = Sequence::new();
        seq.insert_before(None, item(1, 0, "a"));
        seq.insert_before(None, item(2, 0, "b"));
        assert_eq!(seq.content(), "ab");
    }

    #[test]
    fn find_by_visible_position_skips_tombstones() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "ab"));
        let b = seq.insert_after(Some(a), item(2, 0, "cd"));
        seq.tombstone(a);

        let (h, offset) = seq.find_by_visible_position(1, false).unwrap();
        assert_eq!(h, b);
        assert_eq!(offset, 1);
    }

    #[test]
    fn stick_end_lands_on_tombstones() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "ab"));
        seq.insert_after(Some(a), item(2, 0, "cd"));
        seq.tombstone(a);

        // Position zero anchors on the tombstone itself.
        let (h, offset) = seq.find_by_visible_position(0, true).unwrap();
        assert_eq!(h, a);
        assert_eq!(offset, 0);

        // Without stick_end the tombstone is invisible.
        let (h, _) = seq.find_by_visible_position(0, false).unwrap();
        assert_ne!(h, a);
    }

    #[test]
    fn out_of_bounds_reports_overflow() {
        let mut seq = Sequence::new();
        seq.insert_after(None, item(1, 0, "abc"));

        assert_eq!(
            seq.find_by_visible_position(3, false),
            Err(DocError::OutOfBounds { overflow: 0 })
        );
        assert_eq!(
            seq.find_by_visible_position(5, false),
            Err(DocError::OutOfBounds { overflow: 2 })
        );
    }

    #[test]
    fn find_by_identity_offsets_into_runs() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "abc"));
        seq.insert_after(Some(a), item(1, 3, "de"));

        let (h, offset) = seq.find_by_identity(Id::new(ClientId(1), 1)).unwrap();
        assert_eq!((h, offset), (a, 1));
        let (_, offset) = seq.find_by_identity(Id::new(ClientId(1), 4)).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(
            seq.find_by_identity(Id::new(ClientId(1), 5)),
            Err(DocError::NotFound)
        );
        assert_eq!(
            seq.find_by_identity(Id::new(ClientId(9), 0)),
            Err(DocError::NotFound)
        );
    }

    #[test]
    fn split_two_updates_index_and_links() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "abcd"));

        let (left, right) = seq.split_two(a, 2);
        let (left, right) = (left.unwrap(), right.unwrap());
        assert_eq!(seq.item(left).content, "ab");
        assert_eq!(seq.item(right).content, "cd");
        assert_eq!(seq.next(left), Some(right));
        assert_eq!(seq.visible_len(), 4);
        assert_eq!(seq.content(), "abcd");

        // Both halves resolve by identity.
        let (h, offset) = seq.find_by_identity(Id::new(ClientId(1), 3)).unwrap();
        assert_eq!((h, offset), (right, 1));
    }

    #[test]
    fn split_two_at_boundaries_is_a_no_op() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "ab"));

        assert_eq!(seq.split_two(a, 0), (None, Some(a)));
        assert_eq!(seq.split_two(a, 2), (Some(a), None));
        assert_eq!(seq.item_count(), 1);
    }

    #[test]
    fn insert_at_splices_into_the_middle() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "ad"));
        let mid = seq.insert_at(a, 1, item(2, 0, "bc"));

        assert_eq!(seq.content(), "abcd");
        assert_eq!(seq.item(mid).content, "bc");
        assert_eq!(seq.item_count(), 3);
    }

    #[test]
    fn merge_left_fuses_split_halves() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "abcd"));
        let (_, right) = seq.split_two(a, 2);
        let right = right.unwrap();

        assert!(seq.can_merge_left(right));
        let survivor = seq.merge_left(right);
        assert_eq!(survivor, a);
        assert_eq!(seq.item(a).content, "abcd");
        assert_eq!(seq.item_count(), 1);
        assert_eq!(seq.visible_len(), 4);

        // The absorbed half's identities resolve through the survivor.
        let (h, offset) = seq.find_by_identity(Id::new(ClientId(1), 3)).unwrap();
        assert_eq!((h, offset), (a, 3));
    }

    #[test]
    fn merge_right_mirrors_merge_left() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "abcd"));
        let (_, right) = seq.split_two(a, 1);
        assert!(seq.can_merge_right(a));
        let survivor = seq.merge_right(a);
        assert_eq!(survivor, a);
        assert_eq!(seq.item(a).content, "abcd");
        assert!(right.is_some());
    }

    #[test]
    fn tombstone_halves_do_not_merge_with_live_halves() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "abcd"));
        let (_, right) = seq.split_two(a, 2);
        seq.tombstone(right.unwrap());

        assert!(!seq.can_merge_left(right.unwrap()));
        assert_eq!(seq.visible_len(), 2);
        assert_eq!(seq.content(), "ab");
    }

    #[test]
    fn order_walks_the_list() {
        let mut seq = Sequence::new();
        let a = seq.insert_after(None, item(1, 0, "a"));
        let b = seq.insert_after(Some(a), item(2, 0, "b"));
        let c = seq.insert_after(Some(b), item(3, 0, "c"));

        assert_eq!(seq.order(Some((a, 0)), Some((c, 0))), Ordering::Less);
        assert_eq!(seq.order(Some((c, 0)), Some((a, 0))), Ordering::Greater);
        assert_eq!(seq.order(Some((b, 0)), Some((b, 0))), Ordering::Equal);
        assert_eq!(seq.order(Some((b, 0)), Some((b, 1))), Ordering::Less);
        assert_eq!(seq.order(None, Some((a, 0))), Ordering::Less);
        assert_eq!(seq.order(Some((a, 0)), None), Ordering::Greater);
        assert_eq!(seq.order(None, None), Ordering::Equal);
    }
}
