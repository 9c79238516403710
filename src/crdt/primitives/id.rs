//! Identity types for items and the characters inside them.
//!
//! Every character ever inserted is named by an [`Id`]: the replica that
//! authored it plus a per-replica counter. The counter advances once per
//! character, not once per operation, so a three-character insert claims
//! three consecutive sequence numbers. An item covers the contiguous
//! identity range starting at its `id`.
//!
//! The head-of-document and tail-of-document origins have no identity;
//! they are represented as `None` wherever an `Option<Id>` appears.

use std::cmp::Ordering;
use std::fmt;

/// A compact replica identifier.
///
/// Replicas are small integers assigned out of band. The identifier
/// doubles as the tie-breaker when two replicas insert at the same
/// logical boundary, so its ordering must be total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u16);

/// The identity of a single character: who wrote it, and which of their
/// characters it is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    /// The replica that authored the character.
    pub client: ClientId,
    /// Per-replica counter over characters emitted.
    pub seq: u32,
}

impl Id {
    /// Create a new identity.
    pub fn new(client: ClientId, seq: u32) -> Id {
        return Id { client, seq };
    }

    /// The identity `n` characters later in the same run.
    pub fn offset(&self, n: usize) -> Id {
        return Id {
            client: self.client,
            seq: self.seq + n as u32,
        };
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare by client first, then by seq
        match self.client.cmp(&other.client) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other => other,
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}:{}", self.client.0, self.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_ordering() {
        let a = Id::new(ClientId(1), 1);
        let b = Id::new(ClientId(1), 2);
        let c = Id::new(ClientId(2), 0);

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn offset_arithmetic() {
        let id = Id::new(ClientId(3), 10);
        assert_eq!(id.offset(0), id);
        assert_eq!(id.offset(5), Id::new(ClientId(3), 15));
    }

    #[test]
    fn bottom_aware_equality() {
        // Head/tail origins are None; equality must treat them as a
        // distinct value, not as equal to any real identity.
        let some = Some(Id::new(ClientId(0), 0));
        let none: Option<Id> = None;

        assert_eq!(none, None);
        assert_ne!(some, none);
        assert_eq!(some, Some(Id::new(ClientId(0), 0)));
    }

    #[test]
    fn debug_format() {
        let id = Id::new(ClientId(2), 7);
        assert_eq!(format!("{:?}", id), "2:7");
    }
}
