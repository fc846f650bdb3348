//! Object identifier table and collision-free allocation.
//!
//! Identifiers are short uppercase hex tokens. Within one session namespace
//! no two simultaneously-active identifiers may collide, including ids
//! learned from remote peers. Local objects get sequential ids from an
//! [`IdTable`]; remote peers get uniform-random ids from an [`IdAllocator`]
//! which rerolls until the draw is unique.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::MAX_OBJECT_ID;

/// A short token uniquely identifying one tracked entity within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Build an id from a table index.
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Parse the uppercase hex token form.
    pub fn parse(token: &str) -> Result<Self, FormatError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(FormatError::InvalidObjectId(token.to_string()));
        }
        u32::from_str_radix(token, 16)
            .map(Self)
            .map_err(|_| FormatError::InvalidObjectId(token.to_string()))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

/// Monotonically-increasing identifier table for one session's local
/// objects. The first key seen gets id 1, the next 2, and so on.
#[derive(Debug, Default)]
pub struct IdTable {
    ids: BTreeMap<String, ObjectId>,
    next: u32,
}

impl IdTable {
    pub fn new() -> Self {
        Self {
            ids: BTreeMap::new(),
            next: 1,
        }
    }

    /// Look up the id for `key`, allocating the next id on first sight.
    /// Returns the id and whether it was freshly allocated.
    pub fn get_or_insert(&mut self, key: &str) -> (ObjectId, bool) {
        if let Some(id) = self.ids.get(key) {
            return (*id, false);
        }
        let id = ObjectId(self.next);
        self.next += 1;
        self.ids.insert(key.to_string(), id);
        (id, true)
    }

    pub fn get(&self, key: &str) -> Option<ObjectId> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Session-wide registry of every identifier in use, local or learned from
/// peers. Random allocation rerolls until the draw does not collide; the
/// allocated id itself joins the in-use set.
#[derive(Debug, Default)]
pub struct IdAllocator {
    in_use: HashSet<ObjectId>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            in_use: HashSet::new(),
        }
    }

    /// Register an identifier learned from elsewhere (the local log, the
    /// handshake file, a peer). Idempotent.
    pub fn register(&mut self, id: ObjectId) {
        self.in_use.insert(id);
    }

    /// Allocate a fresh random identifier, rerolling on collision.
    pub fn allocate<R: Rng>(&mut self, rng: &mut R) -> Result<ObjectId, FormatError> {
        // The draw range mirrors the recorded id space plus two, so the
        // exhaustion guard below can actually trigger before looping forever.
        let space = MAX_OBJECT_ID as usize + 2;
        if self.in_use.len() >= space {
            return Err(FormatError::IdSpaceExhausted);
        }
        loop {
            let candidate = ObjectId(rng.gen_range(1..=MAX_OBJECT_ID + 2));
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.in_use.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }
}

/// Replace the object-id token of a formatted entry line with a locally
/// allocated identifier.
///
/// The entry grammar is `#<ts>\n<id>,<fields...>`; the sender's own id in
/// the second line may collide with identifiers already active in the
/// local session, so merged entries carry the locally allocated id
/// instead.
pub fn rewrite_object_id(entry: &str, id: ObjectId) -> Result<String, FormatError> {
    let newline = entry.find('\n').ok_or_else(|| FormatError::InvalidObjectId(entry.to_string()))?;
    let rest = &entry[newline + 1..];
    let comma = rest
        .find(',')
        .ok_or_else(|| FormatError::InvalidObjectId(rest.to_string()))?;
    // Validate the token being replaced
    ObjectId::parse(&rest[..comma])?;
    Ok(format!("{}\n{}{}", &entry[..newline], id, &rest[comma..]))
}
