//! Canonical print lookup
//!
//! Reprints of the same card (promo and set versions, alternate numbering)
//! are collapsed onto one canonical [`CardKey`] before anything is counted.
//! The table is an explicit read-only dependency: callers load it, share it
//! behind an `Arc`, and decide when to refresh it.
//!
//! The on-disk format is the `synonyms.json` produced by ingestion:
//!
//! ```json
//! {
//!   "synonyms":   { "Dusknoir::PRE::037": "Dusknoir::SFA::020" },
//!   "canonicals": { "Dusknoir": "Dusknoir::SFA::020" }
//! }
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::card_key::CardKey;
use crate::error::Result;

/// Maps a card printing to the printing it should be counted as
pub trait CanonicalCards: Send + Sync {
    /// Canonical key for `key`; returns `key` itself when it has no synonym
    fn canonical(&self, key: &CardKey) -> CardKey;
}

/// No-op lookup: every printing is its own canonical form
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCards;

impl CanonicalCards for IdentityCards {
    fn canonical(&self, key: &CardKey) -> CardKey {
        key.clone()
    }
}

#[derive(Debug, Deserialize)]
struct SynonymFile {
    #[serde(default)]
    synonyms: BTreeMap<String, String>,
}

/// Synonym table keyed by normalized card key
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    map: HashMap<CardKey, CardKey>,
}

impl SynonymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit `(variant, canonical)` pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (CardKey, CardKey)>,
    {
        let map = pairs
            .into_iter()
            .filter(|(variant, canonical)| variant != canonical)
            .collect();
        Self { map }
    }

    /// Parse a `synonyms.json` payload.
    ///
    /// Entries whose uid does not carry a set and number are skipped.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: SynonymFile = serde_json::from_slice(bytes)?;
        let pairs = file
            .synonyms
            .iter()
            .filter_map(|(variant, canonical)| Some((key_from_uid(variant)?, key_from_uid(canonical)?)));
        Ok(Self::from_pairs(pairs))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl CanonicalCards for SynonymTable {
    fn canonical(&self, key: &CardKey) -> CardKey {
        self.map.get(key).cloned().unwrap_or_else(|| key.clone())
    }
}

/// Extract the card key from a `Name::SET::NUMBER` uid
fn key_from_uid(uid: &str) -> Option<CardKey> {
    let mut parts = uid.rsplitn(3, "::");
    let number = parts.next()?;
    let set = parts.next()?;
    CardKey::normalize(set, number)
}
