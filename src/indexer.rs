//! Content-hash deduplication and the per-archetype index
//!
//! Many distinct predicates select exactly the same decks (two tech cards
//! that never co-occur, an exclude of a card nobody in the subset plays).
//! Their reports are identical, so only the first one is stored; every
//! later predicate becomes an alternate filter pointing at the same subset.
//!
//! The content hash is structural: fields are fed to SHA-256 in a fixed
//! order and percentages are hashed as integer hundredths, so the digest
//! never depends on map iteration order or float formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::card_key::CardKey;
use crate::filter::{FilterKey, FilterPredicate};
use crate::generator::is_always_included;
use crate::report::{percent, CardUsageStat, SubsetReport};
use crate::subset::{BuiltSubset, FilterMetadata};

// =============================================================================
// Content hash
// =============================================================================

/// Digest of a report's items, used only for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(items: &[CardUsageStat]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((items.len() as u64).to_be_bytes());
        for item in items {
            field(&mut hasher, item.name.as_bytes());
            field(&mut hasher, item.set.as_deref().unwrap_or("").as_bytes());
            field(&mut hasher, item.number.as_deref().unwrap_or("").as_bytes());
            field(&mut hasher, item.category.as_deref().unwrap_or("").as_bytes());
            hasher.update(item.rank.to_be_bytes());
            hasher.update(item.found.to_be_bytes());
            hasher.update(item.total.to_be_bytes());
            hasher.update(hundredths(item.pct).to_be_bytes());
            hasher.update((item.dist.len() as u64).to_be_bytes());
            for bucket in &item.dist {
                hasher.update(bucket.copies.to_be_bytes());
                hasher.update(bucket.players.to_be_bytes());
                hasher.update(hundredths(bucket.percent).to_be_bytes());
            }
        }
        ContentHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed so adjacent strings cannot run into each other
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn hundredths(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

// =============================================================================
// Published types
// =============================================================================

/// Stored body of one unique subset:
/// `include-exclude/{tournament}/{archetype}/unique_subsets/{id}.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    pub id: String,
    #[serde(flatten)]
    pub report: SubsetReport,
    pub primary_filter: FilterPredicate,
    #[serde(default)]
    pub alternate_filters: Vec<FilterPredicate>,
    pub filters: FilterMetadata,
}

/// Index entry describing one subset without its items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsetMeta {
    pub deck_total: u32,
    pub primary_filter: FilterKey,
    #[serde(default)]
    pub alternate_filters: Vec<FilterKey>,
    pub filters: FilterMetadata,
}

/// Per-card summary of the full archetype pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSummary {
    pub name: String,
    pub set: Option<String>,
    pub number: Option<String>,
    pub found: u32,
    pub total: u32,
    pub pct: f64,
    pub always_included: bool,
}

/// `include-exclude/{tournament}/{archetype}/index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeIndex {
    pub archetype: String,
    pub deck_total: u32,
    /// Accepted predicates, before deduplication
    pub total_combinations: u32,
    pub unique_subsets: u32,
    pub duplicates_dropped: u32,
    pub reduction_pct: f64,
    pub cards: BTreeMap<CardKey, CardSummary>,
    pub filter_map: BTreeMap<FilterKey, String>,
    pub subsets: BTreeMap<String, SubsetMeta>,
    pub generated_at: DateTime<Utc>,
}

impl ArchetypeIndex {
    /// Subset id for a predicate, if it was materialized
    pub fn lookup(&self, key: &FilterKey) -> Option<&str> {
        self.filter_map.get(key).map(String::as_str)
    }
}

// =============================================================================
// Indexer
// =============================================================================

/// Where an accepted subset ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// First predicate with this content; a new subset id was allocated
    New(String),
    /// Content already stored under this id; predicate recorded as alternate
    Duplicate(String),
}

/// Collects accepted subsets for one archetype and merges identical content
#[derive(Debug, Default)]
pub struct DedupIndexer {
    by_hash: HashMap<ContentHash, usize>,
    subsets: Vec<Subset>,
    filter_map: BTreeMap<FilterKey, String>,
    accepted: u32,
}

impl DedupIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, built: BuiltSubset) -> IndexOutcome {
        self.accepted += 1;
        let hash = ContentHash::of(&built.report.items);
        let key = built.predicate.filter_key();

        if let Some(&pos) = self.by_hash.get(&hash) {
            let subset = &mut self.subsets[pos];
            // A predicate already mapped keeps its first owner
            self.filter_map.entry(key).or_insert_with(|| subset.id.clone());
            subset.alternate_filters.push(built.predicate);
            debug!(subset_id = %subset.id, hash = %hash, "Merged duplicate subset");
            return IndexOutcome::Duplicate(subset.id.clone());
        }

        let id = format!("subset_{:03}", self.subsets.len() + 1);
        self.filter_map.entry(key).or_insert_with(|| id.clone());
        self.by_hash.insert(hash, self.subsets.len());
        self.subsets.push(Subset {
            id: id.clone(),
            report: built.report,
            primary_filter: built.predicate,
            alternate_filters: Vec::new(),
            filters: built.filters,
        });
        IndexOutcome::New(id)
    }

    pub fn unique_subsets(&self) -> usize {
        self.subsets.len()
    }

    /// Build the archetype index from the full-pool report and hand back the
    /// subset bodies to persist
    pub fn finish(
        self,
        archetype: &str,
        base: &SubsetReport,
        generated_at: DateTime<Utc>,
    ) -> (ArchetypeIndex, Vec<Subset>) {
        let unique = self.subsets.len() as u32;
        let dropped = self.accepted - unique;

        let cards = base
            .items
            .iter()
            .filter_map(|item| {
                let key = item.card_key()?;
                Some((
                    key,
                    CardSummary {
                        name: item.name.clone(),
                        set: item.set.clone(),
                        number: item.number.clone(),
                        found: item.found,
                        total: item.total,
                        pct: item.pct,
                        always_included: is_always_included(item),
                    },
                ))
            })
            .collect();

        let subsets = self
            .subsets
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    SubsetMeta {
                        deck_total: s.report.deck_total,
                        primary_filter: s.primary_filter.filter_key(),
                        alternate_filters: s.alternate_filters.iter().map(|p| p.filter_key()).collect(),
                        filters: s.filters.clone(),
                    },
                )
            })
            .collect();

        let index = ArchetypeIndex {
            archetype: archetype.to_string(),
            deck_total: base.deck_total,
            total_combinations: self.accepted,
            unique_subsets: unique,
            duplicates_dropped: dropped,
            reduction_pct: percent(dropped, self.accepted),
            cards,
            filter_map: self.filter_map,
            subsets,
            generated_at,
        };

        (index, self.subsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{Deck, DeckCard};
    use crate::report::{aggregate, CopyBucket};
    use crate::subset::SubsetBuilder;
    use crate::synonyms::IdentityCards;

    fn key(raw: &str) -> CardKey {
        CardKey::parse(raw).unwrap()
    }

    fn deck(id: &str, cards: &[(&str, u32)]) -> Deck {
        Deck {
            id: Some(id.to_string()),
            player: None,
            placement: None,
            archetype: "Test".to_string(),
            cards: cards
                .iter()
                .map(|&(raw, count)| {
                    let k = key(raw);
                    DeckCard {
                        count,
                        name: raw.to_string(),
                        set: k.set_code().to_string(),
                        number: k.number().to_string(),
                        category: None,
                    }
                })
                .collect(),
            deck_hash: None,
            tournament: None,
            success: Vec::new(),
        }
    }

    fn stat(pct: f64) -> CardUsageStat {
        CardUsageStat {
            rank: 1,
            name: "Card".to_string(),
            set: Some("SVI".to_string()),
            number: Some("001".to_string()),
            category: None,
            uid: None,
            found: 2,
            total: 3,
            pct,
            dist: vec![CopyBucket { copies: 1, players: 2, percent: 100.0 }],
        }
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = ContentHash::of(&[stat(66.67)]);
        let b = ContentHash::of(&[stat(66.67)]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, ContentHash::of(&[stat(66.66)]));
        assert_ne!(a, ContentHash::of(&[]));
    }

    #[test]
    fn test_identical_subsets_merge() {
        // TWM~1 and TWM~2 are always played together, so their includes match
        let decks = vec![
            deck("d0", &[("SVI~1", 4), ("TWM~1", 1), ("TWM~2", 1)]),
            deck("d1", &[("SVI~1", 4), ("TWM~1", 1), ("TWM~2", 1)]),
            deck("d2", &[("SVI~1", 4)]),
            deck("d3", &[("SVI~1", 4)]),
        ];
        let refs: Vec<&Deck> = decks.iter().collect();
        let base = aggregate(&refs, &IdentityCards);
        let builder = SubsetBuilder::new(&refs, &IdentityCards, 2);
        let mut indexer = DedupIndexer::new();

        let first = FilterPredicate::new().include(key("TWM~1"));
        let second = FilterPredicate::new().include(key("TWM~2"));
        let other = FilterPredicate::new().exclude(key("TWM~1"));

        assert_eq!(
            indexer.add(builder.build(&first, &base).unwrap()),
            IndexOutcome::New("subset_001".to_string())
        );
        assert_eq!(
            indexer.add(builder.build(&second, &base).unwrap()),
            IndexOutcome::Duplicate("subset_001".to_string())
        );
        assert_eq!(
            indexer.add(builder.build(&other, &base).unwrap()),
            IndexOutcome::New("subset_002".to_string())
        );

        let (index, subsets) = indexer.finish("Test", &base, Utc::now());
        assert_eq!(index.total_combinations, 3);
        assert_eq!(index.unique_subsets, 2);
        assert_eq!(index.duplicates_dropped, 1);
        assert_eq!(index.reduction_pct, 33.33);
        assert_eq!(index.lookup(&first.filter_key()), Some("subset_001"));
        assert_eq!(index.lookup(&second.filter_key()), Some("subset_001"));
        assert_eq!(index.lookup(&other.filter_key()), Some("subset_002"));

        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0].primary_filter, first);
        assert_eq!(subsets[0].alternate_filters, vec![second.clone()]);
        assert_eq!(
            index.subsets["subset_001"].alternate_filters,
            vec![second.filter_key()]
        );
    }

    #[test]
    fn test_index_card_summary_marks_always_included() {
        let decks = vec![
            deck("d0", &[("SVI~1", 4), ("TWM~1", 1)]),
            deck("d1", &[("SVI~1", 4)]),
        ];
        let refs: Vec<&Deck> = decks.iter().collect();
        let base = aggregate(&refs, &IdentityCards);
        let (index, subsets) = DedupIndexer::new().finish("Test", &base, Utc::now());

        assert!(subsets.is_empty());
        assert_eq!(index.reduction_pct, 0.0);
        assert!(index.cards[&key("SVI~1")].always_included);
        assert!(!index.cards[&key("TWM~1")].always_included);
    }

    #[test]
    fn test_subset_serializes_report_inline() {
        let decks = vec![deck("d0", &[("SVI~1", 4)]), deck("d1", &[("SVI~1", 3)])];
        let refs: Vec<&Deck> = decks.iter().collect();
        let base = aggregate(&refs, &IdentityCards);
        let builder = SubsetBuilder::new(&refs, &IdentityCards, 2);
        let mut indexer = DedupIndexer::new();
        indexer.add(builder.build(&FilterPredicate::new().include(key("SVI~1")), &base).unwrap());
        let (_, subsets) = indexer.finish("Test", &base, Utc::now());

        let json = serde_json::to_value(&subsets[0]).unwrap();
        assert_eq!(json["id"], "subset_001");
        assert_eq!(json["deckTotal"], 2);
        assert!(json["items"].is_array());
        assert_eq!(json["primaryFilter"]["include"][0]["cardId"], "SVI~001");

        let back: Subset = serde_json::from_value(json).unwrap();
        assert_eq!(back, subsets[0]);
    }
}
