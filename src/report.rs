//! Report aggregation
//!
//! Turns a pool of decks into per-card usage statistics. The same code path
//! backs the materialized subsets and the client fallback, so the item shape
//! produced here is the contract between the two.
//!
//! Per deck, copies of one card are summed before they reach the copy-count
//! histogram: two printings of the same card in one deck count as one deck
//! with their combined copies, not two histogram entries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::card_key::CardKey;
use crate::deck::{Deck, DeckCard};
use crate::synonyms::CanonicalCards;

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage `part / whole`, rounded to two decimals; 0 when `whole` is 0
pub fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

/// Canonical key of a deck line after synonym resolution
pub fn canonical_key(card: &DeckCard, cards: &dyn CanonicalCards) -> Option<CardKey> {
    card.key().map(|key| cards.canonical(&key))
}

// =============================================================================
// Report types
// =============================================================================

/// One bar of a copy-count histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyBucket {
    pub copies: u32,
    pub players: u32,
    pub percent: f64,
}

/// Usage of one card across a deck pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardUsageStat {
    pub rank: u32,
    pub name: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    pub found: u32,
    pub total: u32,
    pub pct: f64,
    pub dist: Vec<CopyBucket>,
}

impl CardUsageStat {
    /// Card key of this item, when it carries a set and number
    pub fn card_key(&self) -> Option<CardKey> {
        CardKey::normalize(self.set.as_deref()?, self.number.as_deref()?)
    }

    /// Copy count held by the most players (lowest count wins ties)
    pub fn most_common_copies(&self) -> Option<u32> {
        self.counts_by_popularity().first().copied()
    }

    /// Distinct copy counts ordered by player share, descending
    pub fn counts_by_popularity(&self) -> Vec<u32> {
        let mut buckets: Vec<&CopyBucket> = self.dist.iter().collect();
        buckets.sort_by(|a, b| b.players.cmp(&a.players).then(a.copies.cmp(&b.copies)));
        buckets.into_iter().map(|b| b.copies).collect()
    }
}

/// Statistics for one deck pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsetReport {
    pub deck_total: u32,
    pub items: Vec<CardUsageStat>,
}

impl SubsetReport {
    pub fn is_empty(&self) -> bool {
        self.deck_total == 0
    }

    pub fn item(&self, key: &CardKey) -> Option<&CardUsageStat> {
        self.items
            .iter()
            .find(|item| item.card_key().as_ref() == Some(key))
    }
}

// =============================================================================
// Aggregation
// =============================================================================

#[derive(Default)]
struct CardTally {
    name: String,
    key: Option<CardKey>,
    category: Option<String>,
    per_deck: Vec<u32>,
}

/// Aggregate card usage over `decks`.
///
/// An empty pool yields an empty report. Items are ordered by `found`
/// descending, ties broken by card key so the order never depends on deck
/// order.
pub fn aggregate(decks: &[&Deck], cards: &dyn CanonicalCards) -> SubsetReport {
    if decks.is_empty() {
        return SubsetReport::default();
    }
    let deck_total = decks.len() as u32;
    let mut tallies: HashMap<String, CardTally> = HashMap::new();

    for deck in decks {
        let mut per_deck: HashMap<String, u32> = HashMap::new();

        for card in &deck.cards {
            if card.count == 0 {
                continue;
            }
            let key = canonical_key(card, cards);
            let agg_key = match &key {
                Some(k) => k.to_string(),
                None => card.name.clone(),
            };
            if agg_key.is_empty() {
                continue;
            }

            *per_deck.entry(agg_key.clone()).or_insert(0) += card.count;

            let tally = tallies.entry(agg_key).or_insert_with(|| CardTally {
                name: card.name.clone(),
                key,
                ..Default::default()
            });
            if tally.category.is_none() {
                tally.category = card.category();
            }
        }

        for (agg_key, copies) in per_deck {
            if let Some(tally) = tallies.get_mut(&agg_key) {
                tally.per_deck.push(copies);
            }
        }
    }

    let mut ordered: Vec<(String, CardTally)> = tallies.into_iter().collect();
    ordered.sort_by(|(ka, a), (kb, b)| b.per_deck.len().cmp(&a.per_deck.len()).then(ka.cmp(kb)));

    let items = ordered
        .into_iter()
        .enumerate()
        .map(|(idx, (_, tally))| build_item(idx as u32 + 1, tally, deck_total))
        .collect();

    SubsetReport { deck_total, items }
}

fn build_item(rank: u32, tally: CardTally, deck_total: u32) -> CardUsageStat {
    let found = tally.per_deck.len() as u32;

    let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
    for copies in &tally.per_deck {
        *histogram.entry(*copies).or_insert(0) += 1;
    }
    let dist = histogram
        .into_iter()
        .map(|(copies, players)| CopyBucket {
            copies,
            players,
            percent: percent(players, found),
        })
        .collect();

    let (set, number, uid) = match &tally.key {
        Some(key) => (
            Some(key.set_code().to_string()),
            Some(key.number().to_string()),
            Some(format!("{}::{}::{}", tally.name, key.set_code(), key.number())),
        ),
        None => (None, None, None),
    };

    CardUsageStat {
        rank,
        name: tally.name,
        set,
        number,
        category: tally.category,
        uid,
        found,
        total: deck_total,
        pct: percent(found, deck_total),
        dist,
    }
}

// =============================================================================
// Card index
// =============================================================================

/// Usage of one card name across every printing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardIndexEntry {
    pub found: u32,
    pub total: u32,
    pub pct: f64,
    pub dist: Vec<CopyBucket>,
    pub sets: Vec<String>,
}

/// Tournament-wide usage keyed by display name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIndex {
    pub deck_total: u32,
    pub cards: BTreeMap<String, CardIndexEntry>,
}

/// Build a name-keyed index; printings of the same name are summed per deck
pub fn card_index(decks: &[&Deck]) -> CardIndex {
    let deck_total = decks.len() as u32;
    let mut display: HashMap<String, String> = HashMap::new();
    let mut per_name: HashMap<String, Vec<u32>> = HashMap::new();
    let mut sets: HashMap<String, BTreeSet<String>> = HashMap::new();

    for deck in decks {
        let mut per_deck: HashMap<String, u32> = HashMap::new();
        for card in &deck.cards {
            if card.count == 0 || card.name.trim().is_empty() {
                continue;
            }
            let base = card.name.trim().to_lowercase();
            display.entry(base.clone()).or_insert_with(|| card.name.trim().to_string());
            *per_deck.entry(base.clone()).or_insert(0) += card.count;
            if let Some(key) = card.key() {
                sets.entry(base).or_default().insert(key.set_code().to_string());
            }
        }
        for (base, copies) in per_deck {
            per_name.entry(base).or_default().push(copies);
        }
    }

    let cards = per_name
        .into_iter()
        .map(|(base, counts)| {
            let found = counts.len() as u32;
            let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
            for c in counts {
                *histogram.entry(c).or_insert(0) += 1;
            }
            let entry = CardIndexEntry {
                found,
                total: deck_total,
                pct: percent(found, deck_total),
                dist: histogram
                    .into_iter()
                    .map(|(copies, players)| CopyBucket {
                        copies,
                        players,
                        percent: percent(players, found),
                    })
                    .collect(),
                sets: sets.remove(&base).map(|s| s.into_iter().collect()).unwrap_or_default(),
            };
            (display.get(&base).cloned().unwrap_or(base), entry)
        })
        .collect();

    CardIndex { deck_total, cards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synonyms::{IdentityCards, SynonymTable};

    fn card(name: &str, set: &str, number: &str, count: u32) -> DeckCard {
        DeckCard {
            count,
            name: name.to_string(),
            set: set.to_string(),
            number: number.to_string(),
            category: Some("trainer".to_string()),
        }
    }

    fn deck(id: &str, cards: Vec<DeckCard>) -> Deck {
        Deck {
            id: Some(id.to_string()),
            player: None,
            placement: None,
            archetype: "Test".to_string(),
            cards,
            deck_hash: None,
            tournament: None,
            success: Vec::new(),
        }
    }

    /// 10 decks; card X in 6 of them (4 with one copy, 2 with two copies)
    fn ten_deck_pool() -> Vec<Deck> {
        (0..10)
            .map(|i| {
                let mut cards = vec![card("Filler", "SVI", "1", 4)];
                match i {
                    0..=3 => cards.push(card("Card X", "PAL", "185", 1)),
                    4..=5 => cards.push(card("Card X", "PAL", "185", 2)),
                    _ => {}
                }
                deck(&format!("d{}", i), cards)
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_distribution() {
        let decks = ten_deck_pool();
        let refs: Vec<&Deck> = decks.iter().collect();
        let report = aggregate(&refs, &IdentityCards);

        assert_eq!(report.deck_total, 10);
        let x = report.item(&CardKey::parse("PAL~185").unwrap()).unwrap();
        assert_eq!(x.found, 6);
        assert_eq!(x.total, 10);
        assert_eq!(x.pct, 60.0);
        assert_eq!(
            x.dist,
            vec![
                CopyBucket { copies: 1, players: 4, percent: 66.67 },
                CopyBucket { copies: 2, players: 2, percent: 33.33 },
            ]
        );
        assert_eq!(x.uid.as_deref(), Some("Card X::PAL::185"));
    }

    #[test]
    fn test_items_sorted_and_ranked() {
        let decks = ten_deck_pool();
        let refs: Vec<&Deck> = decks.iter().collect();
        let report = aggregate(&refs, &IdentityCards);

        assert_eq!(report.items[0].name, "Filler");
        assert_eq!(report.items[0].rank, 1);
        assert_eq!(report.items[1].rank, 2);
        for item in &report.items {
            let players: u32 = item.dist.iter().map(|b| b.players).sum();
            assert_eq!(players, item.found);
            assert_eq!(item.pct, percent(item.found, item.total));
        }
    }

    #[test]
    fn test_order_independent_of_deck_order() {
        let decks = ten_deck_pool();
        let forward: Vec<&Deck> = decks.iter().collect();
        let backward: Vec<&Deck> = decks.iter().rev().collect();
        assert_eq!(aggregate(&forward, &IdentityCards), aggregate(&backward, &IdentityCards));
    }

    #[test]
    fn test_same_card_summed_within_deck() {
        let decks = vec![deck(
            "d0",
            vec![card("Ultra Ball", "SVI", "196", 2), card("Ultra Ball", "svi", "0196", 2)],
        )];
        let refs: Vec<&Deck> = decks.iter().collect();
        let report = aggregate(&refs, &IdentityCards);

        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].dist, vec![CopyBucket { copies: 4, players: 1, percent: 100.0 }]);
    }

    #[test]
    fn test_reprints_collapse_through_synonyms() {
        let table = SynonymTable::from_pairs(vec![(
            CardKey::parse("PRE~037").unwrap(),
            CardKey::parse("SFA~020").unwrap(),
        )]);
        let decks = vec![deck(
            "d0",
            vec![card("Dusknoir", "PRE", "37", 1), card("Dusknoir", "SFA", "20", 1)],
        )];
        let refs: Vec<&Deck> = decks.iter().collect();
        let report = aggregate(&refs, &table);

        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].set.as_deref(), Some("SFA"));
        assert_eq!(report.items[0].dist[0].copies, 2);
    }

    #[test]
    fn test_empty_pool_is_empty_report() {
        let report = aggregate(&[], &IdentityCards);
        assert!(report.is_empty());
        assert!(report.items.is_empty());
    }

    #[test]
    fn test_counts_by_popularity() {
        let decks = ten_deck_pool();
        let refs: Vec<&Deck> = decks.iter().collect();
        let report = aggregate(&refs, &IdentityCards);
        let x = report.item(&CardKey::parse("PAL~185").unwrap()).unwrap();
        assert_eq!(x.counts_by_popularity(), vec![1, 2]);
        assert_eq!(x.most_common_copies(), Some(1));
    }

    #[test]
    fn test_card_index_merges_printings_by_name() {
        let decks = vec![
            deck("d0", vec![card("Dusknoir", "PRE", "37", 1), card("Dusknoir", "SFA", "20", 1)]),
            deck("d1", vec![card("Dusknoir", "SFA", "20", 2)]),
        ];
        let refs: Vec<&Deck> = decks.iter().collect();
        let index = card_index(&refs);

        let entry = &index.cards["Dusknoir"];
        assert_eq!(entry.found, 2);
        assert_eq!(entry.pct, 100.0);
        assert_eq!(entry.dist, vec![CopyBucket { copies: 2, players: 2, percent: 100.0 }]);
        assert_eq!(entry.sets, vec!["PRE".to_string(), "SFA".to_string()]);
    }
}
