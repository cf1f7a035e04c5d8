//! Subset evaluation
//!
//! A [`CountIndex`] records, once per deck pool, how many copies of each
//! canonical card every deck holds. Evaluating a predicate is then pure set
//! arithmetic over deck positions followed by one aggregation pass.
//!
//! The index is read-only after construction, so one index can serve any
//! number of concurrent evaluations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::card_key::CardKey;
use crate::deck::Deck;
use crate::filter::{FilterPredicate, Quantity};
use crate::report::{self, canonical_key, CardUsageStat, SubsetReport};
use crate::synonyms::CanonicalCards;

// =============================================================================
// Count index
// =============================================================================

/// Per-deck copy counts for every canonical card in a pool
#[derive(Debug, Default)]
pub struct CountIndex {
    deck_total: usize,
    counts: HashMap<CardKey, HashMap<usize, u32>>,
}

impl CountIndex {
    /// Index `decks` by position; copies of one card within a deck are summed
    pub fn build(decks: &[&Deck], cards: &dyn CanonicalCards) -> Self {
        let mut counts: HashMap<CardKey, HashMap<usize, u32>> = HashMap::new();
        for (pos, deck) in decks.iter().enumerate() {
            for card in &deck.cards {
                if card.count == 0 {
                    continue;
                }
                if let Some(key) = canonical_key(card, cards) {
                    *counts.entry(key).or_default().entry(pos).or_insert(0) += card.count;
                }
            }
        }
        Self { deck_total: decks.len(), counts }
    }

    pub fn deck_total(&self) -> usize {
        self.deck_total
    }

    /// Copies of `card` in the deck at `pos` (0 when absent)
    pub fn copies(&self, card: &CardKey, pos: usize) -> u32 {
        self.counts
            .get(card)
            .and_then(|decks| decks.get(&pos))
            .copied()
            .unwrap_or(0)
    }

    /// Positions of decks holding at least one copy of `card`
    pub fn holders(&self, card: &CardKey) -> impl Iterator<Item = usize> + '_ {
        self.counts
            .get(card)
            .into_iter()
            .flat_map(|decks| decks.keys().copied())
    }

    /// Deck positions satisfying `predicate`, ascending
    pub fn eligible(&self, predicate: &FilterPredicate) -> BTreeSet<usize> {
        let mut eligible: BTreeSet<usize> = (0..self.deck_total).collect();

        for filter in predicate.includes() {
            eligible.retain(|&pos| filter.matches(self.copies(&filter.card, pos)));
            if eligible.is_empty() {
                return eligible;
            }
        }
        for card in predicate.excludes() {
            for pos in self.holders(card) {
                eligible.remove(&pos);
            }
        }

        eligible
    }
}

// =============================================================================
// Filter display metadata
// =============================================================================

/// Display details of one card named in a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCard {
    pub card_id: CardKey,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Usage in the full archetype pool
    #[serde(default)]
    pub pct: Option<f64>,
}

/// Human-readable description of a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMetadata {
    pub include: Vec<FilterCard>,
    pub exclude: Vec<FilterCard>,
    pub base_deck_total: u32,
}

impl FilterMetadata {
    /// Describe `predicate` using names and usage from the full-pool report
    pub fn describe(predicate: &FilterPredicate, base: &SubsetReport) -> Self {
        let lookup: HashMap<CardKey, &CardUsageStat> = base
            .items
            .iter()
            .filter_map(|item| Some((item.card_key()?, item)))
            .collect();
        let card = |key: &CardKey, operator: Option<String>, count: Option<u32>| {
            let item = lookup.get(key);
            FilterCard {
                card_id: key.clone(),
                name: item.map(|i| i.name.clone()),
                operator,
                count,
                pct: item.map(|i| i.pct),
            }
        };

        let include = predicate
            .includes()
            .map(|f| match f.quantity {
                Quantity::Present => card(&f.card, None, None),
                Quantity::Compare(op, n) => card(&f.card, Some(op.as_str().to_string()), Some(n)),
            })
            .collect();
        let exclude = predicate.excludes().map(|k| card(k, None, None)).collect();

        Self {
            include,
            exclude,
            base_deck_total: base.deck_total,
        }
    }
}

// =============================================================================
// Subset builder
// =============================================================================

/// Why a predicate was not materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Fewer matching decks than the minimum subset size
    TooSmall { decks: usize },
    /// Exclude-only predicate that removes nothing
    NoOp,
}

/// An accepted predicate with its report
#[derive(Debug, Clone)]
pub struct BuiltSubset {
    pub predicate: FilterPredicate,
    pub report: SubsetReport,
    pub filters: FilterMetadata,
}

/// Evaluates predicates against one deck pool
pub struct SubsetBuilder<'a> {
    decks: &'a [&'a Deck],
    index: CountIndex,
    cards: &'a dyn CanonicalCards,
    min_subset_size: u32,
}

impl<'a> SubsetBuilder<'a> {
    pub fn new(decks: &'a [&'a Deck], cards: &'a dyn CanonicalCards, min_subset_size: u32) -> Self {
        Self {
            decks,
            index: CountIndex::build(decks, cards),
            cards,
            min_subset_size,
        }
    }

    pub fn index(&self) -> &CountIndex {
        &self.index
    }

    /// Decks matching `predicate`, in pool order
    pub fn matching_decks(&self, predicate: &FilterPredicate) -> Vec<&'a Deck> {
        self.index
            .eligible(predicate)
            .into_iter()
            .map(|pos| self.decks[pos])
            .collect()
    }

    /// Report over every matching deck, without any size rule
    pub fn report_for(&self, predicate: &FilterPredicate) -> SubsetReport {
        report::aggregate(&self.matching_decks(predicate), self.cards)
    }

    /// Evaluate `predicate` for materialization
    pub fn build(
        &self,
        predicate: &FilterPredicate,
        base: &SubsetReport,
    ) -> Result<BuiltSubset, Rejection> {
        let matching = self.matching_decks(predicate);

        if (matching.len() as u32) < self.min_subset_size {
            return Err(Rejection::TooSmall { decks: matching.len() });
        }
        if !predicate.has_includes() && matching.len() == self.decks.len() {
            return Err(Rejection::NoOp);
        }

        Ok(BuiltSubset {
            predicate: predicate.clone(),
            report: report::aggregate(&matching, self.cards),
            filters: FilterMetadata::describe(predicate, base),
        })
    }
}
