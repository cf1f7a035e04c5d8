//! Filter predicates and filter keys
//!
//! A predicate selects the decks of an archetype that include some cards
//! (optionally with a copy-count constraint) and exclude others. Raw
//! predicates arrive as loosely shaped JSON; they are validated once, at the
//! generator or resolver boundary, into [`FilterPredicate`], which is the only
//! form used internally.
//!
//! ## Filter keys
//!
//! ```text
//! inc:{token}+{token}|exc:{card}+{card}
//!
//! token = CARD            presence (operator `any` or omitted)
//!       | CARD:{op}{n}    copy-count comparison, e.g. SVI~005:>=2
//! ```
//!
//! Tokens are de-duplicated and lexically sorted, so two predicates with the
//! same meaning always share a key no matter how their lists were ordered.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::card_key::CardKey;
use crate::error::{Result, SubsetError};
use crate::synonyms::CanonicalCards;

// =============================================================================
// Operators
// =============================================================================

/// Operator as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// At least one copy
    Any,
    /// No copies at all
    None,
}

impl QuantityOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            QuantityOperator::Eq => "=",
            QuantityOperator::Lt => "<",
            QuantityOperator::Le => "<=",
            QuantityOperator::Gt => ">",
            QuantityOperator::Ge => ">=",
            QuantityOperator::Any => "any",
            QuantityOperator::None => "",
        }
    }

    /// Comparison form, for operators that take a count
    pub fn count_op(self) -> Option<CountOp> {
        match self {
            QuantityOperator::Eq => Some(CountOp::Eq),
            QuantityOperator::Lt => Some(CountOp::Lt),
            QuantityOperator::Le => Some(CountOp::Le),
            QuantityOperator::Gt => Some(CountOp::Gt),
            QuantityOperator::Ge => Some(CountOp::Ge),
            QuantityOperator::Any | QuantityOperator::None => None,
        }
    }
}

impl FromStr for QuantityOperator {
    type Err = SubsetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" | "==" => Ok(QuantityOperator::Eq),
            "<" => Ok(QuantityOperator::Lt),
            "<=" => Ok(QuantityOperator::Le),
            ">" => Ok(QuantityOperator::Gt),
            ">=" => Ok(QuantityOperator::Ge),
            "any" | "ANY" => Ok(QuantityOperator::Any),
            "" => Ok(QuantityOperator::None),
            other => Err(SubsetError::InvalidFilter(format!("unknown operator '{}'", other))),
        }
    }
}

impl fmt::Display for QuantityOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy-count comparison against a literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CountOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CountOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CountOp::Eq => "=",
            CountOp::Lt => "<",
            CountOp::Le => "<=",
            CountOp::Gt => ">",
            CountOp::Ge => ">=",
        }
    }

    pub fn compare(self, in_deck: u32, literal: u32) -> bool {
        match self {
            CountOp::Eq => in_deck == literal,
            CountOp::Lt => in_deck < literal,
            CountOp::Le => in_deck <= literal,
            CountOp::Gt => in_deck > literal,
            CountOp::Ge => in_deck >= literal,
        }
    }
}

// =============================================================================
// Validated predicate
// =============================================================================

/// Constraint an include filter puts on a card's copies in a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    /// At least one copy
    Present,
    Compare(CountOp, u32),
}

/// One validated include filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IncludeFilter {
    pub card: CardKey,
    pub quantity: Quantity,
}

impl IncludeFilter {
    pub fn present(card: CardKey) -> Self {
        Self { card, quantity: Quantity::Present }
    }

    pub fn compare(card: CardKey, op: CountOp, count: u32) -> Self {
        Self { card, quantity: Quantity::Compare(op, count) }
    }

    /// Whether a deck holding `in_deck` copies of the card satisfies this filter
    pub fn matches(&self, in_deck: u32) -> bool {
        match self.quantity {
            Quantity::Present => in_deck > 0,
            Quantity::Compare(op, count) => op.compare(in_deck, count),
        }
    }

    /// Filter-key token
    pub fn token(&self) -> String {
        match self.quantity {
            Quantity::Present => self.card.to_string(),
            Quantity::Compare(op, count) => format!("{}:{}{}", self.card, op.as_str(), count),
        }
    }
}

/// Validated include/exclude predicate
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "RawPredicate", try_from = "RawPredicate")]
pub struct FilterPredicate {
    include: BTreeSet<IncludeFilter>,
    exclude: BTreeSet<CardKey>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require at least one copy of `card`
    pub fn include(mut self, card: CardKey) -> Self {
        self.include.insert(IncludeFilter::present(card));
        self
    }

    /// Require the deck's copies of `card` to satisfy `op count`
    pub fn include_count(mut self, card: CardKey, op: CountOp, count: u32) -> Self {
        self.include.insert(IncludeFilter::compare(card, op, count));
        self
    }

    /// Reject decks holding any copy of `card`
    pub fn exclude(mut self, card: CardKey) -> Self {
        self.exclude.insert(card);
        self
    }

    pub fn includes(&self) -> impl Iterator<Item = &IncludeFilter> {
        self.include.iter()
    }

    pub fn excludes(&self) -> impl Iterator<Item = &CardKey> {
        self.exclude.iter()
    }

    pub fn has_includes(&self) -> bool {
        !self.include.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether any include carries a copy-count comparison
    pub fn has_quantity(&self) -> bool {
        self.include
            .iter()
            .any(|f| matches!(f.quantity, Quantity::Compare(..)))
    }

    /// Canonical lookup key
    pub fn filter_key(&self) -> FilterKey {
        let inc: BTreeSet<String> = self.include.iter().map(IncludeFilter::token).collect();
        let exc: BTreeSet<String> = self.exclude.iter().map(CardKey::to_string).collect();
        FilterKey(format!(
            "inc:{}|exc:{}",
            inc.into_iter().collect::<Vec<_>>().join("+"),
            exc.into_iter().collect::<Vec<_>>().join("+"),
        ))
    }

    /// Same predicate with every card replaced by its canonical printing.
    /// Counts are indexed under canonical keys, so requests naming a reprint
    /// must pass through here before lookup or evaluation.
    pub fn canonicalize(&self, cards: &dyn CanonicalCards) -> FilterPredicate {
        FilterPredicate {
            include: self
                .include
                .iter()
                .map(|f| IncludeFilter {
                    card: cards.canonical(&f.card),
                    quantity: f.quantity,
                })
                .collect(),
            exclude: self.exclude.iter().map(|card| cards.canonical(card)).collect(),
        }
    }
}

// =============================================================================
// Filter key
// =============================================================================

/// Canonical string form of a predicate, used as the index lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterKey(String);

impl FilterKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Wire form
// =============================================================================

/// Include entry as it arrives from callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInclude {
    pub card_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Exclude entry as it arrives from callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExclude {
    pub card_id: String,
}

/// Unvalidated predicate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPredicate {
    #[serde(default)]
    pub include: Vec<RawInclude>,
    #[serde(default)]
    pub exclude: Vec<RawExclude>,
}

fn parse_card(raw: &str) -> Result<CardKey> {
    CardKey::parse(raw).ok_or_else(|| SubsetError::InvalidCardKey(raw.to_string()))
}

impl TryFrom<RawPredicate> for FilterPredicate {
    type Error = SubsetError;

    fn try_from(raw: RawPredicate) -> Result<Self> {
        let mut predicate = FilterPredicate::new();

        for inc in raw.include {
            let card = parse_card(&inc.card_id)?;
            let op = match inc.operator.as_deref() {
                Some(op) => Some(op.parse::<QuantityOperator>()?),
                None => None,
            };
            predicate = match (op, inc.count) {
                (None, None) | (Some(QuantityOperator::Any), _) => predicate.include(card),
                (Some(QuantityOperator::None), _) => predicate.exclude(card),
                (Some(op), Some(count)) => match op.count_op() {
                    Some(count_op) => predicate.include_count(card, count_op, count),
                    None => predicate.include(card),
                },
                (Some(op), None) => {
                    return Err(SubsetError::InvalidFilter(format!(
                        "operator '{}' on {} needs a count",
                        op, card
                    )))
                }
                (None, Some(count)) => {
                    return Err(SubsetError::InvalidFilter(format!(
                        "count {} on {} needs an operator",
                        count, card
                    )))
                }
            };
        }

        for exc in raw.exclude {
            predicate = predicate.exclude(parse_card(&exc.card_id)?);
        }

        Ok(predicate)
    }
}

impl From<FilterPredicate> for RawPredicate {
    fn from(predicate: FilterPredicate) -> Self {
        let include = predicate
            .include
            .into_iter()
            .map(|f| match f.quantity {
                Quantity::Present => RawInclude {
                    card_id: f.card.to_string(),
                    operator: None,
                    count: None,
                },
                Quantity::Compare(op, count) => RawInclude {
                    card_id: f.card.to_string(),
                    operator: Some(op.as_str().to_string()),
                    count: Some(count),
                },
            })
            .collect();
        let exclude = predicate
            .exclude
            .into_iter()
            .map(|card| RawExclude { card_id: card.to_string() })
            .collect();
        RawPredicate { include, exclude }
    }
}
