//! Deck model and raw corpus parsing
//!
//! Decks are produced by ingestion and published as
//! `reports/{tournament}/decks.json`. This module only reads them; a deck is
//! never modified after parsing apart from filling in derived fields
//! (tournament reference, success tags) that older corpora lack.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::card_key::CardKey;
use crate::error::Result;

// =============================================================================
// Cards
// =============================================================================

/// One line of a decklist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckCard {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub set: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub number: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl DeckCard {
    /// Normalized key for this printing, if it has a set and number
    pub fn key(&self) -> Option<CardKey> {
        CardKey::normalize(&self.set, &self.number)
    }

    /// Lowercased category (`pokemon`, `trainer`, `energy`)
    pub fn category(&self) -> Option<String> {
        self.category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
    }
}

/// Accepts `"5"`, `5` or `null` for set codes and card numbers
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

// =============================================================================
// Success tags
// =============================================================================

/// Placement-derived finishing bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessTag {
    Winner,
    Top2,
    Top4,
    Top8,
    Top16,
    Top32,
}

impl SuccessTag {
    pub const ALL: [SuccessTag; 6] = [
        SuccessTag::Winner,
        SuccessTag::Top2,
        SuccessTag::Top4,
        SuccessTag::Top8,
        SuccessTag::Top16,
        SuccessTag::Top32,
    ];

    /// Worst placement that still earns this tag
    pub fn cutoff(self) -> u32 {
        match self {
            SuccessTag::Winner => 1,
            SuccessTag::Top2 => 2,
            SuccessTag::Top4 => 4,
            SuccessTag::Top8 => 8,
            SuccessTag::Top16 => 16,
            SuccessTag::Top32 => 32,
        }
    }

    /// All tags earned by a placement
    pub fn for_placement(placement: u32) -> Vec<SuccessTag> {
        if placement == 0 {
            return Vec::new();
        }
        Self::ALL
            .iter()
            .copied()
            .filter(|tag| placement <= tag.cutoff())
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SuccessTag::Winner => "winner",
            SuccessTag::Top2 => "top2",
            SuccessTag::Top4 => "top4",
            SuccessTag::Top8 => "top8",
            SuccessTag::Top16 => "top16",
            SuccessTag::Top32 => "top32",
        }
    }
}

impl std::str::FromStr for SuccessTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown success tag: {}", s))
    }
}

// =============================================================================
// Decks
// =============================================================================

/// A single submitted decklist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub placement: Option<u32>,
    #[serde(default)]
    pub archetype: String,
    #[serde(default)]
    pub cards: Vec<DeckCard>,
    #[serde(default)]
    pub deck_hash: Option<String>,
    /// Tournament this deck was submitted to
    #[serde(default)]
    pub tournament: Option<String>,
    #[serde(default)]
    pub success: Vec<SuccessTag>,
}

impl Deck {
    /// Stable identity: deck hash, then id, then player, then a digest of the list
    pub fn identity(&self) -> String {
        [&self.deck_hash, &self.id, &self.player]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| self.content_digest())
    }

    fn content_digest(&self) -> String {
        let mut lines: Vec<String> = self
            .cards
            .iter()
            .map(|c| format!("{}x{}|{}|{}", c.count, c.name, c.set, c.number))
            .collect();
        lines.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.archetype.as_bytes());
        for line in &lines {
            hasher.update(b"\n");
            hasher.update(line.as_bytes());
        }
        hex::encode(&hasher.finalize()[..10])
    }

    pub fn has_tag(&self, tag: SuccessTag) -> bool {
        self.success.contains(&tag)
    }
}

/// Parse a `decks.json` corpus, stamping the tournament and filling success tags
pub fn parse_corpus(bytes: &[u8], tournament: &str) -> Result<Vec<Deck>> {
    let mut decks: Vec<Deck> = serde_json::from_slice(bytes)?;
    for deck in &mut decks {
        if deck.tournament.is_none() {
            deck.tournament = Some(tournament.to_string());
        }
        if deck.success.is_empty() {
            if let Some(placement) = deck.placement {
                deck.success = SuccessTag::for_placement(placement);
            }
        }
    }
    Ok(decks)
}

// =============================================================================
// Archetype grouping
// =============================================================================

/// Grouping key for archetype labels: underscores become spaces and runs of
/// whitespace collapse to one
pub fn normalize_archetype_name(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decks sharing one normalized archetype label
#[derive(Debug)]
pub struct ArchetypeGroup<'a> {
    /// First-seen spelling of the label
    pub label: String,
    pub decks: Vec<&'a Deck>,
}

/// Group decks by archetype, preserving first-seen order
pub fn group_by_archetype(decks: &[Deck]) -> Vec<ArchetypeGroup<'_>> {
    let mut groups: Vec<ArchetypeGroup<'_>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for deck in decks {
        let norm = normalize_archetype_name(&deck.archetype);
        if norm.is_empty() {
            continue;
        }
        let idx = *positions.entry(norm).or_insert_with(|| {
            groups.push(ArchetypeGroup {
                label: deck.archetype.trim().to_string(),
                decks: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].decks.push(deck);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"[
        {"id": "a1", "player": "Ash", "placement": 1, "archetype": "Gardevoir ex",
         "deckHash": "h-a1",
         "cards": [{"count": 2, "name": "Ralts", "set": "SVI", "number": "84", "category": "Pokemon"}]},
        {"player": "Misty", "placement": 12, "archetype": "Gardevoir_ex",
         "cards": [{"count": 4, "name": "Ralts", "set": "SVI", "number": 84}]},
        {"archetype": "Charizard  ex",
         "cards": [{"count": 1, "name": "Pidgeot ex", "set": "OBF", "number": "164"}]}
    ]"#;

    #[test]
    fn test_parse_corpus_stamps_tournament_and_tags() {
        let decks = parse_corpus(CORPUS.as_bytes(), "2025-08-15, Worlds").unwrap();
        assert_eq!(decks.len(), 3);
        assert!(decks.iter().all(|d| d.tournament.as_deref() == Some("2025-08-15, Worlds")));

        assert_eq!(decks[0].success, SuccessTag::ALL.to_vec());
        assert_eq!(decks[1].success, vec![SuccessTag::Top16, SuccessTag::Top32]);
        assert!(decks[2].success.is_empty());
        assert!(decks[1].has_tag(SuccessTag::Top16));
    }

    #[test]
    fn test_numeric_card_numbers_accepted() {
        let decks = parse_corpus(CORPUS.as_bytes(), "t").unwrap();
        let key = decks[1].cards[0].key().unwrap();
        assert_eq!(key.as_str(), "SVI~084");
        assert_eq!(decks[0].cards[0].category().as_deref(), Some("pokemon"));
    }

    #[test]
    fn test_identity_fallbacks() {
        let decks = parse_corpus(CORPUS.as_bytes(), "t").unwrap();
        assert_eq!(decks[0].identity(), "h-a1");
        assert_eq!(decks[1].identity(), "Misty");

        let anon = decks[2].identity();
        assert_eq!(anon.len(), 20);
        assert_eq!(anon, decks[2].clone().identity());
    }

    #[test]
    fn test_group_by_archetype_normalizes_labels() {
        let decks = parse_corpus(CORPUS.as_bytes(), "t").unwrap();
        let groups = group_by_archetype(&decks);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "Gardevoir ex");
        assert_eq!(groups[0].decks.len(), 2);
        assert_eq!(groups[1].label, "Charizard  ex");
        assert_eq!(normalize_archetype_name("Charizard  ex"), "Charizard ex");
    }

    #[test]
    fn test_success_tag_parsing() {
        assert_eq!("TOP8".parse::<SuccessTag>().unwrap(), SuccessTag::Top8);
        assert!("top3".parse::<SuccessTag>().is_err());
        assert!(SuccessTag::for_placement(0).is_empty());
        assert_eq!(SuccessTag::for_placement(33), Vec::<SuccessTag>::new());
    }
}
