//! Blob layout
//!
//! All artifacts live under two roots:
//!
//! ```text
//! reports/{tournament}/decks.json
//! reports/{tournament}/master.json
//! reports/{tournament}/cardIndex.json
//! reports/{tournament}/archetypes/index.json
//! reports/{tournament}/archetypes/{archetype}.json
//! include-exclude/{tournament}/{archetype}/index.json
//! include-exclude/{tournament}/{archetype}/unique_subsets/{subset_id}.json
//! ```
//!
//! Tournament segments keep their spaces; archetype segments use
//! underscores. Both drop characters that are not valid in file names.

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Tournament directory segment
pub fn tournament_segment(tournament: &str) -> String {
    tournament.trim().chars().filter(|c| !FORBIDDEN.contains(c)).collect()
}

/// Archetype file/directory segment: spaces become underscores
pub fn archetype_segment(archetype: &str) -> String {
    archetype
        .trim()
        .chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Raw deck corpus
pub fn decks(tournament: &str) -> String {
    format!("reports/{}/decks.json", tournament_segment(tournament))
}

/// Full-tournament report
pub fn master_report(tournament: &str) -> String {
    format!("reports/{}/master.json", tournament_segment(tournament))
}

/// Tournament-wide card index
pub fn card_index(tournament: &str) -> String {
    format!("reports/{}/cardIndex.json", tournament_segment(tournament))
}

/// List of archetypes with their deck counts
pub fn archetype_list(tournament: &str) -> String {
    format!("reports/{}/archetypes/index.json", tournament_segment(tournament))
}

/// Full-pool report of one archetype
pub fn archetype_report(tournament: &str, archetype: &str) -> String {
    format!(
        "reports/{}/archetypes/{}.json",
        tournament_segment(tournament),
        archetype_segment(archetype)
    )
}

/// Prefix holding every include/exclude artifact of an archetype
pub fn subset_root(tournament: &str, archetype: &str) -> String {
    format!(
        "include-exclude/{}/{}/",
        tournament_segment(tournament),
        archetype_segment(archetype)
    )
}

/// Prefix of all include/exclude artifacts of a tournament
pub fn tournament_subset_root(tournament: &str) -> String {
    format!("include-exclude/{}/", tournament_segment(tournament))
}

pub fn archetype_index(tournament: &str, archetype: &str) -> String {
    format!("{}index.json", subset_root(tournament, archetype))
}

/// Prefix of the unique subset bodies of an archetype
pub fn subset_dir(tournament: &str, archetype: &str) -> String {
    format!("{}unique_subsets/", subset_root(tournament, archetype))
}

pub fn subset(tournament: &str, archetype: &str, subset_id: &str) -> String {
    format!("{}{}.json", subset_dir(tournament, archetype), subset_id)
}

/// Cache key prefix for everything belonging to one tournament
pub fn memo_prefix(tournament: &str) -> String {
    format!("{}::", tournament_segment(tournament))
}

/// Cache key for a memoized artifact
pub fn memo_key(tournament: &str, parts: &[&str]) -> String {
    let mut key = memo_prefix(tournament);
    key.push_str(&parts.join("::"));
    key
}
