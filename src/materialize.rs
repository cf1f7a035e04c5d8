//! Batch materialization
//!
//! ```text
//! decks.json ─► archetype groups ─► full-pool report ─► combinations
//!            ─► subsets ─► dedup ─► index ─► persistence pool
//! ```
//!
//! Building an archetype is CPU-bound and runs inline, one archetype at a
//! time. Finished archetypes are queued to the [`PersistencePool`], so
//! writing one archetype overlaps with building the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::deck::{group_by_archetype, normalize_archetype_name, parse_corpus, Deck, SuccessTag};
use crate::error::{Result, StoreError};
use crate::generator::{generate, GeneratorPolicy};
use crate::indexer::{DedupIndexer, IndexOutcome};
use crate::keys;
use crate::persistence::{ArchetypeArtifacts, PersistenceGateway, PersistencePool, PublishSummary};
use crate::report::{aggregate, card_index};
use crate::subset::{Rejection, SubsetBuilder};
use crate::synonyms::CanonicalCards;

/// Entry of `reports/{tournament}/archetypes/index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeEntry {
    pub name: String,
    pub file: String,
    pub deck_total: u32,
}

/// Per-archetype build counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub predicates: usize,
    pub too_small: usize,
    pub no_op: usize,
    pub duplicates: usize,
    pub unique: usize,
}

/// Result of one tournament run
#[derive(Debug, Clone, Default)]
pub struct MaterializeSummary {
    pub tournament: String,
    pub decks: usize,
    /// Decks sharing an identity with an earlier deck; still counted
    pub duplicate_decks: usize,
    pub archetypes: usize,
    pub materialized: usize,
    /// Archetypes below the minimum size, whose artifacts were removed
    pub skipped_small: usize,
    pub publish: PublishSummary,
}

/// Build the include/exclude artifacts of one archetype
pub fn build_archetype(
    tournament: &str,
    label: &str,
    decks: &[&Deck],
    cards: &dyn CanonicalCards,
    policy: &GeneratorPolicy,
    generated_at: DateTime<Utc>,
) -> (ArchetypeArtifacts, BuildStats) {
    let base = aggregate(decks, cards);
    let plan = generate(&base, policy);
    let builder = SubsetBuilder::new(decks, cards, policy.min_subset_size);

    let mut stats = BuildStats {
        predicates: plan.predicates.len(),
        ..Default::default()
    };
    let mut indexer = DedupIndexer::new();

    for predicate in &plan.predicates {
        match builder.build(predicate, &base) {
            Ok(built) => match indexer.add(built) {
                IndexOutcome::New(_) => stats.unique += 1,
                IndexOutcome::Duplicate(_) => stats.duplicates += 1,
            },
            Err(Rejection::TooSmall { .. }) => stats.too_small += 1,
            Err(Rejection::NoOp) => stats.no_op += 1,
        }
    }

    let (index, subsets) = indexer.finish(label, &base, generated_at);

    (
        ArchetypeArtifacts {
            tournament: tournament.to_string(),
            archetype: normalize_archetype_name(label),
            index,
            subsets,
        },
        stats,
    )
}

/// Runs the batch pipeline against one store
pub struct Materializer {
    gateway: PersistenceGateway,
    cards: Arc<dyn CanonicalCards>,
    policy: GeneratorPolicy,
    persistence: PersistenceConfig,
}

impl Materializer {
    pub fn new(
        gateway: PersistenceGateway,
        cards: Arc<dyn CanonicalCards>,
        policy: GeneratorPolicy,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            gateway,
            cards,
            policy,
            persistence,
        }
    }

    /// Tournament label that artifacts of a tag-restricted run are written under
    pub fn output_tournament(tournament: &str, success: Option<SuccessTag>) -> String {
        match success {
            Some(tag) => format!("{} {}", tournament, tag.as_str()),
            None => tournament.to_string(),
        }
    }

    /// Load the deck corpus of `tournament`
    pub async fn load_decks(&self, tournament: &str) -> Result<Vec<Deck>> {
        let key = keys::decks(tournament);
        let bytes = self
            .gateway
            .store()
            .get(&key)
            .await?
            .ok_or(StoreError::NotFound(key))?;
        parse_corpus(&bytes, tournament)
    }

    /// Materialize every archetype of `tournament`, optionally restricted to
    /// decks carrying one success tag
    pub async fn run(&self, tournament: &str, success: Option<SuccessTag>) -> Result<MaterializeSummary> {
        let mut decks = self.load_decks(tournament).await?;
        if let Some(tag) = success {
            decks.retain(|deck| deck.has_tag(tag));
        }
        let output = Self::output_tournament(tournament, success);
        let generated_at = Utc::now();

        let identities: HashSet<String> = decks.iter().map(Deck::identity).collect();
        let duplicate_decks = decks.len() - identities.len();
        if duplicate_decks > 0 {
            warn!(tournament = %output, duplicates = duplicate_decks, "Corpus holds repeated deck submissions");
        }

        info!(tournament = %output, decks = decks.len(), "Materializing tournament");

        // On-demand reports for a restricted run read this pool
        if success.is_some() {
            self.gateway.put_json(&keys::decks(&output), &decks).await?;
        }
        self.publish_reports(&output, &decks).await?;

        let groups = group_by_archetype(&decks);
        let mut summary = MaterializeSummary {
            tournament: output.clone(),
            decks: decks.len(),
            duplicate_decks,
            archetypes: groups.len(),
            ..Default::default()
        };

        let pool = PersistencePool::start(self.gateway.clone(), &self.persistence);

        for group in &groups {
            let name = normalize_archetype_name(&group.label);

            if (group.decks.len() as u32) < self.policy.min_archetype_decks {
                summary.skipped_small += 1;
                debug!(archetype = %name, decks = group.decks.len(), "Archetype below minimum size");
                if let Err(e) = self.gateway.remove_archetype(&output, &name).await {
                    warn!(archetype = %name, error = %e, "Failed to remove old artifacts");
                }
                continue;
            }

            let (artifacts, stats) = build_archetype(
                &output,
                &group.label,
                &group.decks,
                self.cards.as_ref(),
                &self.policy,
                generated_at,
            );

            info!(
                archetype = %name,
                decks = group.decks.len(),
                predicates = stats.predicates,
                unique = stats.unique,
                duplicates = stats.duplicates,
                too_small = stats.too_small,
                "Built archetype subsets"
            );

            pool.submit(artifacts).await?;
            summary.materialized += 1;
        }

        summary.publish = pool.finish().await;

        info!(
            tournament = %output,
            archetypes = summary.publish.archetypes_written,
            subsets = summary.publish.subsets_written,
            stale_removed = summary.publish.stale_removed,
            failures = summary.publish.failures.len(),
            "Materialization complete"
        );

        Ok(summary)
    }

    /// Publish the master report, card index and per-archetype reports
    async fn publish_reports(&self, tournament: &str, decks: &[Deck]) -> Result<()> {
        let all: Vec<&Deck> = decks.iter().collect();
        let cards = self.cards.as_ref();

        self.gateway
            .put_json(&keys::master_report(tournament), &aggregate(&all, cards))
            .await?;
        self.gateway
            .put_json(&keys::card_index(tournament), &card_index(&all))
            .await?;

        let mut entries = Vec::new();
        for group in group_by_archetype(decks) {
            let report = aggregate(&group.decks, cards);
            let key = keys::archetype_report(tournament, &normalize_archetype_name(&group.label));
            self.gateway.put_json(&key, &report).await?;
            entries.push(ArchetypeEntry {
                file: keys::archetype_segment(&normalize_archetype_name(&group.label)),
                name: group.label,
                deck_total: report.deck_total,
            });
        }
        entries.sort_by(|a, b| b.deck_total.cmp(&a.deck_total).then(a.name.cmp(&b.name)));
        self.gateway
            .put_json(&keys::archetype_list(tournament), &entries)
            .await?;

        Ok(())
    }
}
