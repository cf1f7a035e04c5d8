//! On-demand subset computation
//!
//! Answers predicates that were never materialized by running the same
//! count index and aggregation used at generation time directly over the
//! raw deck corpus. For any predicate the result equals what materializing
//! that predicate would have stored.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::blob_store::BlobStore;
use crate::cache::MemoCache;
use crate::deck::{normalize_archetype_name, parse_corpus, Deck};
use crate::error::ResolveError;
use crate::filter::FilterPredicate;
use crate::keys;
use crate::report::SubsetReport;
use crate::subset::SubsetBuilder;
use crate::synonyms::CanonicalCards;

/// Report for the decks of `archetype` in `decks` that satisfy `predicate`.
///
/// Unlike materialization there is no minimum size: a pool of one deck
/// yields that deck's report and an empty pool yields an empty report.
pub fn compute(
    decks: &[Deck],
    archetype: &str,
    predicate: &FilterPredicate,
    cards: &dyn CanonicalCards,
) -> SubsetReport {
    let wanted = normalize_archetype_name(archetype);
    let pool: Vec<&Deck> = decks
        .iter()
        .filter(|deck| normalize_archetype_name(&deck.archetype) == wanted)
        .collect();

    SubsetBuilder::new(&pool, cards, 0).report_for(&predicate.canonicalize(cards))
}

/// Fetches raw corpora (memoized per tournament) and computes reports
pub struct FallbackGenerator {
    store: Arc<dyn BlobStore>,
    cards: Arc<dyn CanonicalCards>,
    timeout: Duration,
    corpora: MemoCache<Arc<Vec<Deck>>>,
}

impl FallbackGenerator {
    pub fn new(store: Arc<dyn BlobStore>, cards: Arc<dyn CanonicalCards>, timeout: Duration) -> Self {
        Self {
            store,
            cards,
            timeout,
            corpora: MemoCache::new(),
        }
    }

    /// Raw decks of `tournament`, fetched at most once
    pub async fn corpus(&self, tournament: &str) -> Result<Arc<Vec<Deck>>, ResolveError> {
        let memo = keys::memo_key(tournament, &["decks"]);
        self.corpora
            .get_or_load(&memo, || self.fetch_corpus(tournament))
            .await
    }

    async fn fetch_corpus(&self, tournament: &str) -> Result<Arc<Vec<Deck>>, ResolveError> {
        let key = keys::decks(tournament);
        debug!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Fetching deck corpus");

        let bytes = match tokio::time::timeout(self.timeout, self.store.get(&key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return Err(ResolveError::CorpusNotFound(tournament.to_string())),
            Ok(Err(e)) => return Err(ResolveError::Store(e)),
            Err(_) => {
                return Err(ResolveError::CorpusTimeout {
                    tournament: tournament.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let decks = parse_corpus(&bytes, tournament)?;
        info!(tournament = %tournament, decks = decks.len(), "Loaded deck corpus");
        Ok(Arc::new(decks))
    }

    /// Compute the report for `predicate` over the archetype's decks
    pub async fn generate(
        &self,
        tournament: &str,
        archetype: &str,
        predicate: &FilterPredicate,
    ) -> Result<SubsetReport, ResolveError> {
        let decks = self.corpus(tournament).await?;
        let report = compute(&decks, archetype, predicate, self.cards.as_ref());

        debug!(
            tournament = %tournament,
            archetype = %archetype,
            filter = %predicate.filter_key(),
            decks = report.deck_total,
            "Computed fallback report"
        );

        Ok(report)
    }

    /// Forget the cached corpus of `tournament`
    pub fn invalidate(&self, tournament: &str) {
        self.corpora.invalidate_prefix(&keys::memo_prefix(tournament));
    }
}
