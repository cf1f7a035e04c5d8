//! Client resolver
//!
//! Turns a request (archetype plus include/exclude cards and an optional
//! quantity) into a report:
//!
//! 1. A request carrying a quantity operator goes straight to the fallback;
//!    only the generator's own count choices are materialized.
//! 2. Otherwise the archetype index is fetched (memoized), the filter key is
//!    looked up, and the subset body is fetched (memoized).
//! 3. A lookup miss, or an index or subset that cannot be read, falls back
//!    to on-demand computation. None of these are errors for the caller.
//!
//! Concurrent requests for the same index or subset share one fetch.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blob_store::BlobStore;
use crate::cache::MemoCache;
use crate::config::ResolverConfig;
use crate::deck::normalize_archetype_name;
use crate::error::ResolveError;
use crate::fallback::FallbackGenerator;
use crate::filter::{
    FilterKey, FilterPredicate, QuantityOperator, RawExclude, RawInclude, RawPredicate,
};
use crate::indexer::{ArchetypeIndex, Subset};
use crate::keys;
use crate::persistence::PersistenceGateway;
use crate::report::SubsetReport;
use crate::synonyms::CanonicalCards;

// =============================================================================
// Request / response
// =============================================================================

/// One resolution request as issued by a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub tournament: String,
    pub archetype: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Applied to every included card
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

impl ResolveRequest {
    pub fn new(tournament: &str, archetype: &str) -> Self {
        Self {
            tournament: tournament.to_string(),
            archetype: archetype.to_string(),
            ..Default::default()
        }
    }

    pub fn include(mut self, card: &str) -> Self {
        self.include.push(card.to_string());
        self
    }

    pub fn exclude(mut self, card: &str) -> Self {
        self.exclude.push(card.to_string());
        self
    }

    pub fn quantity(mut self, operator: &str, count: u32) -> Self {
        self.operator = Some(operator.to_string());
        self.count = Some(count);
        self
    }

    /// Whether the request names a copy-count comparison; `any` and `""`
    /// are plain include/exclude requests
    pub fn has_quantity(&self) -> bool {
        self.operator
            .as_deref()
            .and_then(|op| op.parse::<QuantityOperator>().ok())
            .and_then(QuantityOperator::count_op)
            .is_some()
    }

    /// Validate into a predicate
    pub fn predicate(&self) -> Result<FilterPredicate, ResolveError> {
        if self.tournament.trim().is_empty() {
            return Err(ResolveError::InvalidRequest("tournament is required".into()));
        }
        if normalize_archetype_name(&self.archetype).is_empty() {
            return Err(ResolveError::InvalidRequest("archetype is required".into()));
        }

        let raw = RawPredicate {
            include: self
                .include
                .iter()
                .map(|card| RawInclude {
                    card_id: card.clone(),
                    operator: self.operator.clone(),
                    count: self.count,
                })
                .collect(),
            exclude: self
                .exclude
                .iter()
                .map(|card| RawExclude { card_id: card.clone() })
                .collect(),
        };

        FilterPredicate::try_from(raw).map_err(|e| ResolveError::InvalidRequest(e.to_string()))
    }
}

/// Why a request was computed on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    QuantityFilter,
    NotMaterialized,
    IndexUnavailable,
    SubsetUnavailable,
}

/// Where a report came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSource {
    Materialized { subset_id: String },
    Fallback { reason: FallbackReason },
}

/// Answer to a [`ResolveRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub filter_key: FilterKey,
    pub source: ResolutionSource,
    pub report: SubsetReport,
}

impl Resolution {
    pub fn is_materialized(&self) -> bool {
        matches!(self.source, ResolutionSource::Materialized { .. })
    }
}

// =============================================================================
// Resolver
// =============================================================================

struct Inner {
    gateway: PersistenceGateway,
    cards: Arc<dyn CanonicalCards>,
    fallback: FallbackGenerator,
    indexes: MemoCache<Option<Arc<ArchetypeIndex>>>,
    subsets: MemoCache<Option<Arc<Subset>>>,
    intent_delay: Duration,
}

/// Resolves requests against published artifacts; cheap to clone
#[derive(Clone)]
pub struct SubsetResolver {
    inner: Arc<Inner>,
}

impl SubsetResolver {
    pub fn new(store: Arc<dyn BlobStore>, cards: Arc<dyn CanonicalCards>, config: &ResolverConfig) -> Self {
        let inner = Inner {
            gateway: PersistenceGateway::new(store.clone()),
            fallback: FallbackGenerator::new(store, cards.clone(), config.corpus_timeout()),
            cards,
            indexes: MemoCache::new(),
            subsets: MemoCache::new(),
            intent_delay: config.intent_delay(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Validated predicate with reprints mapped to their canonical printing
    fn predicate(&self, request: &ResolveRequest) -> Result<FilterPredicate, ResolveError> {
        Ok(request.predicate()?.canonicalize(self.inner.cards.as_ref()))
    }

    /// Resolve one request
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, ResolveError> {
        let predicate = self.predicate(request)?;
        let filter_key = predicate.filter_key();
        let tournament = request.tournament.as_str();
        let archetype = normalize_archetype_name(&request.archetype);

        if request.has_quantity() {
            return self
                .fall_back(tournament, &archetype, predicate, FallbackReason::QuantityFilter)
                .await;
        }

        let Some(index) = self.index(tournament, &archetype).await else {
            return self
                .fall_back(tournament, &archetype, predicate, FallbackReason::IndexUnavailable)
                .await;
        };

        let Some(subset_id) = index.lookup(&filter_key) else {
            return self
                .fall_back(tournament, &archetype, predicate, FallbackReason::NotMaterialized)
                .await;
        };

        match self.subset(tournament, &archetype, subset_id).await {
            Some(subset) => {
                debug!(filter = %filter_key, subset_id = %subset.id, "Resolved materialized subset");
                Ok(Resolution {
                    filter_key,
                    source: ResolutionSource::Materialized {
                        subset_id: subset.id.clone(),
                    },
                    report: subset.report.clone(),
                })
            }
            None => {
                self.fall_back(tournament, &archetype, predicate, FallbackReason::SubsetUnavailable)
                    .await
            }
        }
    }

    async fn fall_back(
        &self,
        tournament: &str,
        archetype: &str,
        predicate: FilterPredicate,
        reason: FallbackReason,
    ) -> Result<Resolution, ResolveError> {
        debug!(archetype = %archetype, filter = %predicate.filter_key(), ?reason, "Falling back to on-demand report");
        let report = self.inner.fallback.generate(tournament, archetype, &predicate).await?;
        Ok(Resolution {
            filter_key: predicate.filter_key(),
            source: ResolutionSource::Fallback { reason },
            report,
        })
    }

    /// Archetype index, memoized; `None` when absent or unreadable
    pub async fn index(&self, tournament: &str, archetype: &str) -> Option<Arc<ArchetypeIndex>> {
        let archetype = normalize_archetype_name(archetype);
        let key = keys::archetype_index(tournament, &archetype);
        let memo = keys::memo_key(tournament, &["index", &archetype]);
        self.load(&self.inner.indexes, &memo, &key).await
    }

    async fn subset(&self, tournament: &str, archetype: &str, subset_id: &str) -> Option<Arc<Subset>> {
        let key = keys::subset(tournament, archetype, subset_id);
        let memo = keys::memo_key(tournament, &["subset", archetype, subset_id]);
        self.load(&self.inner.subsets, &memo, &key).await
    }

    async fn load<T>(&self, cache: &MemoCache<Option<Arc<T>>>, memo: &str, key: &str) -> Option<Arc<T>>
    where
        T: serde::de::DeserializeOwned + Send + Sync,
    {
        let gateway = &self.inner.gateway;
        let loaded = cache
            .get_or_load(memo, || async move {
                Ok::<_, crate::error::SubsetError>(gateway.fetch_json::<T>(key).await?.map(Arc::new))
            })
            .await;

        match loaded {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(key = %key, "Artifact not found, using fallback");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable artifact, using fallback");
                None
            }
        }
    }

    /// Subset id a request would resolve to, without fetching the subset body
    pub async fn lookup(&self, request: &ResolveRequest) -> Option<String> {
        if request.has_quantity() {
            return None;
        }
        let filter_key = self.predicate(request).ok()?.filter_key();
        let index = self.index(&request.tournament, &request.archetype).await?;
        index.lookup(&filter_key).map(str::to_string)
    }

    /// Hover signal: after the intent delay, warm the index and resolve the
    /// filter key. Abort the returned handle when the hover ends early.
    pub fn on_intent(&self, request: ResolveRequest) -> IntentHandle {
        let resolver = self.clone();
        let delay = self.inner.intent_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            resolver.lookup(&request).await
        });
        IntentHandle { handle }
    }

    /// Drop memoized indexes, subsets and corpora of a tournament
    pub fn invalidate(&self, tournament: &str) {
        let prefix = keys::memo_prefix(tournament);
        self.inner.indexes.invalidate_prefix(&prefix);
        self.inner.subsets.invalidate_prefix(&prefix);
        self.inner.fallback.invalidate(tournament);
    }
}

/// Pending speculative resolution
pub struct IntentHandle {
    handle: JoinHandle<Option<String>>,
}

impl IntentHandle {
    /// Abandon the prefetch
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Subset id the hovered request maps to; `None` when cancelled, not
    /// materialized, or not needed (quantity requests)
    pub async fn outcome(self) -> Option<String> {
        self.handle.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(ResolveRequest::new("", "Gardevoir ex").predicate().is_err());
        assert!(ResolveRequest::new("Worlds", " _ ").predicate().is_err());
        assert!(ResolveRequest::new("Worlds", "Gardevoir ex").include("junk").predicate().is_err());

        let p = ResolveRequest::new("Worlds", "Gardevoir ex")
            .include("svi~86")
            .exclude("TWM~95")
            .predicate()
            .unwrap();
        assert_eq!(p.filter_key().as_str(), "inc:SVI~086|exc:TWM~095");
    }

    #[test]
    fn test_quantity_applies_to_every_include() {
        let request = ResolveRequest::new("Worlds", "Gardevoir ex")
            .include("SVI~86")
            .include("PAL~185")
            .quantity(">=", 2);
        assert!(request.has_quantity());
        assert_eq!(
            request.predicate().unwrap().filter_key().as_str(),
            "inc:PAL~185:>=2+SVI~086:>=2|exc:"
        );

        let none = ResolveRequest::new("Worlds", "Gardevoir ex").include("SVI~86");
        let none = ResolveRequest { operator: Some(String::new()), ..none };
        assert!(!none.has_quantity());
        assert_eq!(none.predicate().unwrap().filter_key().as_str(), "inc:|exc:SVI~086");

        let any = ResolveRequest::new("Worlds", "Gardevoir ex").include("SVI~86");
        let any = ResolveRequest { operator: Some("any".into()), ..any };
        assert!(!any.has_quantity());
        assert_eq!(any.predicate().unwrap().filter_key().as_str(), "inc:SVI~086|exc:");

        let dangling = ResolveRequest::new("Worlds", "Gardevoir ex").include("SVI~86");
        let dangling = ResolveRequest { operator: Some("=".into()), ..dangling };
        assert!(dangling.predicate().is_err());
    }

    #[test]
    fn test_resolution_source_serialization() {
        let source = ResolutionSource::Fallback { reason: FallbackReason::NotMaterialized };
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            serde_json::json!({"kind": "fallback", "reason": "not_materialized"})
        );
    }
}
