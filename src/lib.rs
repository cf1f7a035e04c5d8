//! Metagame Subsets - filtered deck-subset materialization and resolution
//!
//! Answers "how does archetype X look when it runs (or skips, or runs N
//! copies of) card Y?" for a tournament without recomputing statistics on
//! every request.
//!
//! ## Architecture
//!
//! - **Materialization** (batch): per archetype, enumerate a bounded set of
//!   include/exclude/quantity predicates, compute each subset's report,
//!   merge identical reports by content hash and publish an index.
//! - **Resolution** (client): look the requested predicate up in the index
//!   and fetch the stored subset, or compute the same report on demand from
//!   the raw deck corpus when it was never materialized.
//!
//! Both paths share card-key normalization, predicate evaluation and report
//! aggregation, so they agree on every number they produce.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── reports/{tournament}/
//! │   ├── decks.json                 # Raw corpus (input)
//! │   ├── master.json                # Whole-tournament report
//! │   ├── cardIndex.json             # Usage by card name
//! │   └── archetypes/
//! │       ├── index.json
//! │       └── {archetype}.json
//! └── include-exclude/{tournament}/{archetype}/
//!     ├── index.json                 # Filter key -> subset id
//!     └── unique_subsets/subset_NNN.json
//! ```

pub mod blob_store;
pub mod cache;
pub mod card_key;
pub mod config;
pub mod deck;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod generator;
pub mod indexer;
pub mod keys;
pub mod materialize;
pub mod persistence;
pub mod report;
pub mod resolver;
pub mod subset;
pub mod synonyms;

// Re-exports
pub use blob_store::{BlobStore, FsBlobStore, HttpBlobStore, MemoryBlobStore};
pub use card_key::CardKey;
pub use config::Config;
pub use deck::{Deck, SuccessTag};
pub use error::{ResolveError, StoreError, SubsetError};
pub use filter::{CountOp, FilterKey, FilterPredicate};
pub use generator::GeneratorPolicy;
pub use indexer::{ArchetypeIndex, Subset};
pub use materialize::{MaterializeSummary, Materializer};
pub use persistence::PersistenceGateway;
pub use report::{CardUsageStat, SubsetReport};
pub use resolver::{Resolution, ResolutionSource, ResolveRequest, SubsetResolver};
pub use synonyms::{CanonicalCards, IdentityCards, SynonymTable};
