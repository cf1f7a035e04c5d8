//! Filter combination generation
//!
//! Decides which predicates get materialized for an archetype. The policy
//! is deliberately bounded; anything it does not emit is answered by the
//! client fallback instead.
//!
//! 1. Cards present in every deck with a single copy count carry no signal
//!    and are never filtered on.
//! 2. The remaining ("optional") cards must reach a usage threshold.
//! 3. Per qualifying card: presence, up to `max_count_variations` exact
//!    counts, one `>=` on the second most common count, and an exclude.
//! 4. Only the `top_k_cross` most used cards get include/exclude cross
//!    pairs, which keeps cross terms at O(K²).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::card_key::CardKey;
use crate::filter::{CountOp, FilterKey, FilterPredicate};
use crate::report::{CardUsageStat, SubsetReport};

/// Tuning knobs for generation. They bound index size; none of them is
/// needed for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorPolicy {
    /// Minimum usage (percent of the archetype) for a card to be filtered on
    #[serde(default = "default_usage_threshold")]
    pub usage_threshold_pct: f64,

    /// Number of most-used cards that receive cross include/exclude pairs
    #[serde(default = "default_top_k")]
    pub top_k_cross: usize,

    /// Maximum "exactly N copies" predicates per card
    #[serde(default = "default_max_count_variations")]
    pub max_count_variations: usize,

    /// Subsets with fewer decks are discarded
    #[serde(default = "default_min_subset_size")]
    pub min_subset_size: u32,

    /// Archetypes with fewer decks get no include/exclude artifacts
    #[serde(default = "default_min_archetype_decks")]
    pub min_archetype_decks: u32,
}

fn default_usage_threshold() -> f64 { 5.0 }
fn default_top_k() -> usize { 10 }
fn default_max_count_variations() -> usize { 3 }
fn default_min_subset_size() -> u32 { 2 }
fn default_min_archetype_decks() -> u32 { 4 }

impl Default for GeneratorPolicy {
    fn default() -> Self {
        Self {
            usage_threshold_pct: default_usage_threshold(),
            top_k_cross: default_top_k(),
            max_count_variations: default_max_count_variations(),
            min_subset_size: default_min_subset_size(),
            min_archetype_decks: default_min_archetype_decks(),
        }
    }
}

/// Present in every deck with no copy-count variance
pub fn is_always_included(item: &CardUsageStat) -> bool {
    item.total > 0 && item.found == item.total && item.dist.len() <= 1
}

/// Output of one generation pass
#[derive(Debug, Clone, Default)]
pub struct CombinationPlan {
    /// Cards excluded from filtering because they never vary
    pub always_included: BTreeSet<CardKey>,
    /// Optional cards at or above the usage threshold, most used first
    pub candidates: Vec<CardKey>,
    /// Predicates to evaluate, in emission order, unique by filter key
    pub predicates: Vec<FilterPredicate>,
}

struct Candidate<'a> {
    key: CardKey,
    item: &'a CardUsageStat,
}

impl Candidate<'_> {
    fn has_variance(&self) -> bool {
        self.item.dist.len() > 1
    }
}

#[derive(Default)]
struct PlanBuilder {
    seen: HashSet<FilterKey>,
    predicates: Vec<FilterPredicate>,
}

impl PlanBuilder {
    fn push(&mut self, predicate: FilterPredicate) {
        if self.seen.insert(predicate.filter_key()) {
            self.predicates.push(predicate);
        }
    }
}

/// Enumerate the bounded predicate set for one archetype's full-pool report
pub fn generate(report: &SubsetReport, policy: &GeneratorPolicy) -> CombinationPlan {
    let mut always_included = BTreeSet::new();
    let mut candidates: Vec<Candidate<'_>> = Vec::new();

    for item in &report.items {
        let Some(key) = item.card_key() else {
            continue;
        };
        if is_always_included(item) {
            always_included.insert(key);
        } else if item.pct >= policy.usage_threshold_pct {
            candidates.push(Candidate { key, item });
        }
    }

    // Report order is already found-descending; keep it stable for top-K
    candidates.sort_by(|a, b| b.item.found.cmp(&a.item.found).then(a.key.cmp(&b.key)));

    let mut plan = PlanBuilder::default();

    for candidate in &candidates {
        let key = &candidate.key;
        plan.push(FilterPredicate::new().include(key.clone()));

        let counts = candidate.item.counts_by_popularity();
        if candidate.has_variance() {
            for copies in counts.iter().take(policy.max_count_variations) {
                plan.push(FilterPredicate::new().include_count(key.clone(), CountOp::Eq, *copies));
            }
            if let Some(&second) = counts.get(1) {
                if second > 1 {
                    plan.push(FilterPredicate::new().include_count(key.clone(), CountOp::Ge, second));
                }
            }
        }

        plan.push(FilterPredicate::new().exclude(key.clone()));
    }

    let top: Vec<&Candidate<'_>> = candidates.iter().take(policy.top_k_cross).collect();
    for inc in &top {
        for exc in &top {
            if inc.key == exc.key {
                continue;
            }
            plan.push(
                FilterPredicate::new()
                    .include(inc.key.clone())
                    .exclude(exc.key.clone()),
            );
            if inc.has_variance() {
                if let Some(copies) = inc.item.most_common_copies() {
                    plan.push(
                        FilterPredicate::new()
                            .include_count(inc.key.clone(), CountOp::Eq, copies)
                            .exclude(exc.key.clone()),
                    );
                }
            }
        }
    }

    debug!(
        always_included = always_included.len(),
        candidates = candidates.len(),
        predicates = plan.predicates.len(),
        "Generated filter combinations"
    );

    CombinationPlan {
        always_included,
        candidates: candidates.into_iter().map(|c| c.key).collect(),
        predicates: plan.predicates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CopyBucket;

    fn item(set: &str, number: &str, found: u32, total: u32, dist: &[(u32, u32)]) -> CardUsageStat {
        CardUsageStat {
            rank: 0,
            name: format!("{}-{}", set, number),
            set: Some(set.to_string()),
            number: Some(number.to_string()),
            category: None,
            uid: None,
            found,
            total,
            pct: crate::report::percent(found, total),
            dist: dist
                .iter()
                .map(|&(copies, players)| CopyBucket {
                    copies,
                    players,
                    percent: crate::report::percent(players, found),
                })
                .collect(),
        }
    }

    fn key(raw: &str) -> CardKey {
        CardKey::parse(raw).unwrap()
    }

    fn keys(plan: &CombinationPlan) -> Vec<String> {
        plan.predicates.iter().map(|p| p.filter_key().to_string()).collect()
    }

    #[test]
    fn test_always_included_skipped() {
        let report = SubsetReport {
            deck_total: 20,
            items: vec![
                item("SVI", "001", 20, 20, &[(4, 20)]),
                item("SVI", "002", 20, 20, &[(1, 5), (2, 15)]),
            ],
        };
        let plan = generate(&report, &GeneratorPolicy::default());

        assert!(plan.always_included.contains(&key("SVI~001")));
        assert_eq!(plan.candidates, vec![key("SVI~002")]);
        assert!(keys(&plan).iter().all(|k| !k.contains("SVI~001")));
    }

    #[test]
    fn test_threshold_filters_rare_cards() {
        let report = SubsetReport {
            deck_total: 100,
            items: vec![
                item("SVI", "001", 50, 100, &[(1, 50)]),
                item("SVI", "002", 4, 100, &[(1, 4)]),
            ],
        };
        let plan = generate(&report, &GeneratorPolicy::default());
        assert_eq!(plan.candidates, vec![key("SVI~001")]);
    }

    #[test]
    fn test_per_card_predicates() {
        let report = SubsetReport {
            deck_total: 20,
            items: vec![item("PAL", "185", 12, 20, &[(1, 3), (2, 7), (3, 2)])],
        };
        let plan = generate(&report, &GeneratorPolicy::default());

        assert_eq!(
            keys(&plan),
            vec![
                "inc:PAL~185|exc:",
                "inc:PAL~185:=2|exc:",
                "inc:PAL~185:=1|exc:",
                "inc:PAL~185:=3|exc:",
                "inc:|exc:PAL~185",
            ]
        );
    }

    #[test]
    fn test_ge_uses_second_most_common_count() {
        let report = SubsetReport {
            deck_total: 20,
            items: vec![item("PAL", "185", 12, 20, &[(1, 8), (3, 4)])],
        };
        let plan = generate(&report, &GeneratorPolicy::default());
        assert!(keys(&plan).contains(&"inc:PAL~185:>=3|exc:".to_string()));
    }

    #[test]
    fn test_count_variations_capped() {
        let policy = GeneratorPolicy { max_count_variations: 1, ..Default::default() };
        let report = SubsetReport {
            deck_total: 20,
            items: vec![item("PAL", "185", 12, 20, &[(1, 3), (2, 7), (3, 2)])],
        };
        let plan = generate(&report, &policy);
        let exact = keys(&plan).iter().filter(|k| k.contains(":=")).count();
        assert_eq!(exact, 1);
    }

    #[test]
    fn test_cross_pairs_limited_to_top_k() {
        let items: Vec<CardUsageStat> = (1..=5)
            .map(|n| item("SVI", &format!("{:03}", n), 20 - n, 20, &[(1, 20 - n)]))
            .collect();
        let report = SubsetReport { deck_total: 20, items };
        let policy = GeneratorPolicy { top_k_cross: 3, ..Default::default() };
        let plan = generate(&report, &policy);

        let cross: Vec<String> = keys(&plan)
            .into_iter()
            .filter(|k| !k.starts_with("inc:|") && !k.ends_with("|exc:"))
            .collect();
        // 3 * 2 ordered pairs; no variance so no count-qualified variants
        assert_eq!(cross.len(), 6);
        assert!(cross.iter().all(|k| !k.contains("SVI~004") && !k.contains("SVI~005")));
    }

    #[test]
    fn test_cross_pairs_get_count_variant_for_varying_cards() {
        let report = SubsetReport {
            deck_total: 20,
            items: vec![
                item("SVI", "001", 15, 20, &[(1, 10), (2, 5)]),
                item("SVI", "002", 10, 20, &[(1, 10)]),
            ],
        };
        let plan = generate(&report, &GeneratorPolicy::default());
        let all = keys(&plan);

        assert!(all.contains(&"inc:SVI~001|exc:SVI~002".to_string()));
        assert!(all.contains(&"inc:SVI~001:=1|exc:SVI~002".to_string()));
        assert!(all.contains(&"inc:SVI~002|exc:SVI~001".to_string()));
        assert!(!all.iter().any(|k| k.starts_with("inc:SVI~002:=")));
    }

    #[test]
    fn test_predicates_unique() {
        let report = SubsetReport {
            deck_total: 20,
            items: vec![item("PAL", "185", 12, 20, &[(1, 6), (2, 6)])],
        };
        let plan = generate(&report, &GeneratorPolicy::default());
        let all = keys(&plan);
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }
}
