//! Split candidate generation
//!
//! Every node is offered the same universe of (feature, criterion) pairs:
//! one equality test per known counterparty on either side of the trade, one
//! per known asset, and the six statistical buckets on each numeric feature.

use super::features::{Bucket, Criterion, Feature};
use crate::error::Result;
use serde::Serialize;
use std::collections::HashSet;

/// Source of the reference data the equality candidates are built from
pub trait ReferenceRegistry: Send + Sync {
    /// Distinct known counterparty codes
    fn counterparty_codes(&self) -> Result<Vec<String>>;
    /// Distinct known asset/product names
    fn asset_names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SplitCandidate {
    pub feature: Feature,
    pub criterion: Criterion,
}

impl SplitCandidate {
    pub fn new(feature: Feature, criterion: Criterion) -> Self {
        Self { feature, criterion }
    }
}

/// Build the candidate universe in enumeration order (ties go to the earliest)
pub fn generate_candidates(counterparties: &[String], assets: &[String]) -> Vec<SplitCandidate> {
    let mut candidates = Vec::with_capacity(2 * counterparties.len() + assets.len() + 12);

    for side in [Feature::BuyingParty, Feature::SellingParty] {
        candidates.extend(
            counterparties
                .iter()
                .map(|code| SplitCandidate::new(side, Criterion::Equals(code.clone()))),
        );
    }
    candidates.extend(
        assets
            .iter()
            .map(|name| SplitCandidate::new(Feature::Asset, Criterion::Equals(name.clone()))),
    );
    for feature in [Feature::Quantity, Feature::StrikePrice] {
        candidates.extend(
            Bucket::ALL
                .iter()
                .map(|b| SplitCandidate::new(feature, Criterion::Bucket(*b))),
        );
    }

    candidates
}

pub fn candidates_from_registry(registry: &dyn ReferenceRegistry) -> Result<Vec<SplitCandidate>> {
    let counterparties = registry.counterparty_codes()?;
    let assets = registry.asset_names()?;
    Ok(generate_candidates(&counterparties, &assets))
}

/// Drop candidates already rejected during the current run
pub fn exclude(candidates: &[SplitCandidate], rejected: &HashSet<SplitCandidate>) -> Vec<SplitCandidate> {
    candidates
        .iter()
        .filter(|c| !rejected.contains(*c))
        .cloned()
        .collect()
}
