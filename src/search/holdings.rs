//! Provider holdings summary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider holdings endpoint
pub const HOLDINGS_ENDPOINT: &str = "provider_holdings.json";

/// One row of the holdings listing: a collection and its granule count
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHoldings {
    /// Collection concept id
    #[serde(rename = "concept-id")]
    pub concept_id: String,
    /// Collection entry title
    #[serde(rename = "entry-title", default)]
    pub title: String,
    /// Owning provider
    #[serde(rename = "provider-id")]
    pub provider_id: String,
    /// Granules in the collection
    #[serde(rename = "granule-count", default)]
    pub granule_count: u64,
}

/// Collections and total granule count of one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHoldings {
    /// Provider id
    pub id: String,
    /// Sum of the collections' granule counts
    pub granule_count: u64,
    /// The provider's collections in listing order
    pub collections: Vec<CollectionHoldings>,
}

/// Group holdings rows by provider, ordered by provider id
pub fn summarize(rows: Vec<CollectionHoldings>) -> Vec<ProviderHoldings> {
    let mut providers: BTreeMap<String, ProviderHoldings> = BTreeMap::new();
    for row in rows {
        let provider = providers
            .entry(row.provider_id.clone())
            .or_insert_with(|| ProviderHoldings {
                id: row.provider_id.clone(),
                granule_count: 0,
                collections: Vec::new(),
            });
        provider.granule_count += row.granule_count;
        provider.collections.push(row);
    }
    providers.into_values().collect()
}
