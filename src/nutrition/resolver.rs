use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::fallback::FallbackTable;
use super::profile::NutrientProfile;
use super::throttle::Throttle;
use super::usda::NutrientDatabase;

/// Where an ingredient's nutrient values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    PrimaryLookup,
    FallbackEstimate,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::PrimaryLookup => "primary-lookup",
            DataSource::FallbackEstimate => "fallback-estimate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary-lookup" => Some(DataSource::PrimaryLookup),
            "fallback-estimate" => Some(DataSource::FallbackEstimate),
            _ => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Nutrients per 100 g.
    pub profile: NutrientProfile,
    pub source: DataSource,
    /// Database description of the match, or the fallback table key.
    pub matched: String,
    pub fdc_id: Option<u64>,
}

pub struct NutrientResolver {
    db: Arc<dyn NutrientDatabase>,
    throttle: Arc<Throttle>,
    fallback: FallbackTable,
}

impl NutrientResolver {
    pub fn new(db: Arc<dyn NutrientDatabase>, throttle: Arc<Throttle>, fallback: FallbackTable) -> Self {
        Self {
            db,
            throttle,
            fallback,
        }
    }

    pub fn fallback_table(&self) -> &FallbackTable {
        &self.fallback
    }

    /// Exact name, whitespace joined with `+`, first token only. Duplicates dropped.
    pub fn query_variants(name: &str) -> Vec<String> {
        let cleaned = name.trim().to_lowercase();
        if cleaned.is_empty() {
            return Vec::new();
        }
        let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("+");
        let first = cleaned
            .split_whitespace()
            .next()
            .unwrap_or(cleaned.as_str())
            .to_string();

        let mut variants: Vec<String> = Vec::with_capacity(3);
        for v in [cleaned, joined, first] {
            if !variants.contains(&v) {
                variants.push(v);
            }
        }
        variants
    }

    /// Resolves a per-100g profile for `name`. Never fails: database misses and
    /// errors fall through to the estimate table.
    #[instrument(skip(self))]
    pub async fn resolve(&self, name: &str, category: Option<&str>) -> Resolution {
        for query in Self::query_variants(name) {
            self.throttle.acquire().await;

            match self.db.search(&query).await {
                Ok(foods) => match foods.into_iter().next() {
                    Some(food) => {
                        info!(%query, fdc_id = ?food.fdc_id, matched = %food.description, "primary nutrient match");
                        return Resolution {
                            profile: food.nutrients,
                            source: DataSource::PrimaryLookup,
                            matched: food.description,
                            fdc_id: food.fdc_id,
                        };
                    }
                    None => debug!(%query, "no foods for query variant"),
                },
                Err(e) if e.try_next_variant() => {
                    warn!(%query, error = %e, "nutrient lookup failed; trying next variant");
                }
                Err(e) => {
                    warn!(%query, error = %e, "nutrient lookup aborted");
                    break;
                }
            }
        }

        let estimate = self.fallback.estimate(name, category);
        info!(
            bucket = estimate.label(),
            calories_per_100g = estimate.profile.calories,
            "using fallback nutrient estimate"
        );
        Resolution {
            profile: estimate.profile,
            source: DataSource::FallbackEstimate,
            matched: estimate.label().to_string(),
            fdc_id: None,
        }
    }
}
