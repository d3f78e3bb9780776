use serde::Serialize;

use super::profile::NutrientProfile;

const HIGH_CALORIE_WARNING: f64 = 2000.0;
const LOW_CALORIE_WARNING: f64 = 10.0;
const MACRO_ENERGY_TOLERANCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Per-ingredient amounts, in input order.
    pub ingredients: Vec<NutrientProfile>,
    pub total: NutrientProfile,
}

/// Scales each `(per-100g profile, portion grams)` pair and sums the results.
pub fn aggregate(items: &[(NutrientProfile, f64)]) -> Aggregation {
    let ingredients: Vec<NutrientProfile> = items
        .iter()
        .map(|(profile, grams)| profile.for_portion(*grams))
        .collect();
    let total = ingredients.iter().sum();
    Aggregation { ingredients, total }
}

/// The dish's own per-100g profile given the meal total and the dish portion.
/// A non-positive portion yields an all-zero profile.
pub fn per_100g(total: &NutrientProfile, portion_grams: f64) -> NutrientProfile {
    if portion_grams <= 0.0 || !portion_grams.is_finite() {
        return NutrientProfile::ZERO;
    }
    total.scale(100.0 / portion_grams)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NutritionWarning {
    VeryHighCalories,
    VeryLowCalories,
    MacroEnergyMismatch,
}

impl NutritionWarning {
    pub fn message(&self) -> &'static str {
        match self {
            NutritionWarning::VeryHighCalories => {
                "Very high calorie count detected. Please verify portion sizes."
            }
            NutritionWarning::VeryLowCalories => {
                "Very low calorie count detected. May indicate detection issues."
            }
            NutritionWarning::MacroEnergyMismatch => {
                "Macro nutrients don't align with total calories. Data may be inconsistent."
            }
        }
    }
}

/// Non-fatal plausibility checks on a meal total.
pub fn reasonableness_warnings(total: &NutrientProfile) -> Vec<NutritionWarning> {
    let mut warnings = Vec::new();

    if total.calories > HIGH_CALORIE_WARNING {
        warnings.push(NutritionWarning::VeryHighCalories);
    } else if total.calories < LOW_CALORIE_WARNING {
        warnings.push(NutritionWarning::VeryLowCalories);
    }

    let macro_energy = total.protein * 4.0 + total.carbohydrates * 4.0 + total.fat * 9.0;
    if (macro_energy - total.calories).abs() > total.calories * MACRO_ENERGY_TOLERANCE {
        warnings.push(NutritionWarning::MacroEnergyMismatch);
    }

    warnings
}
