use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Nutrient quantities. Depending on context the vector is either normalised
/// to 100 g of food or already scaled to an actual portion.
///
/// Units: calories in kcal; protein, carbohydrates, fat, fiber, sugar in g;
/// sodium, calcium, iron in mg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientProfile {
    pub calories: f64,
    pub protein: f64,
    pub carbohydrates: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
    pub calcium: f64,
    pub iron: f64,
}

impl NutrientProfile {
    pub const ZERO: NutrientProfile = NutrientProfile {
        calories: 0.0,
        protein: 0.0,
        carbohydrates: 0.0,
        fat: 0.0,
        fiber: 0.0,
        sugar: 0.0,
        sodium: 0.0,
        calcium: 0.0,
        iron: 0.0,
    };

    /// Multiplies every field by `factor`.
    pub fn scale(&self, factor: f64) -> NutrientProfile {
        NutrientProfile {
            calories: self.calories * factor,
            protein: self.protein * factor,
            carbohydrates: self.carbohydrates * factor,
            fat: self.fat * factor,
            fiber: self.fiber * factor,
            sugar: self.sugar * factor,
            sodium: self.sodium * factor,
            calcium: self.calcium * factor,
            iron: self.iron * factor,
        }
    }

    /// Treats `self` as a per-100g profile and returns the amounts for `grams`.
    pub fn for_portion(&self, grams: f64) -> NutrientProfile {
        self.scale(grams / 100.0)
    }

    /// Field values in a fixed order, handy for element-wise comparisons.
    pub fn fields(&self) -> [f64; 9] {
        [
            self.calories,
            self.protein,
            self.carbohydrates,
            self.fat,
            self.fiber,
            self.sugar,
            self.sodium,
            self.calcium,
            self.iron,
        ]
    }

    /// Element-wise comparison with a relative tolerance (absolute near zero).
    pub fn approx_eq(&self, other: &NutrientProfile, rel_tol: f64) -> bool {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .all(|(a, b)| {
                let scale = a.abs().max(b.abs()).max(1.0);
                (a - b).abs() <= rel_tol * scale
            })
    }
}

impl Add for NutrientProfile {
    type Output = NutrientProfile;

    fn add(mut self, rhs: NutrientProfile) -> NutrientProfile {
        self += rhs;
        self
    }
}

impl AddAssign for NutrientProfile {
    fn add_assign(&mut self, rhs: NutrientProfile) {
        self.calories += rhs.calories;
        self.protein += rhs.protein;
        self.carbohydrates += rhs.carbohydrates;
        self.fat += rhs.fat;
        self.fiber += rhs.fiber;
        self.sugar += rhs.sugar;
        self.sodium += rhs.sodium;
        self.calcium += rhs.calcium;
        self.iron += rhs.iron;
    }
}

impl Sum for NutrientProfile {
    fn sum<I: Iterator<Item = NutrientProfile>>(iter: I) -> NutrientProfile {
        iter.fold(NutrientProfile::ZERO, |acc, p| acc + p)
    }
}

impl<'a> Sum<&'a NutrientProfile> for NutrientProfile {
    fn sum<I: Iterator<Item = &'a NutrientProfile>>(iter: I) -> NutrientProfile {
        iter.copied().sum()
    }
}
