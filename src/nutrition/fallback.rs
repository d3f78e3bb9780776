//! Static per-100g estimates used when the reference database has no match.
//!
//! The table is an ordered list of (matcher, profile) pairs. Lookup walks it
//! top to bottom, first against the ingredient name, then against the caller's
//! category, and finally lands in the default bucket.

use super::profile::NutrientProfile;

const FALLBACK_CALCIUM_MG: f64 = 50.0;
const FALLBACK_IRON_MG: f64 = 2.0;

/// Case-insensitive substring match in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matcher(&'static str);

impl Matcher {
    pub fn key(&self) -> &'static str {
        self.0
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return false;
        }
        let key = self.0.to_lowercase();
        text.contains(&key) || key.contains(&text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackEntry {
    pub matcher: Matcher,
    pub profile: NutrientProfile,
}

/// Which step of the lookup produced an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateBasis {
    Name(&'static str),
    Category(&'static str),
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackEstimate {
    pub basis: EstimateBasis,
    pub profile: NutrientProfile,
}

impl FallbackEstimate {
    pub fn label(&self) -> &'static str {
        match self.basis {
            EstimateBasis::Name(key) | EstimateBasis::Category(key) => key,
            EstimateBasis::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackTable {
    entries: Vec<FallbackEntry>,
    default: NutrientProfile,
}

const fn macro_profile(
    calories: f64,
    protein: f64,
    fat: f64,
    carbohydrates: f64,
    fiber: f64,
    sugar: f64,
    sodium: f64,
) -> NutrientProfile {
    NutrientProfile {
        calories,
        protein,
        carbohydrates,
        fat,
        fiber,
        sugar,
        sodium,
        calcium: FALLBACK_CALCIUM_MG,
        iron: FALLBACK_IRON_MG,
    }
}

const GENERAL: NutrientProfile = macro_profile(150.0, 8.0, 5.0, 20.0, 3.0, 8.0, 100.0);

// calories, protein, fat, carbs, fiber, sugar, sodium
const STANDARD_ENTRIES: &[(&str, NutrientProfile)] = &[
    ("Protein", macro_profile(200.0, 25.0, 8.0, 0.0, 0.0, 0.0, 70.0)),
    ("Meat", macro_profile(200.0, 25.0, 8.0, 0.0, 0.0, 0.0, 70.0)),
    ("Chicken", macro_profile(165.0, 31.0, 3.6, 0.0, 0.0, 0.0, 74.0)),
    ("Fish", macro_profile(150.0, 28.0, 4.0, 0.0, 0.0, 0.0, 50.0)),
    ("Vegetables", macro_profile(25.0, 2.0, 0.3, 5.0, 2.5, 2.5, 10.0)),
    ("Fruits", macro_profile(60.0, 1.0, 0.2, 15.0, 3.0, 12.0, 2.0)),
    ("Grains", macro_profile(350.0, 10.0, 2.0, 70.0, 8.0, 2.0, 5.0)),
    ("Rice", macro_profile(130.0, 2.7, 0.3, 28.0, 1.8, 0.1, 5.0)),
    ("Bread", macro_profile(265.0, 9.0, 3.2, 49.0, 2.7, 5.0, 477.0)),
    ("Dairy", macro_profile(100.0, 8.0, 3.0, 5.0, 0.0, 5.0, 40.0)),
    ("Cheese", macro_profile(350.0, 25.0, 25.0, 3.0, 0.0, 3.0, 650.0)),
    ("Egg", macro_profile(155.0, 13.0, 11.0, 1.1, 0.0, 1.1, 124.0)),
    ("General", GENERAL),
];

impl FallbackTable {
    pub fn new(entries: Vec<FallbackEntry>, default: NutrientProfile) -> Self {
        Self { entries, default }
    }

    /// The built-in table of common food groups.
    pub fn standard() -> Self {
        let entries = STANDARD_ENTRIES
            .iter()
            .map(|(key, profile)| FallbackEntry {
                matcher: Matcher(key),
                profile: *profile,
            })
            .collect();
        Self::new(entries, GENERAL)
    }

    pub fn entries(&self) -> &[FallbackEntry] {
        &self.entries
    }

    /// Always yields a profile: name match, then category match, then default.
    pub fn estimate(&self, name: &str, category: Option<&str>) -> FallbackEstimate {
        if let Some(entry) = self.first_match(name) {
            return FallbackEstimate {
                basis: EstimateBasis::Name(entry.matcher.key()),
                profile: entry.profile,
            };
        }
        if let Some(entry) = category.and_then(|c| self.first_match(c)) {
            return FallbackEstimate {
                basis: EstimateBasis::Category(entry.matcher.key()),
                profile: entry.profile,
            };
        }
        FallbackEstimate {
            basis: EstimateBasis::Default,
            profile: self.default,
        }
    }

    fn first_match(&self, text: &str) -> Option<&FallbackEntry> {
        self.entries.iter().find(|e| e.matcher.matches(text))
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self::standard()
    }
}
