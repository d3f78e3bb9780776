/// Grams assumed for one unit of anything not in the table.
pub const UNKNOWN_UNIT_GRAMS: f64 = 100.0;

/// Grams per unit. Volumes assume a density of ~1 g/ml; pieces and slices are
/// rough averages.
const GRAMS_PER_UNIT: &[(&str, f64)] = &[
    ("grams", 1.0),
    ("cups", 240.0),
    ("tablespoons", 15.0),
    ("teaspoons", 5.0),
    ("pieces", 100.0),
    ("slices", 25.0),
    ("ounces", 28.35),
    ("pounds", 453.59),
    ("kilograms", 1000.0),
    ("liters", 1000.0),
    ("milliliters", 1.0),
];

/// Looks up the factor for `unit` (case-insensitive, surrounding whitespace ignored).
pub fn grams_per_unit(unit: &str) -> Option<f64> {
    let unit = unit.trim();
    GRAMS_PER_UNIT
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .map(|(_, grams)| *grams)
}

/// Converts `amount` of `unit` to grams. Unknown units count as 100 g each.
pub fn to_grams(amount: f64, unit: &str) -> f64 {
    amount * grams_per_unit(unit).unwrap_or(UNKNOWN_UNIT_GRAMS)
}
