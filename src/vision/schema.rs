//! Typed vision analysis results.
//!
//! Model output is untyped JSON embedded in free text. It is parsed and
//! validated here, once, into [`VisionResult`]; nothing past this module sees
//! the raw shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::nutrition::units;

const MAX_PORTION_GRAMS: f64 = 2000.0;
const ADJUSTED_PORTION_GRAMS: f64 = 200.0;
const ADJUSTED_PORTION_PENALTY: f64 = 0.8;
const DEFAULT_PORTION: f64 = 100.0;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const EMPTY_RESULT_CONFIDENCE: f64 = 0.6;
const ERROR_FALLBACK_CONFIDENCE: f64 = 0.6;
const UNPARSEABLE_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Partial,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Success => "success",
            AnalysisStatus::Partial => "partial",
            AnalysisStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl ImageQuality {
    fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("good") => ImageQuality::Good,
            Some("fair") => ImageQuality::Fair,
            Some("poor") => ImageQuality::Poor,
            _ => ImageQuality::Unknown,
        }
    }
}

/// A score in `[0, 1]`. Out-of-range and NaN inputs are clamped.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Confidence(0.0);
        }
        Confidence(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn min(self, other: Confidence) -> Confidence {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedDish {
    pub name: String,
    pub description: String,
    pub portion: f64,
    pub portion_unit: String,
    pub confidence: Confidence,
}

impl DetectedDish {
    pub fn portion_grams(&self) -> f64 {
        units::to_grams(self.portion, &self.portion_unit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedIngredient {
    pub name: String,
    pub category: String,
    pub portion: f64,
    pub portion_unit: String,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl DetectedIngredient {
    pub fn portion_grams(&self) -> f64 {
        units::to_grams(self.portion, &self.portion_unit)
    }
}

/// A usable analysis. `ingredients` is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub main_dish: DetectedDish,
    pub ingredients: Vec<DetectedIngredient>,
    pub confidence_overall: Confidence,
    pub image_quality: ImageQuality,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisionResult {
    Success(Analysis),
    Partial(Analysis),
    Failed { reason: String },
}

impl VisionResult {
    pub fn status(&self) -> AnalysisStatus {
        match self {
            VisionResult::Success(_) => AnalysisStatus::Success,
            VisionResult::Partial(_) => AnalysisStatus::Partial,
            VisionResult::Failed { .. } => AnalysisStatus::Failed,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.analysis()
            .map(|a| a.confidence_overall.value())
            .unwrap_or(0.0)
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            VisionResult::Success(a) | VisionResult::Partial(a) => Some(a),
            VisionResult::Failed { .. } => None,
        }
    }

    /// Renders the result in the wire schema the model is asked to produce.
    pub fn to_wire(&self) -> Value {
        match self {
            VisionResult::Failed { reason } => json!({
                "analysis_status": "failed",
                "confidence_overall": 0.0,
                "ingredients": [],
                "image_quality": "unknown",
                "additional_notes": reason,
            }),
            VisionResult::Success(a) | VisionResult::Partial(a) => json!({
                "analysis_status": self.status().as_str(),
                "confidence_overall": a.confidence_overall.value(),
                "main_food": {
                    "name": a.main_dish.name,
                    "description": a.main_dish.description,
                    "estimated_portion": a.main_dish.portion,
                    "portion_unit": a.main_dish.portion_unit,
                    "confidence": a.main_dish.confidence.value(),
                },
                "ingredients": a.ingredients.iter().map(|i| json!({
                    "name": i.name,
                    "category": i.category,
                    "estimated_portion": i.portion,
                    "portion_unit": i.portion_unit,
                    "confidence": i.confidence.value(),
                })).collect::<Vec<_>>(),
                "image_quality": a.image_quality,
                "additional_notes": a.notes,
            }),
        }
    }
}

// ---- wire shape ----

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Text(String),
}

impl LenientNumber {
    fn value(&self) -> Option<f64> {
        let value = match self {
            LenientNumber::Number(n) => Some(*n),
            LenientNumber::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnalysis {
    analysis_status: Option<String>,
    confidence_overall: Option<LenientNumber>,
    main_food: Option<Value>,
    #[serde(alias = "detected_foods")]
    ingredients: Option<Vec<Value>>,
    image_quality: Option<String>,
    additional_notes: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawItem {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    estimated_portion: Option<LenientNumber>,
    portion_unit: Option<String>,
    confidence: Option<LenientNumber>,
    notes: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Maps common abbreviations and singular forms onto the unit table's names.
pub fn canonical_unit(unit: &str) -> String {
    let u = unit.trim().to_lowercase();
    let canonical = match u.as_str() {
        "g" | "gr" | "gram" | "grams" => "grams",
        "cup" | "cups" => "cups",
        "tbsp" | "tablespoon" | "tablespoons" => "tablespoons",
        "tsp" | "teaspoon" | "teaspoons" => "teaspoons",
        "piece" | "pieces" | "pc" | "pcs" => "pieces",
        "slice" | "slices" => "slices",
        "oz" | "ounce" | "ounces" => "ounces",
        "lb" | "lbs" | "pound" | "pounds" => "pounds",
        "kg" | "kilogram" | "kilograms" => "kilograms",
        "l" | "liter" | "liters" | "litre" | "litres" => "liters",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "milliliters",
        "" => "grams",
        _ => return u,
    };
    canonical.to_string()
}

fn validate_ingredient(raw: RawItem) -> DetectedIngredient {
    let mut portion = raw
        .estimated_portion
        .as_ref()
        .and_then(LenientNumber::value)
        .unwrap_or(DEFAULT_PORTION)
        .max(1.0);
    let mut portion_unit = canonical_unit(raw.portion_unit.as_deref().unwrap_or("grams"));
    let mut confidence = Confidence::new(
        raw.confidence
            .as_ref()
            .and_then(LenientNumber::value)
            .unwrap_or(DEFAULT_CONFIDENCE),
    );
    let mut notes = raw.notes.unwrap_or_default();

    if units::to_grams(portion, &portion_unit) > MAX_PORTION_GRAMS {
        portion = ADJUSTED_PORTION_GRAMS;
        portion_unit = "grams".to_string();
        confidence = Confidence::new(confidence.value() * ADJUSTED_PORTION_PENALTY);
        if !notes.is_empty() {
            notes.push(' ');
        }
        notes.push_str("(Portion size adjusted)");
    }

    DetectedIngredient {
        name: non_blank(raw.name).unwrap_or_else(|| "Unknown food".to_string()),
        category: non_blank(raw.category).unwrap_or_else(|| "unknown".to_string()),
        portion,
        portion_unit,
        confidence,
        notes,
    }
}

fn validate_dish(raw: Option<RawItem>, ingredients: &[DetectedIngredient], overall: Confidence) -> DetectedDish {
    let raw = raw.unwrap_or_default();
    let summed_grams: f64 = ingredients.iter().map(DetectedIngredient::portion_grams).sum();

    let (portion, portion_unit) = match raw.estimated_portion.as_ref().and_then(LenientNumber::value) {
        Some(p) => (
            p.max(1.0),
            canonical_unit(raw.portion_unit.as_deref().unwrap_or("grams")),
        ),
        None => (summed_grams.max(1.0), "grams".to_string()),
    };

    DetectedDish {
        name: non_blank(raw.name).unwrap_or_else(|| "Unknown Dish".to_string()),
        description: raw.description.unwrap_or_default(),
        portion,
        portion_unit,
        confidence: raw
            .confidence
            .as_ref()
            .and_then(LenientNumber::value)
            .map(Confidence::new)
            .unwrap_or(overall),
    }
}

fn placeholder(
    name: &str,
    category: &str,
    grams: f64,
    confidence: f64,
    item_notes: String,
    notes: String,
) -> VisionResult {
    let confidence = Confidence::new(confidence);
    let ingredient = DetectedIngredient {
        name: name.to_string(),
        category: category.to_string(),
        portion: grams,
        portion_unit: "grams".to_string(),
        confidence,
        notes: item_notes,
    };
    VisionResult::Partial(Analysis {
        main_dish: DetectedDish {
            name: "Unknown Dish".to_string(),
            description: String::new(),
            portion: grams,
            portion_unit: "grams".to_string(),
            confidence,
        },
        ingredients: vec![ingredient],
        confidence_overall: confidence,
        image_quality: ImageQuality::Unknown,
        notes,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Degraded result used when the model call itself failed.
pub fn error_fallback(error: &str) -> VisionResult {
    placeholder(
        "Mixed Food Item",
        "Unknown",
        200.0,
        ERROR_FALLBACK_CONFIDENCE,
        format!("Fallback analysis due to error: {}", truncate(error, 100)),
        format!("Analysis failed, using fallback: {error}"),
    )
}

/// Degraded result used when the model answered but not in the schema.
pub fn unparseable_fallback(text: &str) -> VisionResult {
    placeholder(
        "Unknown food item",
        "unknown",
        DEFAULT_PORTION,
        UNPARSEABLE_CONFIDENCE,
        format!("Analysis text: {}...", truncate(text, 200)),
        "Failed to parse structured response".to_string(),
    )
}

fn json_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parses and validates raw model text into a [`VisionResult`].
pub fn parse_model_output(text: &str) -> VisionResult {
    let Some(slice) = json_slice(text) else {
        warn!("model output contains no JSON object");
        return unparseable_fallback(text);
    };
    match serde_json::from_str::<RawAnalysis>(slice) {
        Ok(raw) => validate(raw),
        Err(e) => {
            warn!(error = %e, "model output is not valid analysis JSON");
            unparseable_fallback(text)
        }
    }
}

fn validate(raw: RawAnalysis) -> VisionResult {
    let status = match raw.analysis_status.as_deref().map(str::trim) {
        Some("success") => AnalysisStatus::Success,
        Some("failed") => AnalysisStatus::Failed,
        _ => AnalysisStatus::Partial,
    };

    if status == AnalysisStatus::Failed {
        let reason = non_blank(raw.error)
            .or_else(|| non_blank(raw.additional_notes))
            .unwrap_or_else(|| "model reported analysis failure".to_string());
        return VisionResult::Failed { reason };
    }

    let mut overall = Confidence::new(
        raw.confidence_overall
            .as_ref()
            .and_then(LenientNumber::value)
            .unwrap_or(DEFAULT_CONFIDENCE),
    );

    let mut ingredients: Vec<DetectedIngredient> = raw
        .ingredients
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawItem>(v).ok())
        .map(validate_ingredient)
        .collect();

    let mut degraded = status == AnalysisStatus::Partial;
    if ingredients.is_empty() {
        warn!("no ingredients detected, substituting placeholder");
        ingredients.push(DetectedIngredient {
            name: "Mixed Food".to_string(),
            category: "General".to_string(),
            portion: 200.0,
            portion_unit: "grams".to_string(),
            confidence: Confidence::new(EMPTY_RESULT_CONFIDENCE),
            notes: "Fallback food item - manual identification recommended".to_string(),
        });
        overall = Confidence::new(EMPTY_RESULT_CONFIDENCE);
        degraded = true;
    } else {
        let mean = ingredients.iter().map(|i| i.confidence.value()).sum::<f64>()
            / ingredients.len() as f64;
        overall = overall.min(Confidence::new(mean));
    }

    let main_raw = raw
        .main_food
        .and_then(|v| serde_json::from_value::<RawItem>(v).ok());
    let main_dish = validate_dish(main_raw, &ingredients, overall);

    let analysis = Analysis {
        main_dish,
        ingredients,
        confidence_overall: overall,
        image_quality: ImageQuality::parse(raw.image_quality.as_deref()),
        notes: raw.additional_notes.unwrap_or_default(),
    };

    if degraded {
        VisionResult::Partial(analysis)
    } else {
        VisionResult::Success(analysis)
    }
}
