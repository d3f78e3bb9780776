use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::StoreError;
use crate::nutrition::{DataSource, NutrientProfile};
use crate::vision::AnalysisStatus;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "processing" => Some(SessionStatus::Processing),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    #[default]
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }

    /// Unrecognised values map to lunch.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => MealType::Breakfast,
            "dinner" => MealType::Dinner,
            "snack" => MealType::Snack,
            _ => MealType::Lunch,
        }
    }
}

/// Whether a dish profile was derived from an analysis or entered by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DishSource {
    Model,
    Curated,
}

impl DishSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DishSource::Model => "model",
            DishSource::Curated => "curated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(DishSource::Model),
            "curated" => Some(DishSource::Curated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub analysis_status: Option<AnalysisStatus>,
    pub raw_analysis: Option<Value>,
    pub total_calories: Option<f64>,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MainDish {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub portion_size: f64,
    pub portion_unit: String,
    pub nutrients_per_100g: NutrientProfile,
    pub source: DishSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingredient {
    pub id: Uuid,
    pub session_id: Uuid,
    pub main_dish_id: Uuid,
    pub name: String,
    pub category: String,
    pub portion: f64,
    pub portion_unit: String,
    pub portion_grams: f64,
    pub confidence: f64,
    pub nutrients: NutrientProfile,
    pub data_source: DataSource,
    pub matched: String,
    pub fdc_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMeal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub main_dish_id: Uuid,
    pub meal_type: MealType,
    #[serde(with = "iso_date")]
    pub meal_date: Date,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyNutritionTotal {
    pub user_id: Uuid,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub totals: NutrientProfile,
    pub meal_count: i32,
}

// ---- write set ----

#[derive(Debug, Clone)]
pub struct NewMainDish {
    pub name: String,
    pub description: String,
    pub portion_size: f64,
    pub portion_unit: String,
    pub nutrients_per_100g: NutrientProfile,
}

#[derive(Debug, Clone)]
pub struct NewIngredient {
    pub name: String,
    pub category: String,
    pub portion: f64,
    pub portion_unit: String,
    pub portion_grams: f64,
    pub confidence: f64,
    pub nutrients: NutrientProfile,
    pub data_source: DataSource,
    pub matched: String,
    pub fdc_id: Option<u64>,
}

/// Everything one completed analysis writes, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct CompletedAnalysis {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub analysis_status: AnalysisStatus,
    pub raw_analysis: Value,
    pub total: NutrientProfile,
    pub confidence: f64,
    pub main_dish: NewMainDish,
    pub ingredients: Vec<NewIngredient>,
    pub meal_type: MealType,
    pub meal_date: Date,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommittedAnalysis {
    pub main_dish: MainDish,
    /// False when an existing dish with the same name was reused.
    pub dish_created: bool,
    pub ingredients: Vec<Ingredient>,
    pub meal: UserMeal,
    pub daily_total: DailyNutritionTotal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    pub session: AnalysisSession,
    pub main_dish: Option<MainDish>,
    pub ingredients: Vec<Ingredient>,
    pub meal: Option<UserMeal>,
}

// ---- rows ----

#[derive(Debug, FromRow)]
pub struct NutrientColumns {
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

impl From<NutrientColumns> for NutrientProfile {
    fn from(c: NutrientColumns) -> Self {
        Self {
            calories: c.calories,
            protein: c.protein,
            carbohydrates: c.carbohydrates,
            fat: c.fat,
            fiber: c.fiber,
            sugar: c.sugar,
            sodium: c.sodium,
            calcium: c.calcium,
            iron: c.iron,
        }
    }
}

fn decode<T>(value: Option<T>, what: &str, raw: &str) -> Result<T, StoreError> {
    value.ok_or_else(|| StoreError::Decode(format!("{what} {raw:?}")))
}

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub analysis_status: Option<String>,
    pub raw_analysis: Option<Value>,
    pub total_calories: Option<f64>,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<SessionRow> for AnalysisSession {
    type Error = StoreError;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        let analysis_status = match r.analysis_status.as_deref() {
            None => None,
            Some("success") => Some(AnalysisStatus::Success),
            Some("partial") => Some(AnalysisStatus::Partial),
            Some("failed") => Some(AnalysisStatus::Failed),
            Some(other) => return Err(StoreError::Decode(format!("analysis status {other:?}"))),
        };
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            status: decode(SessionStatus::parse(&r.status), "session status", &r.status)?,
            analysis_status,
            raw_analysis: r.raw_analysis,
            total_calories: r.total_calories,
            confidence: r.confidence,
            error: r.error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MainDishRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub portion_size: f64,
    pub portion_unit: String,
    #[sqlx(flatten)]
    pub nutrients: NutrientColumns,
    pub source: String,
}

impl TryFrom<MainDishRow> for MainDish {
    type Error = StoreError;

    fn try_from(r: MainDishRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            description: r.description,
            portion_size: r.portion_size,
            portion_unit: r.portion_unit,
            nutrients_per_100g: r.nutrients.into(),
            source: decode(DishSource::parse(&r.source), "dish source", &r.source)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct UpsertedDishRow {
    #[sqlx(flatten)]
    pub dish: MainDishRow,
    pub inserted: bool,
}

#[derive(Debug, FromRow)]
pub struct IngredientRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub main_dish_id: Uuid,
    pub name: String,
    pub category: String,
    pub portion: f64,
    pub portion_unit: String,
    pub portion_grams: f64,
    pub confidence: f64,
    #[sqlx(flatten)]
    pub nutrients: NutrientColumns,
    pub data_source: String,
    pub matched: String,
    pub fdc_id: Option<i64>,
}

impl TryFrom<IngredientRow> for Ingredient {
    type Error = StoreError;

    fn try_from(r: IngredientRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            session_id: r.session_id,
            main_dish_id: r.main_dish_id,
            name: r.name,
            category: r.category,
            portion: r.portion,
            portion_unit: r.portion_unit,
            portion_grams: r.portion_grams,
            confidence: r.confidence,
            nutrients: r.nutrients.into(),
            data_source: decode(DataSource::parse(&r.data_source), "data source", &r.data_source)?,
            matched: r.matched,
            fdc_id: r.fdc_id,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct UserMealRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub main_dish_id: Uuid,
    pub meal_type: String,
    pub meal_date: Date,
    pub notes: Option<String>,
}

impl From<UserMealRow> for UserMeal {
    fn from(r: UserMealRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            session_id: r.session_id,
            main_dish_id: r.main_dish_id,
            meal_type: MealType::parse_or_default(&r.meal_type),
            meal_date: r.meal_date,
            notes: r.notes,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DailyTotalRow {
    pub user_id: Uuid,
    pub date: Date,
    #[sqlx(flatten)]
    pub totals: NutrientColumns,
    pub meal_count: i32,
}

impl From<DailyTotalRow> for DailyNutritionTotal {
    fn from(r: DailyTotalRow) -> Self {
        Self {
            user_id: r.user_id,
            date: r.date,
            totals: r.totals.into(),
            meal_count: r.meal_count,
        }
    }
}
