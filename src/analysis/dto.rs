use serde::Serialize;
use time::{macros::format_description, Date};
use uuid::Uuid;

use super::repo_types::{DailyNutritionTotal, MealType};
use super::services::AnalysisRequest;
use crate::nutrition::NutrientProfile;
use crate::vision::ImageInput;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Multipart fields of `POST /analyses`, collected before validation.
#[derive(Debug, Default)]
pub struct AnalysisUpload {
    pub image: Option<ImageInput>,
    pub meal_type: Option<String>,
    pub notes: Option<String>,
    pub meal_date: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum UploadError {
    MissingImage,
    BadDate(String),
}

impl UploadError {
    pub fn message(&self) -> String {
        match self {
            UploadError::MissingImage => "image is required".into(),
            UploadError::BadDate(raw) => format!("meal_date must be YYYY-MM-DD, got {raw:?}"),
        }
    }
}

pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

impl AnalysisUpload {
    pub fn into_request(self, user_id: Uuid) -> Result<AnalysisRequest, UploadError> {
        let image = self
            .image
            .filter(|i| !i.bytes.is_empty())
            .ok_or(UploadError::MissingImage)?;
        let meal_date = match self.meal_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_date(raw).ok_or_else(|| UploadError::BadDate(raw.to_string()))?),
        };
        Ok(AnalysisRequest {
            image,
            user_id,
            meal_type: self
                .meal_type
                .as_deref()
                .map(MealType::parse_or_default)
                .unwrap_or_default(),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            meal_date,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DailyTotalResponse {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub totals: NutrientProfile,
    pub meal_count: i32,
}

impl DailyTotalResponse {
    /// A day with no completed analyses reads as all zeros.
    pub fn from_ledger(date: Date, row: Option<DailyNutritionTotal>) -> Self {
        match row {
            Some(t) => Self {
                date,
                totals: t.totals,
                meal_count: t.meal_count,
            },
            None => Self {
                date,
                totals: NutrientProfile::ZERO,
                meal_count: 0,
            },
        }
    }
}
