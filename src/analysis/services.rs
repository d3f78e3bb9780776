use std::sync::Arc;

use serde::Serialize;
use time::{Date, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::repo::AnalysisStore;
use super::repo_types::{CompletedAnalysis, DailyNutritionTotal, MealType, NewIngredient, NewMainDish};
use crate::error::{AnalysisError, StoreError};
use crate::nutrition::aggregate::{aggregate, per_100g, reasonableness_warnings, NutritionWarning};
use crate::nutrition::{DataSource, NutrientProfile, NutrientResolver};
use crate::vision::schema::ImageQuality;
use crate::vision::{AnalysisStatus, ImageInput, VisionAnalyzer, VisionResult};

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: ImageInput,
    pub user_id: Uuid,
    pub meal_type: MealType,
    pub notes: Option<String>,
    /// Ledger date; today (UTC) when absent.
    pub meal_date: Option<Date>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeDish {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub portion: f64,
    pub portion_unit: String,
    /// Derived from this analysis' total and the dish portion.
    pub nutrients_per_100g: NutrientProfile,
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeIngredient {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub portion: f64,
    pub portion_unit: String,
    pub portion_grams: f64,
    pub confidence: f64,
    pub nutrients: NutrientProfile,
    pub data_source: DataSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub session_id: Uuid,
    pub status: AnalysisStatus,
    pub confidence: f64,
    pub image_quality: ImageQuality,
    pub main_dish: OutcomeDish,
    pub ingredients: Vec<OutcomeIngredient>,
    pub total: NutrientProfile,
    pub daily_total: DailyNutritionTotal,
    pub warnings: Vec<NutritionWarning>,
    pub notes: String,
}

/// Image in, persisted nutrient record out.
pub struct AnalysisPipeline {
    analyzer: VisionAnalyzer,
    resolver: NutrientResolver,
    store: Arc<dyn AnalysisStore>,
}

impl AnalysisPipeline {
    pub fn new(analyzer: VisionAnalyzer, resolver: NutrientResolver, store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            analyzer,
            resolver,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, meal_type = request.meal_type.as_str(), session_id)
    )]
    pub async fn run_analysis(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, AnalysisError> {
        let session = self.store.create_session(request.user_id).await?;
        let session_id = session.id;
        tracing::Span::current().record("session_id", tracing::field::display(session_id));
        if let Err(e) = self.store.mark_processing(session_id).await {
            return Err(self.persistence_failure(session_id, e).await);
        }

        if request.image.bytes.is_empty() {
            return Err(self.fail(session_id, "image is empty".to_string()).await);
        }

        let result = self.analyzer.analyze(&request.image).await;
        let raw_analysis = result.to_wire();
        let status = result.status();
        let analysis = match result {
            VisionResult::Success(a) | VisionResult::Partial(a) => a,
            VisionResult::Failed { reason } => {
                return Err(self.fail(session_id, reason).await);
            }
        };

        let mut resolved = Vec::with_capacity(analysis.ingredients.len());
        for ingredient in &analysis.ingredients {
            let grams = ingredient.portion_grams();
            let resolution = self
                .resolver
                .resolve(&ingredient.name, Some(&ingredient.category))
                .await;
            resolved.push((ingredient, grams, resolution));
        }

        let pairs: Vec<(NutrientProfile, f64)> = resolved
            .iter()
            .map(|(_, grams, r)| (r.profile, *grams))
            .collect();
        let aggregation = aggregate(&pairs);
        let dish_grams = analysis.main_dish.portion_grams();
        let dish_profile = per_100g(&aggregation.total, dish_grams);
        let warnings = reasonableness_warnings(&aggregation.total);
        for w in &warnings {
            warn!(warning = ?w, calories = aggregation.total.calories, "{}", w.message());
        }

        let ingredients: Vec<NewIngredient> = resolved
            .iter()
            .zip(&aggregation.ingredients)
            .map(|((ing, grams, r), nutrients)| NewIngredient {
                name: ing.name.clone(),
                category: ing.category.clone(),
                portion: ing.portion,
                portion_unit: ing.portion_unit.clone(),
                portion_grams: *grams,
                confidence: ing.confidence.value(),
                nutrients: *nutrients,
                data_source: r.source,
                matched: r.matched.clone(),
                fdc_id: r.fdc_id,
            })
            .collect();

        let completed = CompletedAnalysis {
            session_id,
            user_id: request.user_id,
            analysis_status: status,
            raw_analysis,
            total: aggregation.total,
            confidence: analysis.confidence_overall.value(),
            main_dish: NewMainDish {
                name: analysis.main_dish.name.clone(),
                description: analysis.main_dish.description.clone(),
                portion_size: analysis.main_dish.portion,
                portion_unit: analysis.main_dish.portion_unit.clone(),
                nutrients_per_100g: dish_profile,
            },
            ingredients,
            meal_type: request.meal_type,
            meal_date: request
                .meal_date
                .unwrap_or_else(|| OffsetDateTime::now_utc().date()),
            notes: request.notes.clone(),
        };

        let committed = match self.store.commit_analysis(&completed).await {
            Ok(c) => c,
            Err(e) => return Err(self.persistence_failure(session_id, e).await),
        };

        info!(
            status = status.as_str(),
            confidence = completed.confidence,
            calories = completed.total.calories,
            dish = %committed.main_dish.name,
            dish_created = committed.dish_created,
            "analysis completed"
        );

        Ok(AnalysisOutcome {
            session_id,
            status,
            confidence: completed.confidence,
            image_quality: analysis.image_quality,
            main_dish: OutcomeDish {
                id: committed.main_dish.id,
                name: committed.main_dish.name,
                description: analysis.main_dish.description,
                confidence: analysis.main_dish.confidence.value(),
                portion: analysis.main_dish.portion,
                portion_unit: analysis.main_dish.portion_unit,
                nutrients_per_100g: dish_profile,
                reused: !committed.dish_created,
            },
            ingredients: committed
                .ingredients
                .into_iter()
                .map(|i| OutcomeIngredient {
                    id: i.id,
                    name: i.name,
                    category: i.category,
                    portion: i.portion,
                    portion_unit: i.portion_unit,
                    portion_grams: i.portion_grams,
                    confidence: i.confidence,
                    nutrients: i.nutrients,
                    data_source: i.data_source,
                })
                .collect(),
            total: completed.total,
            daily_total: committed.daily_total,
            warnings,
            notes: analysis.notes,
        })
    }

    /// Marks the session failed (best effort) and builds the caller's error.
    async fn fail(&self, session_id: Uuid, reason: String) -> AnalysisError {
        warn!(%session_id, %reason, "analysis failed");
        if let Err(e) = self.store.mark_failed(session_id, &reason).await {
            warn!(error = %e, "could not mark session failed");
        }
        AnalysisError::AnalysisFailure(reason)
    }

    /// Store errors also end the session in `failed`.
    async fn persistence_failure(&self, session_id: Uuid, error: StoreError) -> AnalysisError {
        warn!(%session_id, error = %error, "persisting analysis failed, write set rolled back");
        if let Err(mark) = self.store.mark_failed(session_id, &error.to_string()).await {
            warn!(error = %mark, "could not mark session failed");
        }
        AnalysisError::Persistence(error)
    }
}
