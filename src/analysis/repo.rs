use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::Date;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::ledger;
use super::repo_types::{
    AnalysisSession, CommittedAnalysis, CompletedAnalysis, DailyNutritionTotal, Ingredient,
    IngredientRow, MainDish, MainDishRow, NewIngredient, NewMainDish, SessionDetails, SessionRow,
    UpsertedDishRow, UserMeal, UserMealRow,
};
use crate::error::StoreError;
use crate::nutrition::NutrientProfile;

/// Persistence seam of the analysis pipeline.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Creates a `pending` session.
    async fn create_session(&self, user_id: Uuid) -> Result<AnalysisSession, StoreError>;

    /// `pending` → `processing`.
    async fn mark_processing(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Moves a non-terminal session to `failed`.
    async fn mark_failed(&self, session_id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Writes the dish, ingredients, meal record, ledger contribution and the
    /// `processing` → `completed` transition as one unit. On error nothing
    /// of the write set remains.
    async fn commit_analysis(
        &self,
        analysis: &CompletedAnalysis,
    ) -> Result<CommittedAnalysis, StoreError>;

    async fn upsert_daily_total(
        &self,
        user_id: Uuid,
        date: Date,
        delta: &NutrientProfile,
    ) -> Result<DailyNutritionTotal, StoreError>;

    async fn daily_total(
        &self,
        user_id: Uuid,
        date: Date,
    ) -> Result<Option<DailyNutritionTotal>, StoreError>;

    async fn load_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<SessionDetails>, StoreError>;
}

const SESSION_COLUMNS: &str = "id, user_id, status, analysis_status, raw_analysis, total_calories, \
                               confidence, error, created_at, updated_at";
const DISH_COLUMNS: &str = "id, name, description, portion_size, portion_unit, calories, protein, \
                            carbohydrates, fat, fiber, sugar, sodium, calcium, iron, source";
const INGREDIENT_COLUMNS: &str = "id, session_id, main_dish_id, name, category, portion, portion_unit, \
                                  portion_grams, confidence, calories, protein, carbohydrates, fat, \
                                  fiber, sugar, sodium, calcium, iron, data_source, matched, fdc_id";
const MEAL_COLUMNS: &str = "id, user_id, session_id, main_dish_id, meal_type, meal_date, notes";

#[derive(Clone)]
pub struct PgAnalysisStore {
    db: PgPool,
}

impl PgAnalysisStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Get-or-create by unique name. Concurrent creators converge on one row; a
/// reused dish takes this analysis' description, portion and per-100g profile.
async fn upsert_main_dish(
    conn: &mut PgConnection,
    dish: &NewMainDish,
) -> Result<(MainDish, bool), StoreError> {
    let sql = format!(
        r#"
        INSERT INTO main_dishes
            (id, name, description, portion_size, portion_unit,
             calories, protein, carbohydrates, fat, fiber, sugar, sodium, calcium, iron, source)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'model')
        ON CONFLICT (name) DO UPDATE SET
            description = EXCLUDED.description,
            portion_size = EXCLUDED.portion_size,
            portion_unit = EXCLUDED.portion_unit,
            calories = EXCLUDED.calories,
            protein = EXCLUDED.protein,
            carbohydrates = EXCLUDED.carbohydrates,
            fat = EXCLUDED.fat,
            fiber = EXCLUDED.fiber,
            sugar = EXCLUDED.sugar,
            sodium = EXCLUDED.sodium,
            calcium = EXCLUDED.calcium,
            iron = EXCLUDED.iron
        RETURNING {DISH_COLUMNS}, (xmax = 0) AS inserted
        "#
    );
    let p = &dish.nutrients_per_100g;
    let row = sqlx::query_as::<_, UpsertedDishRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&dish.name)
        .bind(&dish.description)
        .bind(dish.portion_size)
        .bind(&dish.portion_unit)
        .bind(p.calories)
        .bind(p.protein)
        .bind(p.carbohydrates)
        .bind(p.fat)
        .bind(p.fiber)
        .bind(p.sugar)
        .bind(p.sodium)
        .bind(p.calcium)
        .bind(p.iron)
        .fetch_one(conn)
        .await?;
    Ok((row.dish.try_into()?, row.inserted))
}

async fn insert_ingredient(
    conn: &mut PgConnection,
    session_id: Uuid,
    main_dish_id: Uuid,
    position: i32,
    ing: &NewIngredient,
) -> Result<Ingredient, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO ingredients
            (id, session_id, main_dish_id, position, name, category, portion, portion_unit,
             portion_grams, confidence, calories, protein, carbohydrates, fat, fiber, sugar,
             sodium, calcium, iron, data_source, matched, fdc_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22)
        RETURNING {INGREDIENT_COLUMNS}
        "#
    );
    let n = &ing.nutrients;
    let row = sqlx::query_as::<_, IngredientRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(main_dish_id)
        .bind(position)
        .bind(&ing.name)
        .bind(&ing.category)
        .bind(ing.portion)
        .bind(&ing.portion_unit)
        .bind(ing.portion_grams)
        .bind(ing.confidence)
        .bind(n.calories)
        .bind(n.protein)
        .bind(n.carbohydrates)
        .bind(n.fat)
        .bind(n.fiber)
        .bind(n.sugar)
        .bind(n.sodium)
        .bind(n.calcium)
        .bind(n.iron)
        .bind(ing.data_source.as_str())
        .bind(&ing.matched)
        .bind(ing.fdc_id.and_then(|id| i64::try_from(id).ok()))
        .fetch_one(conn)
        .await?;
    row.try_into()
}

async fn insert_meal(
    conn: &mut PgConnection,
    analysis: &CompletedAnalysis,
    main_dish_id: Uuid,
) -> Result<UserMeal, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO user_meals (id, user_id, session_id, main_dish_id, meal_type, meal_date, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {MEAL_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, UserMealRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(analysis.user_id)
        .bind(analysis.session_id)
        .bind(main_dish_id)
        .bind(analysis.meal_type.as_str())
        .bind(analysis.meal_date)
        .bind(&analysis.notes)
        .fetch_one(conn)
        .await?;
    Ok(row.into())
}

async fn complete_session(
    conn: &mut PgConnection,
    analysis: &CompletedAnalysis,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_sessions
           SET status = 'completed',
               analysis_status = $2,
               raw_analysis = $3,
               total_calories = $4,
               confidence = $5,
               updated_at = now()
         WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(analysis.session_id)
    .bind(analysis.analysis_status.as_str())
    .bind(&analysis.raw_analysis)
    .bind(analysis.total.calories)
    .bind(analysis.confidence)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::InvalidTransition(analysis.session_id));
    }
    Ok(())
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    #[instrument(skip(self))]
    async fn create_session(&self, user_id: Uuid) -> Result<AnalysisSession, StoreError> {
        // token subjects may not have a local row yet
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        let sql = format!(
            "INSERT INTO analysis_sessions (id, user_id, status) VALUES ($1, $2, 'pending') \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        row.try_into()
    }

    #[instrument(skip(self))]
    async fn mark_processing(&self, session_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE analysis_sessions SET status = 'processing', updated_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(session_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(session_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, session_id: Uuid, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE analysis_sessions SET status = 'failed', error = $2, updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(session_id)
        .bind(reason)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(session_id));
        }
        Ok(())
    }

    #[instrument(skip(self, analysis), fields(session_id = %analysis.session_id, user_id = %analysis.user_id))]
    async fn commit_analysis(
        &self,
        analysis: &CompletedAnalysis,
    ) -> Result<CommittedAnalysis, StoreError> {
        let mut tx = self.db.begin().await?;

        let (main_dish, dish_created) = upsert_main_dish(&mut tx, &analysis.main_dish).await?;
        debug!(dish_id = %main_dish.id, dish_created, "main dish resolved");

        let mut ingredients = Vec::with_capacity(analysis.ingredients.len());
        for (position, ing) in analysis.ingredients.iter().enumerate() {
            let position = i32::try_from(position).unwrap_or(i32::MAX);
            ingredients
                .push(insert_ingredient(&mut tx, analysis.session_id, main_dish.id, position, ing).await?);
        }

        let meal = insert_meal(&mut tx, analysis, main_dish.id).await?;
        let daily_total =
            ledger::upsert_daily_total(&mut tx, analysis.user_id, analysis.meal_date, &analysis.total)
                .await?;
        complete_session(&mut tx, analysis).await?;

        tx.commit().await?;
        debug!(
            meal_count = daily_total.meal_count,
            daily_calories = daily_total.totals.calories,
            "analysis committed"
        );

        Ok(CommittedAnalysis {
            main_dish,
            dish_created,
            ingredients,
            meal,
            daily_total,
        })
    }

    #[instrument(skip(self, delta))]
    async fn upsert_daily_total(
        &self,
        user_id: Uuid,
        date: Date,
        delta: &NutrientProfile,
    ) -> Result<DailyNutritionTotal, StoreError> {
        let mut conn = self.db.acquire().await?;
        Ok(ledger::upsert_daily_total(&mut conn, user_id, date, delta).await?)
    }

    async fn daily_total(
        &self,
        user_id: Uuid,
        date: Date,
    ) -> Result<Option<DailyNutritionTotal>, StoreError> {
        let mut conn = self.db.acquire().await?;
        Ok(ledger::fetch_daily_total(&mut conn, user_id, date).await?)
    }

    #[instrument(skip(self))]
    async fn load_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<SessionDetails>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM analysis_sessions WHERE id = $1 AND user_id = $2");
        let Some(row) = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let session: AnalysisSession = row.try_into()?;

        let sql = format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE session_id = $1 ORDER BY position"
        );
        let ingredients = sqlx::query_as::<_, IngredientRow>(&sql)
            .bind(session_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(Ingredient::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let sql = format!("SELECT {MEAL_COLUMNS} FROM user_meals WHERE session_id = $1");
        let meal: Option<UserMeal> = sqlx::query_as::<_, UserMealRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?
            .map(Into::into);

        let main_dish = match meal.as_ref().map(|m| m.main_dish_id) {
            Some(dish_id) => {
                let sql = format!("SELECT {DISH_COLUMNS} FROM main_dishes WHERE id = $1");
                sqlx::query_as::<_, MainDishRow>(&sql)
                    .bind(dish_id)
                    .fetch_optional(&self.db)
                    .await?
                    .map(MainDish::try_from)
                    .transpose()?
            }
            None => None,
        };

        Ok(Some(SessionDetails {
            session,
            main_dish,
            ingredients,
            meal,
        }))
    }
}
