//! Per-user, per-date running nutrient totals.
//!
//! The upsert is a single `INSERT ... ON CONFLICT DO UPDATE` whose update
//! clause adds to the stored columns, so concurrent contributions for the
//! same (user, date) serialize on the row lock and none is lost.

use sqlx::PgConnection;
use time::Date;
use uuid::Uuid;

use super::repo_types::{DailyNutritionTotal, DailyTotalRow};
use crate::nutrition::NutrientProfile;

const UPSERT_DAILY_TOTAL: &str = r#"
    INSERT INTO daily_nutrition_totals
        (user_id, date, calories, protein, carbohydrates, fat, fiber, sugar, sodium, calcium, iron, meal_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
    ON CONFLICT (user_id, date) DO UPDATE SET
        calories      = daily_nutrition_totals.calories      + EXCLUDED.calories,
        protein       = daily_nutrition_totals.protein       + EXCLUDED.protein,
        carbohydrates = daily_nutrition_totals.carbohydrates + EXCLUDED.carbohydrates,
        fat           = daily_nutrition_totals.fat           + EXCLUDED.fat,
        fiber         = daily_nutrition_totals.fiber         + EXCLUDED.fiber,
        sugar         = daily_nutrition_totals.sugar         + EXCLUDED.sugar,
        sodium        = daily_nutrition_totals.sodium        + EXCLUDED.sodium,
        calcium       = daily_nutrition_totals.calcium       + EXCLUDED.calcium,
        iron          = daily_nutrition_totals.iron          + EXCLUDED.iron,
        meal_count    = daily_nutrition_totals.meal_count    + 1,
        updated_at    = now()
    RETURNING user_id, date, calories, protein, carbohydrates, fat, fiber, sugar, sodium, calcium, iron, meal_count
"#;

/// Adds `delta` to the (user, date) ledger row, creating it on first use.
pub async fn upsert_daily_total(
    conn: &mut PgConnection,
    user_id: Uuid,
    date: Date,
    delta: &NutrientProfile,
) -> Result<DailyNutritionTotal, sqlx::Error> {
    let row = sqlx::query_as::<_, DailyTotalRow>(UPSERT_DAILY_TOTAL)
        .bind(user_id)
        .bind(date)
        .bind(delta.calories)
        .bind(delta.protein)
        .bind(delta.carbohydrates)
        .bind(delta.fat)
        .bind(delta.fiber)
        .bind(delta.sugar)
        .bind(delta.sodium)
        .bind(delta.calcium)
        .bind(delta.iron)
        .fetch_one(conn)
        .await?;
    Ok(row.into())
}

pub async fn fetch_daily_total(
    conn: &mut PgConnection,
    user_id: Uuid,
    date: Date,
) -> Result<Option<DailyNutritionTotal>, sqlx::Error> {
    let row = sqlx::query_as::<_, DailyTotalRow>(
        r#"
        SELECT user_id, date, calories, protein, carbohydrates, fat, fiber, sugar, sodium, calcium, iron, meal_count
          FROM daily_nutrition_totals
         WHERE user_id = $1 AND date = $2
        "#,
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Into::into))
}

/// The in-process counterpart of the SQL upsert: seed with `delta` and a
/// count of one, or add `delta` and bump the count.
pub fn accumulate(
    existing: Option<&DailyNutritionTotal>,
    user_id: Uuid,
    date: Date,
    delta: &NutrientProfile,
) -> DailyNutritionTotal {
    match existing {
        Some(current) => DailyNutritionTotal {
            user_id,
            date,
            totals: current.totals + *delta,
            meal_count: current.meal_count + 1,
        },
        None => DailyNutritionTotal {
            user_id,
            date,
            totals: *delta,
            meal_count: 1,
        },
    }
}
