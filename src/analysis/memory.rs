//! In-process [`AnalysisStore`] for tests.
//!
//! All state sits behind one async mutex held for the whole of each
//! operation. A commit is applied to a copy of the state and swapped in only
//! when every step succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::ledger;
use super::repo::AnalysisStore;
use super::repo_types::{
    AnalysisSession, CommittedAnalysis, CompletedAnalysis, DailyNutritionTotal, DishSource,
    Ingredient, MainDish, SessionDetails, SessionStatus, UserMeal,
};
use crate::error::StoreError;
use crate::nutrition::NutrientProfile;

/// Step of `commit_analysis` at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    MainDish,
    Ingredients,
    Meal,
    Ledger,
    Session,
}

#[derive(Debug, Clone, Default)]
struct State {
    sessions: HashMap<Uuid, AnalysisSession>,
    dishes: Vec<MainDish>,
    ingredients: Vec<Ingredient>,
    meals: Vec<UserMeal>,
    ledger: HashMap<(Uuid, Date), DailyNutritionTotal>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_at: StdMutex<Option<CommitStage>>,
    fail_processing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `commit_analysis` fail at `stage`.
    pub fn fail_next_commit_at(&self, stage: CommitStage) {
        if let Ok(mut slot) = self.fail_at.lock() {
            *slot = Some(stage);
        }
    }

    /// Makes the next `mark_processing` fail.
    pub fn fail_next_mark_processing(&self) {
        self.fail_processing.store(true, Ordering::SeqCst);
    }

    fn check(armed: Option<CommitStage>, stage: CommitStage) -> Result<(), StoreError> {
        if armed == Some(stage) {
            return Err(StoreError::Unavailable(format!("injected failure at {stage:?}")));
        }
        Ok(())
    }

    pub async fn session(&self, session_id: Uuid) -> Option<AnalysisSession> {
        self.state.lock().await.sessions.get(&session_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<AnalysisSession> {
        self.state.lock().await.sessions.values().cloned().collect()
    }

    pub async fn dish_count(&self) -> usize {
        self.state.lock().await.dishes.len()
    }

    pub async fn ingredient_count(&self) -> usize {
        self.state.lock().await.ingredients.len()
    }

    pub async fn meal_count(&self) -> usize {
        self.state.lock().await.meals.len()
    }
}

fn transition(
    session: &mut AnalysisSession,
    from: &[SessionStatus],
    to: SessionStatus,
) -> Result<(), StoreError> {
    if !from.contains(&session.status) {
        return Err(StoreError::InvalidTransition(session.id));
    }
    session.status = to;
    session.updated_at = OffsetDateTime::now_utc();
    Ok(())
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_session(&self, user_id: Uuid) -> Result<AnalysisSession, StoreError> {
        let now = OffsetDateTime::now_utc();
        let session = AnalysisSession {
            id: Uuid::new_v4(),
            user_id,
            status: SessionStatus::Pending,
            analysis_status: None,
            raw_analysis: None,
            total_calories: None,
            confidence: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn mark_processing(&self, session_id: Uuid) -> Result<(), StoreError> {
        if self.fail_processing.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure at mark_processing".into()));
        }
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::InvalidTransition(session_id))?;
        transition(session, &[SessionStatus::Pending], SessionStatus::Processing)
    }

    async fn mark_failed(&self, session_id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::InvalidTransition(session_id))?;
        transition(
            session,
            &[SessionStatus::Pending, SessionStatus::Processing],
            SessionStatus::Failed,
        )?;
        session.error = Some(reason.to_string());
        Ok(())
    }

    async fn commit_analysis(
        &self,
        analysis: &CompletedAnalysis,
    ) -> Result<CommittedAnalysis, StoreError> {
        let armed = self.fail_at.lock().ok().and_then(|mut slot| slot.take());
        let mut state = self.state.lock().await;
        let mut draft = state.clone();

        Self::check(armed, CommitStage::MainDish)?;
        let new = &analysis.main_dish;
        let (main_dish, dish_created) = match draft.dishes.iter_mut().find(|d| d.name == new.name) {
            Some(existing) => {
                existing.description = new.description.clone();
                existing.portion_size = new.portion_size;
                existing.portion_unit = new.portion_unit.clone();
                existing.nutrients_per_100g = new.nutrients_per_100g;
                (existing.clone(), false)
            }
            None => {
                let dish = MainDish {
                    id: Uuid::new_v4(),
                    name: new.name.clone(),
                    description: new.description.clone(),
                    portion_size: new.portion_size,
                    portion_unit: new.portion_unit.clone(),
                    nutrients_per_100g: new.nutrients_per_100g,
                    source: DishSource::Model,
                };
                draft.dishes.push(dish.clone());
                (dish, true)
            }
        };

        Self::check(armed, CommitStage::Ingredients)?;
        let ingredients: Vec<Ingredient> = analysis
            .ingredients
            .iter()
            .map(|i| Ingredient {
                id: Uuid::new_v4(),
                session_id: analysis.session_id,
                main_dish_id: main_dish.id,
                name: i.name.clone(),
                category: i.category.clone(),
                portion: i.portion,
                portion_unit: i.portion_unit.clone(),
                portion_grams: i.portion_grams,
                confidence: i.confidence,
                nutrients: i.nutrients,
                data_source: i.data_source,
                matched: i.matched.clone(),
                fdc_id: i.fdc_id.and_then(|id| i64::try_from(id).ok()),
            })
            .collect();
        draft.ingredients.extend(ingredients.iter().cloned());

        Self::check(armed, CommitStage::Meal)?;
        let meal = UserMeal {
            id: Uuid::new_v4(),
            user_id: analysis.user_id,
            session_id: analysis.session_id,
            main_dish_id: main_dish.id,
            meal_type: analysis.meal_type,
            meal_date: analysis.meal_date,
            notes: analysis.notes.clone(),
        };
        draft.meals.push(meal.clone());

        Self::check(armed, CommitStage::Ledger)?;
        let key = (analysis.user_id, analysis.meal_date);
        let daily_total = ledger::accumulate(
            draft.ledger.get(&key),
            analysis.user_id,
            analysis.meal_date,
            &analysis.total,
        );
        draft.ledger.insert(key, daily_total.clone());

        Self::check(armed, CommitStage::Session)?;
        let session = draft
            .sessions
            .get_mut(&analysis.session_id)
            .ok_or(StoreError::InvalidTransition(analysis.session_id))?;
        transition(session, &[SessionStatus::Processing], SessionStatus::Completed)?;
        session.analysis_status = Some(analysis.analysis_status);
        session.raw_analysis = Some(analysis.raw_analysis.clone());
        session.total_calories = Some(analysis.total.calories);
        session.confidence = Some(analysis.confidence);

        *state = draft;
        debug!(session_id = %analysis.session_id, "analysis committed in memory");

        Ok(CommittedAnalysis {
            main_dish,
            dish_created,
            ingredients,
            meal,
            daily_total,
        })
    }

    async fn upsert_daily_total(
        &self,
        user_id: Uuid,
        date: Date,
        delta: &NutrientProfile,
    ) -> Result<DailyNutritionTotal, StoreError> {
        let mut state = self.state.lock().await;
        let current = state.ledger.get(&(user_id, date)).cloned();
        // other tasks get scheduled here but cannot touch the ledger until
        // the guard is released
        tokio::task::yield_now().await;
        let next = ledger::accumulate(current.as_ref(), user_id, date, delta);
        state.ledger.insert((user_id, date), next.clone());
        Ok(next)
    }

    async fn daily_total(
        &self,
        user_id: Uuid,
        date: Date,
    ) -> Result<Option<DailyNutritionTotal>, StoreError> {
        Ok(self.state.lock().await.ledger.get(&(user_id, date)).cloned())
    }

    async fn load_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<SessionDetails>, StoreError> {
        let state = self.state.lock().await;
        let Some(session) = state
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id == user_id)
            .cloned()
        else {
            return Ok(None);
        };
        let meal = state.meals.iter().find(|m| m.session_id == session_id).cloned();
        let main_dish = meal
            .as_ref()
            .and_then(|m| state.dishes.iter().find(|d| d.id == m.main_dish_id))
            .cloned();
        let ingredients = state
            .ingredients
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect();
        Ok(Some(SessionDetails {
            session,
            main_dish,
            ingredients,
            meal,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::repo_types::{MealType, NewIngredient, NewMainDish};
    use crate::nutrition::DataSource;
    use crate::vision::AnalysisStatus;
    use std::sync::Arc;
    use time::macros::date;

    fn kcal(calories: f64) -> NutrientProfile {
        NutrientProfile {
            calories,
            ..NutrientProfile::ZERO
        }
    }

    fn completed(session_id: Uuid, user_id: Uuid, dish: &str, calories: f64) -> CompletedAnalysis {
        CompletedAnalysis {
            session_id,
            user_id,
            analysis_status: AnalysisStatus::Success,
            raw_analysis: serde_json::json!({}),
            total: kcal(calories),
            confidence: 0.9,
            main_dish: NewMainDish {
                name: dish.into(),
                description: String::new(),
                portion_size: 200.0,
                portion_unit: "grams".into(),
                nutrients_per_100g: kcal(calories / 2.0),
            },
            ingredients: vec![NewIngredient {
                name: "rice".into(),
                category: "Rice".into(),
                portion: 200.0,
                portion_unit: "grams".into(),
                portion_grams: 200.0,
                confidence: 0.9,
                nutrients: kcal(calories),
                data_source: DataSource::FallbackEstimate,
                matched: "Rice".into(),
                fdc_id: None,
            }],
            meal_type: MealType::Lunch,
            meal_date: date!(2024 - 06 - 01),
            notes: None,
        }
    }

    async fn processing_session(store: &MemoryStore, user: Uuid) -> Uuid {
        let s = store.create_session(user).await.unwrap();
        store.mark_processing(s.id).await.unwrap();
        s.id
    }

    #[tokio::test]
    async fn concurrent_upserts_lose_no_updates() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let day = date!(2024 - 06 - 01);

        let handles: Vec<_> = (1..=20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .upsert_daily_total(user, day, &kcal(i as f64))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let total = store.daily_total(user, day).await.unwrap().unwrap();
        assert_eq!(total.meal_count, 20);
        assert_eq!(total.totals.calories, (1..=20).sum::<i32>() as f64);
    }

    #[tokio::test]
    async fn two_concurrent_commits_sum_to_500() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let a = processing_session(&store, user).await;
        let b = processing_session(&store, user).await;

        let (s1, s2) = (store.clone(), store.clone());
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { s1.commit_analysis(&completed(a, user, "Soup", 300.0)).await }),
            tokio::spawn(async move { s2.commit_analysis(&completed(b, user, "Salad", 200.0)).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let total = store
            .daily_total(user, date!(2024 - 06 - 01))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total.totals.calories, 500.0);
        assert_eq!(total.meal_count, 2);
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let session = processing_session(&store, user).await;

        store.fail_next_commit_at(CommitStage::Ledger);
        let err = store
            .commit_analysis(&completed(session, user, "Curry", 300.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        assert_eq!(store.dish_count().await, 0);
        assert_eq!(store.ingredient_count().await, 0);
        assert_eq!(store.meal_count().await, 0);
        assert!(store
            .daily_total(user, date!(2024 - 06 - 01))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.session(session).await.unwrap().status,
            SessionStatus::Processing
        );

        // the injected failure is one-shot
        store
            .commit_analysis(&completed(session, user, "Curry", 300.0))
            .await
            .unwrap();
        assert_eq!(
            store.session(session).await.unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn main_dish_is_reused_by_name() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let a = processing_session(&store, user).await;
        let b = processing_session(&store, user).await;

        let first = store
            .commit_analysis(&completed(a, user, "Nasi Goreng", 400.0))
            .await
            .unwrap();
        let second = store
            .commit_analysis(&completed(b, user, "Nasi Goreng", 600.0))
            .await
            .unwrap();

        assert!(first.dish_created);
        assert!(!second.dish_created);
        assert_eq!(first.main_dish.id, second.main_dish.id);
        assert_eq!(second.main_dish.nutrients_per_100g.calories, 300.0);
        assert_eq!(store.dish_count().await, 1);

        // the stored dish follows the latest session, the first keeps its own total
        let details = store.load_session(user, b).await.unwrap().unwrap();
        assert_eq!(details.main_dish.unwrap().nutrients_per_100g.calories, 300.0);
        assert_eq!(store.session(a).await.unwrap().total_calories, Some(400.0));
    }

    #[tokio::test]
    async fn sessions_leave_processing_only_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let session = processing_session(&store, user).await;

        store
            .commit_analysis(&completed(session, user, "Toast", 100.0))
            .await
            .unwrap();
        let again = store
            .commit_analysis(&completed(session, user, "Toast", 100.0))
            .await;
        assert!(matches!(again, Err(StoreError::InvalidTransition(_))));
        assert!(matches!(
            store.mark_failed(session, "late").await,
            Err(StoreError::InvalidTransition(_))
        ));

        let total = store
            .daily_total(user, date!(2024 - 06 - 01))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total.meal_count, 1);
    }

    #[tokio::test]
    async fn sessions_are_scoped_to_their_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let session = processing_session(&store, owner).await;
        store
            .commit_analysis(&completed(session, owner, "Pho", 350.0))
            .await
            .unwrap();

        let details = store.load_session(owner, session).await.unwrap().unwrap();
        assert_eq!(details.ingredients.len(), 1);
        assert_eq!(details.main_dish.unwrap().name, "Pho");
        assert!(store
            .load_session(Uuid::new_v4(), session)
            .await
            .unwrap()
            .is_none());
    }
}
