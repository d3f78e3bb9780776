use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::analysis::{AnalysisPipeline, AnalysisStore, PgAnalysisStore};
use crate::config::AppConfig;
use crate::nutrition::fallback::FallbackTable;
use crate::nutrition::throttle::Throttle;
use crate::nutrition::usda::UsdaClient;
use crate::nutrition::NutrientResolver;
use crate::vision::gemini::model_from_config;
use crate::vision::VisionAnalyzer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<AnalysisPipeline>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connecting to postgres")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("running migrations")?;

        let store = Arc::new(PgAnalysisStore::new(db)) as Arc<dyn AnalysisStore>;

        let usda = UsdaClient::from_config(&config.nutrients).context("building USDA client")?;
        let resolver = NutrientResolver::new(
            Arc::new(usda),
            Arc::new(Throttle::new(Duration::from_millis(
                config.nutrients.min_interval_ms,
            ))),
            FallbackTable::standard(),
        );

        let model = model_from_config(&config.vision).context("building vision client")?;
        info!(model = model.name(), "vision model ready");
        let analyzer = VisionAnalyzer::new(Arc::from(model), config.analysis.confidence_threshold);

        Ok(Self::from_parts(
            config,
            AnalysisPipeline::new(analyzer, resolver, store),
        ))
    }

    pub fn from_parts(config: AppConfig, pipeline: AnalysisPipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }

    /// In-memory store, demo vision model and a nutrient database with no matches.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::analysis::memory::MemoryStore;
        use crate::config::{AnalysisConfig, JwtConfig, NutrientDbConfig, VisionConfig};
        use crate::nutrition::usda::{FoodMatch, LookupError, NutrientDatabase};
        use crate::vision::gemini::DemoVisionModel;
        use async_trait::async_trait;

        struct EmptyDatabase;

        #[async_trait]
        impl NutrientDatabase for EmptyDatabase {
            async fn search(&self, _query: &str) -> Result<Vec<FoodMatch>, LookupError> {
                Ok(vec![])
            }
        }

        let config = AppConfig {
            database_url: "fake".into(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
            },
            vision: VisionConfig {
                api_key: None,
                model: "demo".into(),
                base_url: "fake".into(),
                timeout_secs: 1,
            },
            nutrients: NutrientDbConfig {
                api_key: "fake".into(),
                base_url: "fake".into(),
                timeout_secs: 1,
                min_interval_ms: 1,
                page_size: 5,
            },
            analysis: AnalysisConfig::default(),
        };

        let pipeline = AnalysisPipeline::new(
            VisionAnalyzer::new(
                Arc::new(DemoVisionModel),
                config.analysis.confidence_threshold,
            ),
            NutrientResolver::new(
                Arc::new(EmptyDatabase),
                Arc::new(Throttle::new(Duration::from_millis(1))),
                FallbackTable::standard(),
            ),
            Arc::new(MemoryStore::new()),
        );
        Self::from_parts(config, pipeline)
    }
}
