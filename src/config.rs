use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// `None` wires the demo model.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NutrientDbConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub vision: VisionConfig,
    pub nutrients: NutrientDbConfig,
    pub analysis: AnalysisConfig,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Seconds for an outbound call timeout, never below one.
fn timeout_secs(key: &str, default: u64) -> u64 {
    parsed_or(key, default).max(1)
}

impl VisionConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: var_or("GEMINI_MODEL", "gemini-1.5-flash"),
            base_url: var_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            timeout_secs: timeout_secs("VISION_TIMEOUT_SECS", 30),
        }
    }
}

impl NutrientDbConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: var_or("USDA_API_KEY", "DEMO_KEY"),
            base_url: var_or("USDA_BASE_URL", "https://api.nal.usda.gov/fdc/v1"),
            timeout_secs: timeout_secs("USDA_TIMEOUT_SECS", 10),
            min_interval_ms: parsed_or("USDA_MIN_INTERVAL_MS", 100),
            page_size: parsed_or("USDA_PAGE_SIZE", 25u32).min(50),
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        Self {
            confidence_threshold: parsed_or("CONFIDENCE_THRESHOLD", 0.7f64).clamp(0.0, 1.0),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: var_or("JWT_ISSUER", "foodvision"),
            audience: var_or("JWT_AUDIENCE", "foodvision-users"),
        };
        Ok(Self {
            database_url,
            jwt,
            vision: VisionConfig::from_env(),
            nutrients: NutrientDbConfig::from_env(),
            analysis: AnalysisConfig::from_env(),
        })
    }
}
