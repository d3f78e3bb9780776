//! FoodData Central search client.
//!
//! Only the search endpoint is used: the first food in a search response
//! already carries its nutrient list per 100 g.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::profile::NutrientProfile;
use crate::config::NutrientDbConfig;

const DATA_TYPES: &[&str] = &["Foundation", "SR Legacy", "Survey (FNDDS)"];
const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("nutrient database rejected the API key (HTTP {0})")]
    Unauthorized(u16),
    #[error("nutrient database rejected the query: {0}")]
    BadRequest(String),
    #[error("nutrient database request timed out")]
    Timeout,
    #[error("nutrient database returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("nutrient database unreachable: {0}")]
    Transport(String),
    #[error("nutrient database response could not be decoded: {0}")]
    Decode(String),
}

impl LookupError {
    /// Whether another query variant may still succeed after this error.
    pub fn try_next_variant(&self) -> bool {
        matches!(
            self,
            LookupError::BadRequest(_) | LookupError::Timeout | LookupError::Decode(_)
        )
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LookupError::Timeout
        } else if e.is_decode() {
            LookupError::Decode(e.to_string())
        } else {
            LookupError::Transport(e.to_string())
        }
    }
}

/// One candidate food returned by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodMatch {
    pub fdc_id: Option<u64>,
    pub description: String,
    pub data_type: Option<String>,
    pub nutrients: NutrientProfile,
}

#[async_trait]
pub trait NutrientDatabase: Send + Sync {
    /// Searches foods by free-text query. An empty vector means no match.
    async fn search(&self, query: &str) -> Result<Vec<FoodMatch>, LookupError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NutrientField {
    Calories,
    Protein,
    Fat,
    Carbohydrates,
    Sugar,
    Fiber,
    Sodium,
    Calcium,
    Iron,
}

impl NutrientField {
    fn slot(self, p: &mut NutrientProfile) -> &mut f64 {
        match self {
            NutrientField::Calories => &mut p.calories,
            NutrientField::Protein => &mut p.protein,
            NutrientField::Fat => &mut p.fat,
            NutrientField::Carbohydrates => &mut p.carbohydrates,
            NutrientField::Sugar => &mut p.sugar,
            NutrientField::Fiber => &mut p.fiber,
            NutrientField::Sodium => &mut p.sodium,
            NutrientField::Calcium => &mut p.calcium,
            NutrientField::Iron => &mut p.iron,
        }
    }
}

/// (legacy nutrient number, FDC nutrient id, field)
const NUTRIENT_IDS: &[(u32, u32, NutrientField)] = &[
    (208, 1008, NutrientField::Calories),
    (203, 1003, NutrientField::Protein),
    (204, 1004, NutrientField::Fat),
    (205, 1005, NutrientField::Carbohydrates),
    (269, 2000, NutrientField::Sugar),
    (291, 1079, NutrientField::Fiber),
    (307, 1093, NutrientField::Sodium),
    (301, 1087, NutrientField::Calcium),
    (303, 1089, NutrientField::Iron),
];

fn field_for(id: Option<u32>, number: Option<&str>) -> Option<NutrientField> {
    let number = number.and_then(|n| n.trim().parse::<u32>().ok());
    NUTRIENT_IDS
        .iter()
        .find(|(legacy, modern, _)| {
            id.is_some_and(|id| id == *legacy || id == *modern) || number == Some(*legacy)
        })
        .map(|(_, _, field)| *field)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "totalHits")]
    total_hits: Option<u64>,
    #[serde(default)]
    foods: Vec<SearchFood>,
}

#[derive(Debug, Deserialize)]
struct SearchFood {
    #[serde(rename = "fdcId")]
    fdc_id: Option<u64>,
    #[serde(default)]
    description: String,
    #[serde(rename = "dataType")]
    data_type: Option<String>,
    #[serde(rename = "foodNutrients", default)]
    food_nutrients: Vec<SearchNutrient>,
}

#[derive(Debug, Deserialize)]
struct SearchNutrient {
    #[serde(rename = "nutrientId")]
    nutrient_id: Option<u32>,
    #[serde(rename = "nutrientNumber")]
    nutrient_number: Option<String>,
    value: Option<f64>,
}

fn extract_nutrients(nutrients: &[SearchNutrient]) -> NutrientProfile {
    let mut profile = NutrientProfile::ZERO;
    for n in nutrients {
        if let Some(field) = field_for(n.nutrient_id, n.nutrient_number.as_deref()) {
            *field.slot(&mut profile) = n.value.unwrap_or(0.0);
        }
    }
    profile
}

impl From<SearchFood> for FoodMatch {
    fn from(f: SearchFood) -> Self {
        Self {
            nutrients: extract_nutrients(&f.food_nutrients),
            fdc_id: f.fdc_id,
            description: f.description,
            data_type: f.data_type,
        }
    }
}

pub struct UsdaClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    page_size: u32,
}

impl UsdaClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn from_config(cfg: &NutrientDbConfig) -> Result<Self, LookupError> {
        Self::new(
            cfg.api_key.clone(),
            cfg.base_url.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.page_size,
        )
    }
}

#[async_trait]
impl NutrientDatabase for UsdaClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn search(&self, query: &str) -> Result<Vec<FoodMatch>, LookupError> {
        let url = format!("{}/foods/search", self.base_url);
        let page_size = self.page_size.to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("api_key", self.api_key.as_str()),
            ("query", query),
            ("pageSize", page_size.as_str()),
            ("pageNumber", "1"),
        ];
        params.extend(DATA_TYPES.iter().map(|t| ("dataType", *t)));

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(LookupError::from_reqwest)?;

        let status = response.status();
        debug!(%status, "nutrient search response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(%status, "nutrient database rejected API key");
            return Err(LookupError::Unauthorized(status.as_u16()));
        }
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::BadRequest(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let data: SearchResponse = response.json().await.map_err(LookupError::from_reqwest)?;
        debug!(
            total_hits = data.total_hits.unwrap_or(0),
            returned = data.foods.len(),
            "nutrient search decoded"
        );

        Ok(data.foods.into_iter().map(FoodMatch::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str, timeout: Duration) -> UsdaClient {
        UsdaClient::new("test-key", uri, timeout, 25).unwrap()
    }

    fn chicken_body() -> serde_json::Value {
        json!({
            "totalHits": 1,
            "foods": [{
                "fdcId": 171477,
                "description": "Chicken, breast, meat only, cooked, roasted",
                "dataType": "SR Legacy",
                "foodNutrients": [
                    { "nutrientId": 1008, "nutrientNumber": "208", "value": 165.0 },
                    { "nutrientId": 1003, "nutrientNumber": "203", "value": 31.02 },
                    { "nutrientId": 1004, "nutrientNumber": "204", "value": 3.57 },
                    { "nutrientId": 1093, "nutrientNumber": "307", "value": 74.0 },
                    { "nutrientId": 9999, "nutrientNumber": "999", "value": 42.0 }
                ]
            }]
        })
    }

    #[test]
    fn nutrients_match_by_legacy_number_or_modern_id() {
        let nutrients = vec![
            SearchNutrient {
                nutrient_id: Some(208),
                nutrient_number: None,
                value: Some(52.0),
            },
            SearchNutrient {
                nutrient_id: None,
                nutrient_number: Some("291".into()),
                value: Some(2.4),
            },
            SearchNutrient {
                nutrient_id: Some(1089),
                nutrient_number: None,
                value: Some(0.12),
            },
            SearchNutrient {
                nutrient_id: Some(1087),
                nutrient_number: None,
                value: None,
            },
        ];
        let p = extract_nutrients(&nutrients);
        assert_eq!(p.calories, 52.0);
        assert_eq!(p.fiber, 2.4);
        assert_eq!(p.iron, 0.12);
        assert_eq!(p.calcium, 0.0);
    }

    #[tokio::test]
    async fn search_decodes_first_food_nutrients() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .and(query_param("query", "chicken breast"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chicken_body()))
            .expect(1)
            .mount(&server)
            .await;

        let foods = client(&server.uri(), Duration::from_secs(5))
            .search("chicken breast")
            .await
            .unwrap();

        assert_eq!(foods.len(), 1);
        let food = &foods[0];
        assert_eq!(food.fdc_id, Some(171477));
        assert_eq!(food.nutrients.calories, 165.0);
        assert_eq!(food.nutrients.protein, 31.02);
        assert_eq!(food.nutrients.sodium, 74.0);
        assert_eq!(food.nutrients.carbohydrates, 0.0);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "totalHits": 0, "foods": [] })),
            )
            .mount(&server)
            .await;

        let foods = client(&server.uri(), Duration::from_secs(5))
            .search("zzz")
            .await
            .unwrap();
        assert!(foods.is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_lookup_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("query", "forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("query", "bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid query"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("query", "boom"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = client(&server.uri(), Duration::from_secs(5));

        let err = c.search("forbidden").await.unwrap_err();
        assert!(matches!(err, LookupError::Unauthorized(403)));
        assert!(!err.try_next_variant());

        let err = c.search("bad").await.unwrap_err();
        assert!(matches!(err, LookupError::BadRequest(ref body) if body == "invalid query"));
        assert!(err.try_next_variant());

        let err = c.search("boom").await.unwrap_err();
        assert!(matches!(err, LookupError::Http { status: 503, .. }));
        assert!(!err.try_next_variant());
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chicken_body())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri(), Duration::from_millis(100))
            .search("chicken")
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Timeout));
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server.uri(), Duration::from_secs(5))
            .search("chicken")
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Decode(_)));
    }
}
