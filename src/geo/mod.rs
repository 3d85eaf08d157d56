//! Location lookup port.
//!
//! Turns a courier's coordinates into a short location code, the IATA code of
//! the nearest airport. Lookups are best-effort; callers fall back to the raw
//! coordinates on any error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::GeoPoint;

/// Search radius around the courier, in meters.
const SEARCH_RADIUS_M: u32 = 50_000;

/// Resolves coordinates to a location code.
#[async_trait]
pub trait LocationLookup: Send + Sync {
    async fn location_code(&self, point: GeoPoint) -> Result<String, AppError>;
}

/// Lookup used when no geocoder is configured. Always unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLookup;

#[async_trait]
impl LocationLookup for DisabledLookup {
    async fn location_code(&self, _point: GeoPoint) -> Result<String, AppError> {
        Err(AppError::ExternalService(
            "Location lookup is not configured".to_string(),
        ))
    }
}

/// Lookup that answers every query with the same code.
#[derive(Debug, Clone)]
pub struct StaticLookup {
    code: String,
}

impl StaticLookup {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[async_trait]
impl LocationLookup for StaticLookup {
    async fn location_code(&self, _point: GeoPoint) -> Result<String, AppError> {
        Ok(self.code.clone())
    }
}

/// Nearest-airport lookup against an Overpass API interpreter endpoint.
#[derive(Debug, Clone)]
pub struct OverpassLookup {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

impl OverpassLookup {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl LocationLookup for OverpassLookup {
    /// Nearest aerodrome with an IATA tag.
    async fn location_code(&self, point: GeoPoint) -> Result<String, AppError> {
        let query = overpass_query(point);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("data", query.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "Overpass returned HTTP {}",
                response.status()
            )));
        }

        let body: OverpassResponse = response.json().await?;
        body.elements
            .into_iter()
            .find_map(|element| element.tags.get("iata").cloned())
            .ok_or_else(|| {
                AppError::ExternalService(format!(
                    "No airport with an IATA code within {} km",
                    SEARCH_RADIUS_M / 1000
                ))
            })
    }
}

fn overpass_query(point: GeoPoint) -> String {
    format!(
        "[out:json];node(around:{},{},{})[aeroway=aerodrome][iata];out 1;",
        SEARCH_RADIUS_M, point.lat, point.lng
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overpass_query_shape() {
        let query = overpass_query(GeoPoint {
            lat: 25.79,
            lng: -80.29,
        });
        assert_eq!(
            query,
            "[out:json];node(around:50000,25.79,-80.29)[aeroway=aerodrome][iata];out 1;"
        );
    }

    #[test]
    fn test_overpass_response_parsing() {
        let body: OverpassResponse = serde_json::from_str(
            r#"{"version":0.6,"elements":[{"type":"node","id":1,"tags":{"aeroway":"aerodrome","iata":"MIA"}}]}"#,
        )
        .unwrap();
        let code = body
            .elements
            .into_iter()
            .find_map(|e| e.tags.get("iata").cloned());
        assert_eq!(code.as_deref(), Some("MIA"));
    }

    #[tokio::test]
    async fn test_lookups_work_behind_shared_trait_object() {
        let lookups: Vec<std::sync::Arc<dyn LocationLookup>> = vec![
            std::sync::Arc::new(StaticLookup::new("MIA")),
            std::sync::Arc::new(DisabledLookup),
        ];
        let point = GeoPoint {
            lat: 25.79,
            lng: -80.29,
        };

        assert_eq!(lookups[0].location_code(point).await.unwrap(), "MIA");
        assert!(lookups[1].location_code(point).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_lookup_is_unavailable() {
        let err = DisabledLookup
            .location_code(GeoPoint { lat: 0.0, lng: 0.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_external_error() {
        let lookup =
            OverpassLookup::new("http://127.0.0.1:9/interpreter", Duration::from_secs(2)).unwrap();
        let err = lookup
            .location_code(GeoPoint { lat: 1.0, lng: 2.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
    }
}
