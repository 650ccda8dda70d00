//! Geolocation backend: place resolution and nearby-employer lookup.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use careercoach_core::config::GeoConfig;
use careercoach_core::domain::payload::{Coordinates, NearbyEmployer, ResolvedPlace};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const NEARBY_LIMIT: usize = 10;

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn resolve(&self, place: &str) -> Result<Option<ResolvedPlace>>;

    /// Employers within `radius_m` of `center`, nearest first.
    async fn nearby(&self, center: &Coordinates, radius_m: u32) -> Result<Vec<NearbyEmployer>>;
}

/// Great-circle distance in metres.
pub fn haversine_m(from: &Coordinates, to: &Coordinates) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_phi = (to.lat - from.lat).to_radians();
    let d_lambda = (to.lon - from.lon).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// OpenStreetMap-backed locator (Nominatim search plus Overpass `around:`).
pub struct OsmGeoLocator {
    client: Client,
    nominatim_url: String,
    overpass_url: String,
}

impl OsmGeoLocator {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build geolocation http client")?;
        Ok(Self {
            client,
            nominatim_url: config.nominatim_url.trim_end_matches('/').to_string(),
            overpass_url: config.overpass_url.clone(),
        })
    }

    fn overpass_query(center: &Coordinates, radius_m: u32) -> String {
        let around = format!("around:{radius_m},{},{}", center.lat, center.lon);
        format!(
            "[out:json][timeout:10];(\
             node[\"office\"~\"company|it|coworking\"]({around});\
             node[\"amenity\"=\"coworking_space\"]({around});\
             way[\"office\"~\"company|it|coworking\"]({around});\
             );out center {NEARBY_LIMIT};"
        )
    }
}

#[async_trait]
impl GeoLocator for OsmGeoLocator {
    async fn resolve(&self, place: &str) -> Result<Option<ResolvedPlace>> {
        let url = format!("{}/search", self.nominatim_url);
        tracing::debug!(event_name = "geo.resolve", place, url = %url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", place), ("format", "json"), ("limit", "1"), ("addressdetails", "1")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("nominatim returned HTTP {status}");
        }
        let body: Value = response.json().await.context("nominatim body was not json")?;
        Ok(parse_nominatim(&body))
    }

    async fn nearby(&self, center: &Coordinates, radius_m: u32) -> Result<Vec<NearbyEmployer>> {
        let query = Self::overpass_query(center, radius_m);
        tracing::debug!(event_name = "geo.nearby", radius_m, url = %self.overpass_url);

        let response =
            self.client.post(&self.overpass_url).form(&[("data", query.as_str())]).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("overpass returned HTTP {status}");
        }
        let body: Value = response.json().await.context("overpass body was not json")?;
        Ok(parse_overpass(&body, center))
    }
}

fn parse_nominatim(body: &Value) -> Option<ResolvedPlace> {
    let first = body.as_array()?.first()?;
    let lat = coordinate(first.get("lat")?)?;
    let lon = coordinate(first.get("lon")?)?;
    Some(ResolvedPlace {
        display_name: first.get("display_name").and_then(Value::as_str).unwrap_or_default().to_string(),
        coordinates: Coordinates { lat, lon },
        country: first
            .pointer("/address/country")
            .and_then(Value::as_str)
            .filter(|country| !country.is_empty())
            .map(str::to_string),
    })
}

fn parse_overpass(body: &Value, center: &Coordinates) -> Vec<NearbyEmployer> {
    let Some(elements) = body.get("elements").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut employers: Vec<NearbyEmployer> = elements
        .iter()
        .filter_map(|element| {
            let tags = element.get("tags");
            let tag = |key: &str| tags.and_then(|tags| tags.get(key)).and_then(Value::as_str);

            let lat = element
                .get("lat")
                .or_else(|| element.pointer("/center/lat"))
                .and_then(coordinate)?;
            let lon = element
                .get("lon")
                .or_else(|| element.pointer("/center/lon"))
                .and_then(coordinate)?;
            let coordinates = Coordinates { lat, lon };

            Some(NearbyEmployer {
                name: tag("name").or_else(|| tag("operator")).unwrap_or("Unknown Office").to_string(),
                category: tag("office").or_else(|| tag("amenity")).unwrap_or("office").to_string(),
                distance_m: haversine_m(center, &coordinates).round(),
                coordinates,
            })
        })
        .collect();

    employers.sort_by(|left, right| left.distance_m.total_cmp(&right.distance_m));
    employers.truncate(NEARBY_LIMIT);
    employers
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Fixed answers; used when geolocation is disabled and in tests.
#[derive(Clone, Debug, Default)]
pub struct StaticGeoLocator {
    places: Vec<ResolvedPlace>,
    employers: Vec<NearbyEmployer>,
}

impl StaticGeoLocator {
    pub fn new(places: Vec<ResolvedPlace>, employers: Vec<NearbyEmployer>) -> Self {
        Self { places, employers }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn resolve(&self, place: &str) -> Result<Option<ResolvedPlace>> {
        let needle = place.trim().to_lowercase();
        Ok(self
            .places
            .iter()
            .find(|candidate| candidate.display_name.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn nearby(&self, center: &Coordinates, radius_m: u32) -> Result<Vec<NearbyEmployer>> {
        let mut employers: Vec<NearbyEmployer> = self
            .employers
            .iter()
            .map(|employer| NearbyEmployer {
                distance_m: haversine_m(center, &employer.coordinates).round(),
                ..employer.clone()
            })
            .filter(|employer| employer.distance_m <= f64::from(radius_m))
            .collect();
        employers.sort_by(|left, right| left.distance_m.total_cmp(&right.distance_m));
        Ok(employers)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use careercoach_core::domain::payload::{Coordinates, NearbyEmployer, ResolvedPlace};

    use super::{haversine_m, parse_nominatim, parse_overpass, GeoLocator, StaticGeoLocator};

    fn berlin() -> Coordinates {
        Coordinates { lat: 52.52, lon: 13.405 }
    }

    #[test]
    fn haversine_matches_known_distance() {
        let paris = Coordinates { lat: 48.8566, lon: 2.3522 };
        let distance_km = haversine_m(&berlin(), &paris) / 1000.0;
        assert!((distance_km - 878.0).abs() < 5.0, "got {distance_km}");
        assert_eq!(haversine_m(&berlin(), &berlin()), 0.0);
    }

    #[test]
    fn nominatim_results_parse_string_coordinates() {
        let body = json!([{
            "lat": "52.5170365",
            "lon": "13.3888599",
            "display_name": "Berlin, Deutschland",
            "address": { "country": "Deutschland" }
        }]);

        let place = parse_nominatim(&body).expect("place");
        assert_eq!(place.country.as_deref(), Some("Deutschland"));
        assert!((place.coordinates.lat - 52.517).abs() < 0.001);
        assert!(parse_nominatim(&json!([])).is_none());
    }

    #[test]
    fn overpass_elements_use_center_for_ways_and_sort_by_distance() {
        let body = json!({
            "elements": [
                { "type": "way", "center": { "lat": 52.53, "lon": 13.405 },
                  "tags": { "name": "Far Corp", "office": "company" } },
                { "type": "node", "lat": 52.521, "lon": 13.405,
                  "tags": { "amenity": "coworking_space" } },
                { "type": "node", "tags": { "name": "No Coordinates" } }
            ]
        });

        let employers = parse_overpass(&body, &berlin());
        assert_eq!(employers.len(), 2);
        assert_eq!(employers[0].name, "Unknown Office");
        assert_eq!(employers[0].category, "coworking_space");
        assert_eq!(employers[1].name, "Far Corp");
        assert!(employers[0].distance_m < employers[1].distance_m);
    }

    #[tokio::test]
    async fn static_locator_filters_by_radius() {
        let locator = StaticGeoLocator::new(
            vec![ResolvedPlace {
                display_name: "Berlin, Germany".to_string(),
                coordinates: berlin(),
                country: Some("Germany".to_string()),
            }],
            vec![
                NearbyEmployer {
                    name: "Close GmbH".to_string(),
                    category: "it".to_string(),
                    coordinates: Coordinates { lat: 52.521, lon: 13.405 },
                    distance_m: 0.0,
                },
                NearbyEmployer {
                    name: "Potsdam AG".to_string(),
                    category: "company".to_string(),
                    coordinates: Coordinates { lat: 52.39, lon: 13.06 },
                    distance_m: 0.0,
                },
            ],
        );

        let place = locator.resolve("berlin").await.expect("resolve").expect("known place");
        let nearby = locator.nearby(&place.coordinates, 5_000).await.expect("nearby");

        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].name, "Close GmbH");
        assert!(locator.resolve("Atlantis").await.expect("resolve").is_none());
    }
}
