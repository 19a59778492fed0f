use super::ParamsCollator;
use crate::delivery::{DeliveryRequest, RequestDetails};
use serde_json::{Map, Value};

pub const GEO_LATITUDE: &str = "latitude";
pub const GEO_LONGITUDE: &str = "longitude";
pub const GEO_CITY: &str = "city";
pub const GEO_REGION: &str = "region";
pub const GEO_COUNTRY: &str = "country";

/// The values collated when the request has no geo data. Response-token
/// population compares against these to avoid emitting empty facts.
pub fn default_geo_params() -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(GEO_LATITUDE.to_string(), Value::Null);
    params.insert(GEO_LONGITUDE.to_string(), Value::Null);
    params.insert(GEO_CITY.to_string(), Value::from(""));
    params.insert(GEO_REGION.to_string(), Value::from(""));
    params.insert(GEO_COUNTRY.to_string(), Value::from(""));
    params
}

/// Geo facts, normalized the way rule conditions expect them: city upper-cased
/// with spaces removed, region/country upper-cased.
#[derive(Default)]
pub struct GeoParamsCollator;

impl ParamsCollator for GeoParamsCollator {
    fn collate(
        &self,
        request: &DeliveryRequest,
        _details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value> {
        let Some(geo) = request.context.as_ref().and_then(|c| c.geo.as_ref()) else {
            return default_geo_params();
        };

        let mut params = Map::new();
        params.insert(
            GEO_LATITUDE.to_string(),
            geo.latitude.map(Value::from).unwrap_or(Value::Null),
        );
        params.insert(
            GEO_LONGITUDE.to_string(),
            geo.longitude.map(Value::from).unwrap_or(Value::Null),
        );
        params.insert(
            GEO_CITY.to_string(),
            Value::from(
                geo.city
                    .as_deref()
                    .unwrap_or("")
                    .to_uppercase()
                    .replace(' ', ""),
            ),
        );
        params.insert(
            GEO_REGION.to_string(),
            Value::from(geo.state_code.as_deref().unwrap_or("").to_uppercase()),
        );
        params.insert(
            GEO_COUNTRY.to_string(),
            Value::from(geo.country_code.as_deref().unwrap_or("").to_uppercase()),
        );
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Context, Geo};

    #[test]
    fn test_defaults_without_geo() {
        let params = GeoParamsCollator.collate(&DeliveryRequest::default(), None);
        assert_eq!(params, default_geo_params());
    }

    #[test]
    fn test_normalization() {
        let request = DeliveryRequest {
            context: Some(Context {
                geo: Some(Geo {
                    city: Some("san francisco".to_string()),
                    state_code: Some("ca".to_string()),
                    country_code: Some("us".to_string()),
                    latitude: Some(37.77),
                    longitude: Some(-122.41),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let params = GeoParamsCollator.collate(&request, None);
        assert_eq!(params[GEO_CITY], "SANFRANCISCO");
        assert_eq!(params[GEO_REGION], "CA");
        assert_eq!(params[GEO_COUNTRY], "US");
        assert_eq!(params[GEO_LATITUDE], Value::from(37.77));
    }
}
