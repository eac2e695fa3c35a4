use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::blocking::Client;
use serde::Deserialize;

pub const FALLBACK_LOCATION: &str = "Camera Location";

const IP_LOOKUP_URL: &str = "https://ipapi.co/json/";
const REVERSE_GEOCODE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const USER_AGENT: &str = "wellness-sentinel/0.1 (fall and wake alerts)";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IpLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseGeocode {
    display_name: Option<String>,
}

/// Approximates where the device is: IP geolocation, then a reverse-geocoded
/// street address.
pub struct Locator {
    client: Client,
}

impl Locator {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build location HTTP client")?;
        Ok(Self { client })
    }

    pub fn locate_ip(&self) -> anyhow::Result<IpLocation> {
        self.client
            .get(IP_LOOKUP_URL)
            .send()
            .context("IP location request failed")?
            .error_for_status()
            .context("IP location service returned an error")?
            .json::<IpLocation>()
            .context("IP location response was not understood")
    }

    pub fn reverse_geocode(&self, lat: f64, lon: f64) -> anyhow::Result<String> {
        let params = [
            ("format", "jsonv2".to_string()),
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
        ];
        let body: ReverseGeocode = self
            .client
            .get(REVERSE_GEOCODE_URL)
            .query(&params)
            .send()
            .context("reverse geocode request failed")?
            .error_for_status()
            .context("reverse geocode service returned an error")?
            .json()
            .context("reverse geocode response was not understood")?;
        body.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| anyhow!("no address for {lat:.4},{lon:.4}"))
    }

    /// Best available description; never fails.
    pub fn describe(&self) -> String {
        let ip = match self.locate_ip() {
            Ok(ip) => Some(ip),
            Err(err) => {
                log::warn!("IP location failed: {err:#}");
                None
            }
        };

        let address = ip
            .as_ref()
            .and_then(|ip| ip.latitude.zip(ip.longitude))
            .and_then(|(lat, lon)| match self.reverse_geocode(lat, lon) {
                Ok(address) => Some(address),
                Err(err) => {
                    log::warn!("reverse geocoding failed: {err:#}");
                    None
                }
            });

        describe_location(ip.as_ref(), address)
    }
}

pub fn describe_location(ip: Option<&IpLocation>, address: Option<String>) -> String {
    if let Some(address) = address {
        return address;
    }
    let parts: Vec<&str> = ip
        .into_iter()
        .flat_map(|ip| [ip.city.as_deref(), ip.region.as_deref()])
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        FALLBACK_LOCATION.to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_wins_over_city() {
        let ip = IpLocation {
            city: Some("Waterloo".into()),
            region: Some("Ontario".into()),
            ..IpLocation::default()
        };
        assert_eq!(
            describe_location(Some(&ip), Some("200 University Ave W".into())),
            "200 University Ave W"
        );
        assert_eq!(describe_location(Some(&ip), None), "Waterloo, Ontario");
    }

    #[test]
    fn falls_back_when_nothing_is_known() {
        assert_eq!(describe_location(None, None), FALLBACK_LOCATION);
        let blank = IpLocation {
            city: Some(" ".into()),
            ..IpLocation::default()
        };
        assert_eq!(describe_location(Some(&blank), None), FALLBACK_LOCATION);
    }

    #[test]
    fn parses_ip_service_response() {
        let body = r#"{"ip":"1.2.3.4","city":"Toronto","region":"Ontario","latitude":43.65,"longitude":-79.38}"#;
        let ip: IpLocation = serde_json::from_str(body).unwrap();
        assert_eq!(ip.latitude.zip(ip.longitude), Some((43.65, -79.38)));
        assert_eq!(ip.city.as_deref(), Some("Toronto"));
    }
}
