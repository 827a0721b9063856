//! Geographic classification of event hosts: private addresses are
//! labelled "Internal"; public ones are resolved against a small
//! built-in range table standing in for a full geo database.

use crate::enrichment::Enricher;
use crate::error::Result;
use crate::model::Event;
use async_trait::async_trait;
use std::net::IpAddr;

/// Adds `geo_country` / `geo_city` / `geo_asn` metadata keyed on the
/// event's host IP (or its `src_ip` field).
#[derive(Debug, Default)]
pub struct GeoIpEnricher;

impl GeoIpEnricher {
    /// New enricher.
    pub fn new() -> Self {
        Self
    }

    fn extract_ip(ev: &Event) -> Option<IpAddr> {
        if let Ok(ip) = ev.host.parse() {
            return Some(ip);
        }
        ev.fields
            .get("src_ip")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

#[async_trait]
impl Enricher for GeoIpEnricher {
    fn name(&self) -> &'static str {
        "geoip"
    }

    async fn enrich(&self, ev: &mut Event) -> Result<()> {
        let Some(ip) = Self::extract_ip(ev) else {
            return Ok(());
        };

        if is_private(&ip) {
            ev.metadata.insert("geo_country".into(), "Internal".into());
            ev.metadata
                .insert("geo_city".into(), "Private Network".into());
        } else if let Some((country, city, asn)) = lookup_public(&ip) {
            ev.metadata.insert("geo_country".into(), country.into());
            ev.metadata.insert("geo_city".into(), city.into());
            ev.metadata.insert("geo_asn".into(), asn.into());
        } else {
            ev.metadata.insert("geo_country".into(), "Unknown".into());
        }
        Ok(())
    }
}

/// RFC1918 + loopback + link-local.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// String-form convenience used by the netflow counters.
pub fn is_private_str(ip: &str) -> bool {
    ip.parse::<IpAddr>().map(|ip| is_private(&ip)).unwrap_or(false)
}

/// Tiny built-in table of well-known public ranges; a production
/// deployment swaps this for a local geo database file.
fn lookup_public(ip: &IpAddr) -> Option<(&'static str, &'static str, &'static str)> {
    let IpAddr::V4(v4) = ip else { return None };
    let octets = v4.octets();
    match (octets[0], octets[1], octets[2]) {
        (8, 8, 8) | (8, 8, 4) => Some(("United States", "Mountain View", "AS15169 Google LLC")),
        (1, 1, 1) => Some(("Australia", "Sydney", "AS13335 Cloudflare")),
        (9, 9, 9) => Some(("Switzerland", "Zurich", "AS19281 Quad9")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;

    #[tokio::test]
    async fn private_hosts_are_internal() {
        let enricher = GeoIpEnricher::new();
        let mut ev = Event::new("syslog", "192.168.1.20", "msg");
        enricher.enrich(&mut ev).await.unwrap();
        assert_eq!(ev.metadata["geo_country"], "Internal");
        assert_eq!(ev.metadata["geo_city"], "Private Network");
    }

    #[tokio::test]
    async fn known_public_ranges_resolve() {
        let enricher = GeoIpEnricher::new();
        let mut ev = Event::new("syslog", "8.8.8.8", "msg");
        enricher.enrich(&mut ev).await.unwrap();
        assert_eq!(ev.metadata["geo_country"], "United States");
        assert!(ev.metadata["geo_asn"].contains("Google"));
    }

    #[tokio::test]
    async fn unknown_public_ip_is_unknown() {
        let enricher = GeoIpEnricher::new();
        let mut ev = Event::new("syslog", "203.0.113.9", "msg");
        enricher.enrich(&mut ev).await.unwrap();
        assert_eq!(ev.metadata["geo_country"], "Unknown");
    }

    #[tokio::test]
    async fn falls_back_to_src_ip_field() {
        let enricher = GeoIpEnricher::new();
        let mut ev = Event::new("netflow", "gateway-01", "flow");
        ev.fields
            .insert("src_ip".into(), FieldValue::from("10.0.0.4"));
        enricher.enrich(&mut ev).await.unwrap();
        assert_eq!(ev.metadata["geo_country"], "Internal");
    }

    #[tokio::test]
    async fn hostnames_without_ip_are_left_alone() {
        let enricher = GeoIpEnricher::new();
        let mut ev = Event::new("syslog", "db-primary", "msg");
        enricher.enrich(&mut ev).await.unwrap();
        assert!(ev.metadata.is_empty());
    }
}
