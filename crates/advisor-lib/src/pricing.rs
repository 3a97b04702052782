//! Cloud pricing collaborator
//!
//! Looks up instance pricing and specs over HTTP, keyed by
//! `(instance_type, region)`, with a 15-minute cache so repeated advisory
//! runs never hammer the pricing service. Specs missing from the response
//! are derived from the instance-type name.

use crate::error::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default pricing cache lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Spot quotes older than this fall back to the on-demand rate.
const SPOT_FRESHNESS: chrono::Duration = chrono::Duration::minutes(30);

/// Pricing and specs for one instance type in one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePricing {
    pub instance_type: String,
    pub region: String,
    pub on_demand_price: f64,
    pub spot_price: Option<f64>,
    pub spot_observed_at: Option<DateTime<Utc>>,
    pub vcpus: u32,
    pub memory_gb: f64,
    pub gpus: u32,
    pub gpu_type: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl InstancePricing {
    /// Spot when present and fresher than 30 minutes, else on-demand.
    pub fn effective_price(&self, now: DateTime<Utc>) -> f64 {
        match (self.spot_price, self.spot_observed_at) {
            (Some(spot), Some(observed)) if spot > 0.0 && now - observed < SPOT_FRESHNESS => spot,
            _ => self.on_demand_price,
        }
    }
}

/// Wire shape returned by the pricing service. Spec fields are optional:
/// whatever the service omits is derived from the type name.
#[derive(Debug, Deserialize)]
struct PricingResponse {
    on_demand: f64,
    #[serde(default)]
    spot: Option<f64>,
    #[serde(default)]
    spot_observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    vcpus: Option<u32>,
    #[serde(default)]
    memory_gb: Option<f64>,
    #[serde(default)]
    gpus: Option<u32>,
    #[serde(default)]
    gpu_type: Option<String>,
}

pub struct PricingClient {
    http: reqwest::Client,
    base_url: Url,
    cache: RwLock<HashMap<String, InstancePricing>>,
    cache_ttl: Duration,
}

impl PricingClient {
    pub fn new(base_url: &str, timeout: Duration, cache_ttl: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Pricing {
                operation: "PricingClient::new".to_string(),
                message: "failed to build HTTP client".to_string(),
                source: Some(e),
            })?;
        let base_url = Url::parse(base_url).map_err(|e| {
            AdvisorError::validation("PricingClient::new", format!("invalid pricing URL: {e}"))
        })?;
        Ok(Self {
            http,
            base_url,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        })
    }

    /// Current pricing for one instance type, served from cache when fresh.
    pub async fn instance_pricing(
        &self,
        instance_type: &str,
        region: &str,
    ) -> Result<InstancePricing> {
        if instance_type.is_empty() || region.is_empty() {
            return Err(AdvisorError::validation(
                "instance_pricing",
                "instance type and region are required",
            ));
        }

        let key = format!("{instance_type}/{region}");
        let now = Utc::now();

        {
            let cache = self.cache.read().expect("pricing cache lock poisoned");
            if let Some(cached) = cache.get(&key) {
                let age = (now - cached.last_updated).to_std().unwrap_or_default();
                if age < self.cache_ttl {
                    debug!(instance_type, region, "pricing served from cache");
                    return Ok(cached.clone());
                }
            }
        }

        let pricing = self.fetch(instance_type, region, now).await?;

        self.cache
            .write()
            .expect("pricing cache lock poisoned")
            .insert(key, pricing.clone());

        Ok(pricing)
    }

    async fn fetch(
        &self,
        instance_type: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<InstancePricing> {
        let url = self
            .base_url
            .join(&format!("v1/pricing/{region}/{instance_type}"))
            .map_err(|e| {
                AdvisorError::validation("instance_pricing", format!("invalid pricing path: {e}"))
            })?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AdvisorError::Pricing {
                operation: "instance_pricing".to_string(),
                message: format!("pricing request for {instance_type} failed"),
                source: Some(e),
            })?;

        if !response.status().is_success() {
            return Err(AdvisorError::Pricing {
                operation: "instance_pricing".to_string(),
                message: format!(
                    "pricing service returned {} for {instance_type} in {region}",
                    response.status()
                ),
                source: None,
            });
        }

        let body: PricingResponse =
            response.json().await.map_err(|e| AdvisorError::Pricing {
                operation: "instance_pricing".to_string(),
                message: "failed to parse pricing response".to_string(),
                source: Some(e),
            })?;

        if body.spot.is_none() {
            // Tolerated: short jobs simply lose the spot discount.
            warn!(instance_type, region, "no spot quote available");
        }

        let specs = derive_instance_specs(instance_type);

        Ok(InstancePricing {
            instance_type: instance_type.to_string(),
            region: region.to_string(),
            on_demand_price: body.on_demand,
            spot_price: body.spot,
            spot_observed_at: body
                .spot_observed_at
                .or(body.spot.map(|_| now)),
            vcpus: body.vcpus.unwrap_or(specs.vcpus),
            memory_gb: body.memory_gb.unwrap_or(specs.memory_gb),
            gpus: body.gpus.unwrap_or(specs.gpus),
            gpu_type: body.gpu_type.or(specs.gpu_type),
            last_updated: now,
        })
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

struct InstanceSpecs {
    vcpus: u32,
    memory_gb: f64,
    gpus: u32,
    gpu_type: Option<String>,
}

/// Name-based spec derivation: `family.size` encodes enough to estimate
/// vCPUs, the family letter sets the GB-per-vCPU ratio, and GPU families
/// carry a known accelerator.
fn derive_instance_specs(instance_type: &str) -> InstanceSpecs {
    let (family, size) = instance_type
        .split_once('.')
        .unwrap_or((instance_type, "large"));

    let vcpus = vcpus_for_size(size);
    let memory_gb = vcpus as f64
        * match family.chars().next() {
            Some('r') => 8.0,
            Some('c') => 2.0,
            _ => 4.0,
        };

    let gpu_type = gpu_type_for_family(family);
    let gpus = if gpu_type.is_some() {
        gpu_count(family, size)
    } else {
        0
    };

    InstanceSpecs {
        vcpus,
        memory_gb,
        gpus,
        gpu_type,
    }
}

fn vcpus_for_size(size: &str) -> u32 {
    match size {
        "nano" | "micro" | "small" | "medium" => 1,
        "large" => 2,
        "xlarge" => 4,
        _ => size
            .strip_suffix("xlarge")
            .and_then(|n| n.parse::<u32>().ok())
            .map(|n| n * 4)
            .unwrap_or(2),
    }
}

fn gpu_type_for_family(family: &str) -> Option<String> {
    let gpu = match family {
        "p2" => "Tesla K80",
        "p3" | "p3dn" => "Tesla V100",
        "p4" | "p4d" => "Tesla A100",
        "p5" => "Tesla H100",
        "g4" | "g4dn" => "Tesla T4",
        "g5" => "Tesla A10G",
        "g6" => "Tesla L4",
        _ => return None,
    };
    Some(gpu.to_string())
}

fn gpu_count(family: &str, size: &str) -> u32 {
    if family.starts_with('p') {
        match size {
            "2xlarge" => 1,
            "8xlarge" => 4,
            "16xlarge" | "24xlarge" => 8,
            _ => 1,
        }
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(spot: Option<f64>, observed_minutes_ago: i64) -> InstancePricing {
        let now = Utc::now();
        InstancePricing {
            instance_type: "c5.2xlarge".to_string(),
            region: "us-east-1".to_string(),
            on_demand_price: 0.34,
            spot_price: spot,
            spot_observed_at: spot.map(|_| now - chrono::Duration::minutes(observed_minutes_ago)),
            vcpus: 8,
            memory_gb: 16.0,
            gpus: 0,
            gpu_type: None,
            last_updated: now,
        }
    }

    #[test]
    fn test_effective_price_prefers_fresh_spot() {
        let now = Utc::now();
        assert!((pricing(Some(0.13), 5).effective_price(now) - 0.13).abs() < 1e-9);
    }

    #[test]
    fn test_effective_price_ignores_stale_spot() {
        let now = Utc::now();
        assert!((pricing(Some(0.13), 45).effective_price(now) - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_effective_price_without_spot() {
        let now = Utc::now();
        assert!((pricing(None, 0).effective_price(now) - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_spec_derivation_by_family() {
        let c5 = derive_instance_specs("c5.2xlarge");
        assert_eq!(c5.vcpus, 8);
        assert!((c5.memory_gb - 16.0).abs() < 1e-9);
        assert_eq!(c5.gpus, 0);

        let r5 = derive_instance_specs("r5.xlarge");
        assert_eq!(r5.vcpus, 4);
        assert!((r5.memory_gb - 32.0).abs() < 1e-9);

        let p3 = derive_instance_specs("p3.8xlarge");
        assert_eq!(p3.vcpus, 32);
        assert_eq!(p3.gpus, 4);
        assert_eq!(p3.gpu_type.as_deref(), Some("Tesla V100"));
    }

    #[test]
    fn test_unknown_size_falls_back() {
        let odd = derive_instance_specs("m7i.metal");
        assert_eq!(odd.vcpus, 2);
    }

    #[test]
    fn test_client_rejects_bad_url() {
        assert!(PricingClient::new("not a url", Duration::from_secs(5), DEFAULT_CACHE_TTL).is_err());
    }

    #[tokio::test]
    async fn test_client_rejects_empty_lookup() {
        let client = PricingClient::new(
            "http://localhost:9",
            Duration::from_secs(1),
            DEFAULT_CACHE_TTL,
        )
        .unwrap();
        assert!(client.instance_pricing("", "us-east-1").await.is_err());
        assert_eq!(client.cache_len(), 0);
    }
}
