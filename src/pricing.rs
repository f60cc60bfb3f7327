//! Static instance type reference table: vCPU, memory and on-demand Linux pricing.
//!
//! Data comes from ec2instances.info, reduced to the fields the cache needs.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};

const INSTANCE_TYPES_JSON: &str = include_str!("../data/instance_types.json");

#[derive(Debug, Clone, Deserialize)]
struct Entry {
    instance_type: String,
    #[serde(rename = "vCPU")]
    vcpu: u32,
    memory: f64,
    /// Hourly price per region as a decimal string; missing for some regions.
    pricing: HashMap<String, Option<String>>,
}

/// Enrichment for one instance type in one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeDetails {
    pub vcpu: u32,
    pub memory_gb: f64,
    /// Zero when the region has no published price.
    pub hourly_price: f64,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, Entry>,
}

impl PricingTable {
    /// Table bundled with the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(INSTANCE_TYPES_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<Entry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: entries
                .into_iter()
                .map(|e| (e.instance_type.clone(), e))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an instance type. Unknown types are an [`Error::EnrichmentMiss`];
    /// a known type without a usable price for `region` yields a zero price.
    pub fn lookup(&self, instance_type: &str, region: &str) -> Result<TypeDetails> {
        let entry = self
            .entries
            .get(instance_type)
            .ok_or_else(|| Error::EnrichmentMiss {
                instance_type: instance_type.to_string(),
                region: region.to_string(),
            })?;

        let hourly_price = entry
            .pricing
            .get(region)
            .and_then(|p| p.as_deref())
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(TypeDetails {
            vcpu: entry.vcpu,
            memory_gb: entry.memory,
            hourly_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_table_loads() {
        let table = PricingTable::bundled().unwrap();
        assert!(table.len() > 100);
    }

    #[test]
    fn test_lookup_known_type() {
        let table = PricingTable::bundled().unwrap();
        let details = table.lookup("c5d.xlarge", "us-east-1").unwrap();
        assert_eq!(details.vcpu, 4);
        assert_eq!(details.memory_gb, 8.0);
        assert!((details.hourly_price - 0.192).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_unknown_type_is_miss() {
        let table = PricingTable::bundled().unwrap();
        assert!(matches!(
            table.lookup("z9.mega", "us-east-1"),
            Err(Error::EnrichmentMiss { .. })
        ));
    }

    #[test]
    fn test_lookup_missing_region_price_is_zero() {
        let table = PricingTable::from_json(
            r#"[{"instance_type": "t2.micro", "vCPU": 1, "memory": 1,
                 "pricing": {"us-east-1": "0.0116", "ap-northeast-3": null}}]"#,
        )
        .unwrap();
        assert_eq!(table.lookup("t2.micro", "ap-northeast-3").unwrap().hourly_price, 0.0);
        assert_eq!(table.lookup("t2.micro", "eu-west-9").unwrap().hourly_price, 0.0);
        assert_eq!(table.lookup("t2.micro", "eu-west-9").unwrap().vcpu, 1);
    }
}
