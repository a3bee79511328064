//! Instance pricing lookup
//!
//! The monitor only needs a price per instance type. The table is refreshed
//! once at startup and then read concurrently by the node watch loop.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-demand hourly prices (USD) for common instance types
const BUILTIN_ON_DEMAND: &[(&str, f64)] = &[
    ("t3.medium", 0.0416),
    ("t3.large", 0.0832),
    ("t3.xlarge", 0.1664),
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("m5.2xlarge", 0.384),
    ("m5.4xlarge", 0.768),
    ("m6i.large", 0.096),
    ("m6i.xlarge", 0.192),
    ("c5.large", 0.085),
    ("c5.xlarge", 0.17),
    ("c5.2xlarge", 0.34),
    ("c6i.large", 0.085),
    ("c6i.xlarge", 0.17),
    ("r5.large", 0.126),
    ("r5.xlarge", 0.252),
];

/// Price lookup used by the cluster state tracker
#[async_trait]
pub trait PricingOracle: Send + Sync {
    /// Reload on-demand prices
    async fn refresh_on_demand(&self) -> Result<()>;

    /// Reload spot prices
    async fn refresh_spot(&self) -> Result<()>;

    /// Hourly on-demand price for an instance type
    fn on_demand_price(&self, instance_type: &str) -> Option<f64>;

    /// Hourly spot price for an instance type
    fn spot_price(&self, instance_type: &str) -> Option<f64>;
}

/// Price file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PriceFile {
    on_demand: HashMap<String, f64>,
    spot: HashMap<String, f64>,
}

/// Price table backed by an optional JSON or YAML file
pub struct PriceTable {
    source: Option<PathBuf>,
    on_demand: DashMap<String, f64>,
    spot: DashMap<String, f64>,
}

impl PriceTable {
    /// Create an empty table reading from `source`, or from the built-in
    /// on-demand list when no file is given
    pub fn new(source: Option<PathBuf>) -> Self {
        Self {
            source,
            on_demand: DashMap::new(),
            spot: DashMap::new(),
        }
    }

    /// Create a table with fixed on-demand prices and no backing file
    pub fn from_prices<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let table = Self::new(None);
        for (instance_type, price) in prices {
            table.on_demand.insert(instance_type.into(), price);
        }
        table
    }

    /// Number of known on-demand prices
    pub fn len(&self) -> usize {
        self.on_demand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.on_demand.is_empty()
    }

    async fn read_file(path: &Path) -> Result<PriceFile> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read price file {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let file = if is_json {
            serde_json::from_str(&data).context("Failed to parse JSON price file")?
        } else {
            serde_yaml::from_str(&data).context("Failed to parse YAML price file")?
        };
        Ok(file)
    }

    fn replace(target: &DashMap<String, f64>, prices: HashMap<String, f64>) {
        target.retain(|k, _| prices.contains_key(k));
        for (instance_type, price) in prices {
            target.insert(instance_type, price);
        }
    }
}

#[async_trait]
impl PricingOracle for PriceTable {
    async fn refresh_on_demand(&self) -> Result<()> {
        let prices: HashMap<String, f64> = match &self.source {
            Some(path) => Self::read_file(path).await?.on_demand,
            None if !self.on_demand.is_empty() => {
                debug!("Keeping fixed on-demand prices");
                return Ok(());
            }
            None => BUILTIN_ON_DEMAND
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        };

        Self::replace(&self.on_demand, prices);
        info!(
            instance_types = self.on_demand.len(),
            source = ?self.source,
            "Refreshed on-demand pricing"
        );
        Ok(())
    }

    async fn refresh_spot(&self) -> Result<()> {
        let Some(path) = &self.source else {
            debug!("No price file configured, skipping spot pricing");
            return Ok(());
        };

        let prices = Self::read_file(path).await?.spot;
        Self::replace(&self.spot, prices);
        info!(instance_types = self.spot.len(), "Refreshed spot pricing");
        Ok(())
    }

    fn on_demand_price(&self, instance_type: &str) -> Option<f64> {
        self.on_demand.get(instance_type).map(|p| *p)
    }

    fn spot_price(&self, instance_type: &str) -> Option<f64> {
        self.spot.get(instance_type).map(|p| *p)
    }
}
