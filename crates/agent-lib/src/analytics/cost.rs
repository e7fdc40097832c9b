//! Cost attribution models

use super::DateBucket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How aggregated usage is turned into exported figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostModel {
    /// Raw summed usage
    #[default]
    Cumulative,
    /// Percentage share of the bucket's cross-entity total
    Ratio,
    /// Share of the bucket's billed amount
    ChargeBack,
}

impl CostModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostModel::Cumulative => "CUMULATIVE",
            CostModel::Ratio => "RATIO",
            CostModel::ChargeBack => "CHARGE_BACK",
        }
    }
}

impl fmt::Display for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CUMULATIVE" => Ok(CostModel::Cumulative),
            "RATIO" => Ok(CostModel::Ratio),
            "CHARGE_BACK" | "CHARGEBACK" => Ok(CostModel::ChargeBack),
            other => Err(format!(
                "unknown cost model {other:?}, expected CUMULATIVE, RATIO or CHARGE_BACK"
            )),
        }
    }
}

/// Attributed values per bucket and entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attribution {
    pub values: BTreeMap<DateBucket, BTreeMap<String, f64>>,
    /// Buckets a charge-back could not bill, their values were set to 0
    pub unbilled: Vec<DateBucket>,
}

/// Apply a cost model to a table of per-bucket entity values
///
/// `billing` is the billed amount of each bucket and is only read by the
/// charge-back model, which needs a strictly positive amount.
pub fn attribute(
    model: CostModel,
    table: &BTreeMap<DateBucket, BTreeMap<String, f64>>,
    billing: &BTreeMap<DateBucket, f64>,
) -> Attribution {
    let mut attribution = Attribution::default();

    for (bucket, entities) in table {
        let total: f64 = entities.values().sum();
        let amount = billing.get(bucket).copied().filter(|a| *a > 0.0);
        if model == CostModel::ChargeBack && amount.is_none() {
            attribution.unbilled.push(bucket.clone());
        }

        let values = entities
            .iter()
            .map(|(name, value)| {
                let attributed = match model {
                    CostModel::Cumulative => *value,
                    CostModel::Ratio => share(*value, total, 100.0),
                    CostModel::ChargeBack => amount.map_or(0.0, |a| share(*value, total, a)),
                };
                (name.clone(), attributed)
            })
            .collect();
        attribution.values.insert(bucket.clone(), values);
    }

    attribution
}

/// `value / total` of `scale`, or 0 without a positive total
fn share(value: f64, total: f64, scale: f64) -> f64 {
    if total > 0.0 {
        value * scale / total
    } else {
        0.0
    }
}
