//! Trend, histogram and cost analytics over the series store
//!
//! The exporter reads every stored entity, turns recent samples into
//! per-entity trends and calendar histograms, applies the configured cost
//! model and writes the resulting datasets as JSON files.

mod cost;
mod export;
mod histogram;
mod trend;

pub use cost::{attribute, Attribution, CostModel};
pub use export::{dataset_names, ExportReport, ExporterConfig, ExporterLoop, HistogramPoint};
pub use histogram::{dump_histogram, BucketStats, BucketTable, Histogram, PeriodRollup};
pub use trend::{dump_trend, Trend, TrendPoint};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resolutions tried in order when reading a series, coarsest first
///
/// A cold series may only hold a few primary points, too few for an hourly
/// row to be known, so the 5 minute resolution is tried next.
pub const FETCH_RESOLUTIONS: [u64; 2] = [3600, 300];

/// Decimal precision of exported values
pub const OUTPUT_PRECISION: i32 = 2;

/// A tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];

    /// Prefix of dataset file names
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }

    /// Label value used in exported metrics
    pub fn label(&self) -> &'static str {
        match self {
            Resource::Cpu => "CPU",
            Resource::Memory => "MEMORY",
        }
    }

    /// Pick this resource's gauge out of a sample
    pub fn of(&self, values: [f64; 2]) -> f64 {
        match self {
            Resource::Cpu => values[0],
            Resource::Memory => values[1],
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Resource::Cpu),
            "memory" | "mem" => Ok(Resource::Memory),
            other => Err(format!("unknown resource {other:?}, expected cpu or memory")),
        }
    }
}

/// Analysis windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    /// Trend window (7 days)
    Week,
    /// Daily histogram window (14 days)
    FourteenDays,
    /// Monthly histogram window (370 days)
    Year,
}

impl Period {
    /// Periods rendered as histograms
    pub const HISTOGRAMS: [Period; 2] = [Period::FourteenDays, Period::Year];

    pub fn seconds(&self) -> i64 {
        match self {
            Period::Week => 604_800,
            Period::FourteenDays => 1_209_600,
            Period::Year => 31_968_000,
        }
    }

    /// Label value used in exported metrics
    pub fn label(&self) -> &'static str {
        match self {
            Period::Week => "PERIOD_7_DAYS_SEC",
            Period::FourteenDays => "PERIOD_14_DAYS_SEC",
            Period::Year => "PERIOD_YEAR_SEC",
        }
    }

    /// Calendar bucket a timestamp falls into for this period
    ///
    /// Year-long periods group by month, shorter ones by day.
    pub fn bucket(&self, timestamp: i64) -> DateBucket {
        let time = utc(timestamp);
        match self {
            Period::Year => {
                let start = Utc
                    .with_ymd_and_hms(time.year(), time.month(), 1, 0, 0, 0)
                    .single()
                    .map(|t| t.timestamp())
                    .unwrap_or(timestamp);
                DateBucket {
                    start,
                    label: time.format("%b %Y").to_string(),
                }
            }
            Period::Week | Period::FourteenDays => DateBucket {
                start: timestamp.div_euclid(86_400) * 86_400,
                label: time.format("%b %d").to_string(),
            },
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "7d" | "week" | "604800" => Ok(Period::Week),
            "14d" | "1209600" => Ok(Period::FourteenDays),
            "1y" | "year" | "31968000" => Ok(Period::Year),
            other => Err(format!("unknown period {other:?}, expected 14d or 1y")),
        }
    }
}

/// A calendar group of a histogram, ordered chronologically
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateBucket {
    /// Start of the group (Unix seconds)
    pub start: i64,
    /// Display label, e.g. `Mar 02` or `Mar 2024`
    pub label: String,
}

pub(crate) fn utc(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// Round to the exported precision
pub(crate) fn round_output(value: f64) -> f64 {
    crate::cluster::round_to(value, OUTPUT_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-02T10:30:00Z
    const T: i64 = 1_709_375_400;

    #[test]
    fn test_day_bucket() {
        let bucket = Period::FourteenDays.bucket(T);
        assert_eq!(bucket.label, "Mar 02");
        assert_eq!(bucket.start, 1_709_337_600);
    }

    #[test]
    fn test_month_bucket() {
        let bucket = Period::Year.bucket(T);
        assert_eq!(bucket.label, "Mar 2024");
        // 2024-03-01T00:00:00Z
        assert_eq!(bucket.start, 1_709_251_200);
    }

    #[test]
    fn test_buckets_order_chronologically() {
        let feb = Period::Year.bucket(T - 30 * 86_400);
        let mar = Period::Year.bucket(T);
        assert_eq!(feb.label, "Feb 2024");
        assert!(feb < mar);
    }

    #[test]
    fn test_parse_resource_and_period() {
        assert_eq!("CPU".parse::<Resource>().unwrap(), Resource::Cpu);
        assert_eq!("memory".parse::<Resource>().unwrap(), Resource::Memory);
        assert!("gpu".parse::<Resource>().is_err());
        assert_eq!("14d".parse::<Period>().unwrap(), Period::FourteenDays);
        assert_eq!("1y".parse::<Period>().unwrap(), Period::Year);
        assert_eq!(Period::Year.seconds(), 31_968_000);
    }
}
