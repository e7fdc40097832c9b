//! Usage trend and histogram commands

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::{ApiClient, HistogramPoint, Settings, TrendPoint};
use crate::output::{format_cost_value, print_info, print_table, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    fn file_prefix(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }
}

/// Histogram windows published by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    /// Daily buckets over 14 days
    #[value(name = "14d")]
    FourteenDays,
    /// Monthly buckets over a year
    #[value(name = "1y")]
    Year,
}

impl Period {
    fn seconds(&self) -> u64 {
        match self {
            Period::FourteenDays => 1_209_600,
            Period::Year => 31_968_000,
        }
    }
}

pub fn trend_dataset(resource: Resource) -> String {
    format!("{}_usage_trends", resource.file_prefix())
}

pub fn histogram_dataset(resource: Resource, period: Period, requests: bool) -> String {
    let kind = if requests { "requests" } else { "usage" };
    format!("{}_{kind}_period_{}", resource.file_prefix(), period.seconds())
}

/// Latest and peak trend value of one namespace
#[derive(Debug, Tabled, Serialize, PartialEq)]
struct TrendRow {
    #[tabled(rename = "Namespace")]
    name: String,
    #[tabled(rename = "Last (%)")]
    last: f64,
    #[tabled(rename = "Peak (%)")]
    peak: f64,
    #[tabled(rename = "Last Sample (UTC)")]
    last_date: String,
}

fn summarize_trends(points: &[TrendPoint]) -> Vec<TrendRow> {
    let mut rows: BTreeMap<&str, TrendRow> = BTreeMap::new();
    for point in points {
        let row = rows.entry(point.name.as_str()).or_insert_with(|| TrendRow {
            name: point.name.clone(),
            last: point.usage,
            peak: point.usage,
            last_date: point.date_utc.clone(),
        });
        row.peak = row.peak.max(point.usage);
        // RFC 3339 UTC timestamps order lexically
        if point.date_utc >= row.last_date {
            row.last = point.usage;
            row.last_date = point.date_utc.clone();
        }
    }

    let mut rows: Vec<TrendRow> = rows.into_values().collect();
    rows.sort_by(|a, b| b.last.total_cmp(&a.last).then_with(|| a.name.cmp(&b.name)));
    rows
}

/// Show the last week of hourly usage per namespace
pub async fn show_trends(client: &ApiClient, resource: Resource, format: OutputFormat) -> Result<()> {
    let points: Vec<TrendPoint> = client.dataset(&trend_dataset(resource)).await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&points)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!(
                "{}",
                format!("{} usage over the last 7 days (% of capacity)", resource.file_prefix())
                    .bold()
            );
            print_table(&summarize_trends(&points), format);
        }
    }

    Ok(())
}

/// Row for histogram table
#[derive(Debug, Tabled, Serialize)]
struct UsageRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Namespace")]
    stack: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Keep points of one namespace, or all of them
fn filter_points(points: Vec<HistogramPoint>, namespace: Option<&str>) -> Vec<HistogramPoint> {
    points
        .into_iter()
        .filter(|p| namespace.map_or(true, |ns| p.stack == ns))
        .collect()
}

/// Total of every bucket, in publication order
fn bucket_totals(points: &[HistogramPoint]) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    for point in points {
        match totals.last_mut() {
            Some((date, total)) if *date == point.date => *total += point.usage,
            _ => totals.push((point.date.clone(), point.usage)),
        }
    }
    totals
}

/// Show the usage or requests histogram of a period
pub async fn show_usage(
    client: &ApiClient,
    resource: Resource,
    period: Period,
    requests: bool,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let settings: Settings = client.get("api/v1/settings").await?;
    let points: Vec<HistogramPoint> = client
        .dataset(&histogram_dataset(resource, period, requests))
        .await?;
    let points = filter_points(points, namespace.as_deref());

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&points)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            let kind = if requests { "requests" } else { "usage" };
            println!(
                "{}",
                format!(
                    "{} {} per {} ({})",
                    resource.file_prefix(),
                    kind,
                    if period == Period::Year { "month" } else { "day" },
                    settings.cost_model
                )
                .bold()
            );

            let rows: Vec<UsageRow> = points
                .iter()
                .map(|p| UsageRow {
                    date: p.date.clone(),
                    stack: p.stack.clone(),
                    value: format_cost_value(
                        p.usage,
                        &settings.cost_model,
                        &settings.currency_symbol,
                    ),
                })
                .collect();
            print_table(&rows, format);

            if settings.cost_model == "CHARGE_BACK" && namespace.is_none() {
                for (date, total) in bucket_totals(&points) {
                    print_info(&format!(
                        "{date}: {}",
                        format_cost_value(total, &settings.cost_model, &settings.currency_symbol)
                    ));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(name: &str, date: &str, usage: f64) -> TrendPoint {
        TrendPoint {
            name: name.into(),
            date_utc: date.into(),
            usage,
        }
    }

    fn point(stack: &str, date: &str, usage: f64) -> HistogramPoint {
        HistogramPoint {
            stack: stack.into(),
            usage,
            date: date.into(),
        }
    }

    #[test]
    fn test_dataset_names() {
        assert_eq!(trend_dataset(Resource::Memory), "memory_usage_trends");
        assert_eq!(
            histogram_dataset(Resource::Cpu, Period::FourteenDays, false),
            "cpu_usage_period_1209600"
        );
        assert_eq!(
            histogram_dataset(Resource::Memory, Period::Year, true),
            "memory_requests_period_31968000"
        );
    }

    #[test]
    fn test_summarize_trends() {
        let rows = summarize_trends(&[
            trend("default", "2024-03-02T08:00:00Z", 25.5),
            trend("default", "2024-03-02T09:00:00Z", 12.0),
            trend("api", "2024-03-02T09:00:00Z", 40.0),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "api");
        assert_eq!(rows[1].last, 12.0);
        assert_eq!(rows[1].peak, 25.5);
        assert_eq!(rows[1].last_date, "2024-03-02T09:00:00Z");
    }

    #[test]
    fn test_filter_and_totals() {
        let points = vec![
            point("api", "Mar 01", 3.0),
            point("web", "Mar 01", 7.0),
            point("web", "Mar 02", 5.0),
        ];
        assert_eq!(
            bucket_totals(&points),
            vec![("Mar 01".to_string(), 10.0), ("Mar 02".to_string(), 5.0)]
        );

        let web = filter_points(points, Some("web"));
        assert_eq!(web.len(), 2);
        assert!(web.iter().all(|p| p.stack == "web"));
    }
}
