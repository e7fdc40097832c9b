//! Calendar histograms and the cross-entity rollup

use super::{round_output, DateBucket, Period, Resource, FETCH_RESOLUTIONS};
use crate::store::{Entity, Gauges, SeriesSet};
use std::collections::BTreeMap;

/// Accumulated rows of one calendar bucket
///
/// Row values are weighted by the hours they span, so sums are expressed
/// in unit-hours whatever resolution the rows were read at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketStats {
    pub sum: Gauges,
    pub hours: f64,
    pub rows: usize,
}

impl BucketStats {
    /// Time-weighted mean of the bucket
    pub fn mean(&self) -> Option<Gauges> {
        (self.hours > 0.0).then(|| [self.sum[0] / self.hours, self.sum[1] / self.hours])
    }
}

/// Per-bucket sums of one entity over a period
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub buckets: BTreeMap<DateBucket, BucketStats>,
    /// Resolution the rows were read at, if any were found
    pub resolution: Option<u64>,
}

impl Histogram {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn total(&self) -> f64 {
        self.buckets.values().map(|b| b.sum[0] + b.sum[1]).sum()
    }
}

/// Read the last `period` of an entity grouped into calendar buckets
///
/// Like trends, hourly rows are tried first and 5 minute rows when the
/// hourly sums are all zero. Unknown rows are skipped. A series whose
/// known rows are all zero still yields its buckets, from the first
/// resolution that had any.
pub fn dump_histogram(series: &SeriesSet, entity: &Entity, period: Period, now: i64) -> Histogram {
    let start = now - period.seconds();
    let mut all_zero = None;

    for resolution in FETCH_RESOLUTIONS {
        let hours = resolution as f64 / 3600.0;
        let mut histogram = Histogram {
            resolution: Some(resolution),
            ..Default::default()
        };

        for point in series.fetch(entity, start, now, resolution) {
            let Some(values) = point.values else {
                continue;
            };
            let stats = histogram
                .buckets
                .entry(period.bucket(point.timestamp))
                .or_default();
            // Unit-hours, so a 5 minute row weighs 1/12 of an hourly one
            stats.sum[0] += round_output(values[0]) * hours;
            stats.sum[1] += round_output(values[1]) * hours;
            stats.hours += hours;
            stats.rows += 1;
        }

        if histogram.total() > 0.0 {
            return histogram;
        }
        if all_zero.is_none() && !histogram.is_empty() {
            all_zero = Some(histogram);
        }
    }

    all_zero.unwrap_or_default()
}

/// Per-bucket values of every exported entity, keyed by display name
pub type BucketTable = BTreeMap<DateBucket, BTreeMap<String, Gauges>>;

/// Histograms of all entities over one period
///
/// `requests` holds the requests implied by usage and request efficiency
/// (`usage / efficiency`, or 0 when the efficiency is 0). Non-allocatable
/// capacity is reserved outright, so it counts as fully requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodRollup {
    pub period: Option<Period>,
    pub usage: BucketTable,
    pub requests: BucketTable,
    /// Billed amount per bucket: hourly rate times hours
    pub billing: BTreeMap<DateBucket, f64>,
}

impl PeriodRollup {
    /// Build the rollup from every entity of the set
    pub fn build(series: &SeriesSet, period: Period, now: i64) -> Self {
        let mut rollup = PeriodRollup {
            period: Some(period),
            ..Default::default()
        };

        for entity in series.entities() {
            let histogram = dump_histogram(series, entity, period, now);

            match entity {
                Entity::Namespace(ns) => {
                    let efficiency = dump_histogram(
                        series,
                        &Entity::RequestEfficiency(ns.clone()),
                        period,
                        now,
                    );
                    rollup.add_namespace(ns, &histogram, &efficiency);
                }
                Entity::NonAllocatable => {
                    let name = entity.display_name();
                    for (bucket, stats) in histogram.buckets {
                        rollup.insert_usage(&bucket, name, stats.sum);
                        rollup.insert_requests(bucket, name, stats.sum);
                    }
                }
                Entity::BillingRate => {
                    for (bucket, stats) in histogram.buckets {
                        rollup.billing.insert(bucket, stats.sum[0]);
                    }
                }
                Entity::RequestEfficiency(_) => {}
            }
        }

        rollup
    }

    /// A bucket without any known efficiency row counts as fully efficient
    fn add_namespace(&mut self, ns: &str, usage: &Histogram, efficiency: &Histogram) {
        for (bucket, stats) in &usage.buckets {
            let ratio = efficiency
                .buckets
                .get(bucket)
                .and_then(BucketStats::mean)
                .unwrap_or([1.0, 1.0]);
            let requested = [
                implied_request(stats.sum[0], ratio[0]),
                implied_request(stats.sum[1], ratio[1]),
            ];
            self.insert_usage(bucket, ns, stats.sum);
            self.insert_requests(bucket.clone(), ns, requested);
        }
    }

    fn insert_usage(&mut self, bucket: &DateBucket, name: &str, values: Gauges) {
        self.usage
            .entry(bucket.clone())
            .or_default()
            .insert(name.to_string(), values);
    }

    fn insert_requests(&mut self, bucket: DateBucket, name: &str, values: Gauges) {
        self.requests
            .entry(bucket)
            .or_default()
            .insert(name.to_string(), values);
    }

    /// One resource of a table, as plain values
    pub fn resource_table(
        table: &BucketTable,
        resource: Resource,
    ) -> BTreeMap<DateBucket, BTreeMap<String, f64>> {
        table
            .iter()
            .map(|(bucket, entities)| {
                let values = entities
                    .iter()
                    .map(|(name, gauges)| (name.clone(), resource.of(*gauges)))
                    .collect();
                (bucket.clone(), values)
            })
            .collect()
    }

    /// Cross-entity sum of a table for every bucket
    pub fn totals(table: &BucketTable, resource: Resource) -> BTreeMap<DateBucket, f64> {
        table
            .iter()
            .map(|(bucket, entities)| {
                let total = entities.values().map(|g| resource.of(*g)).sum();
                (bucket.clone(), total)
            })
            .collect()
    }
}

fn implied_request(usage: f64, efficiency: f64) -> f64 {
    if efficiency == 0.0 {
        0.0
    } else {
        usage / efficiency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SeriesStore;
    use tempfile::TempDir;

    const HOUR: i64 = 3600;
    // 2024-03-02T10:00:00Z
    const NOW: i64 = 1_709_373_600;

    fn store() -> (TempDir, SeriesStore) {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::open(dir.path(), 300).unwrap();
        (dir, store)
    }

    /// Fill whole hours ending before `NOW` with a constant sample
    fn fill_hours(store: &SeriesStore, entity: &Entity, hours: i64, cpu: f64, mem: f64) {
        let start = NOW - hours * HOUR;
        for i in 0..hours * 12 {
            store.append_sample(entity, start + i * 300, cpu, mem);
        }
    }

    #[test]
    fn test_histogram_sums_hours_per_day() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        fill_hours(&store, &entity, 12, 10.0, 5.0);

        let series = store.load_all().unwrap();
        let histogram = dump_histogram(&series, &entity, Period::FourteenDays, NOW);
        assert_eq!(histogram.resolution, Some(3600));
        let labels: Vec<&str> = histogram.buckets.keys().map(|b| b.label.as_str()).collect();
        // 22:00 Mar 01 through 09:00 Mar 02
        assert_eq!(labels, vec!["Mar 01", "Mar 02"]);

        let mar_01 = histogram.buckets.values().next().unwrap();
        assert_eq!(mar_01.sum, [20.0, 10.0]);
        assert_eq!(mar_01.rows, 2);
        let mar_02 = histogram.buckets.values().nth(1).unwrap();
        assert_eq!(mar_02.sum, [100.0, 50.0]);
    }

    #[test]
    fn test_histogram_groups_by_month_for_a_year() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        fill_hours(&store, &entity, 3, 1.0, 1.0);

        let series = store.load_all().unwrap();
        let histogram = dump_histogram(&series, &entity, Period::Year, NOW);
        let buckets: Vec<_> = histogram.buckets.iter().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0.label, "Mar 2024");
        assert_eq!(buckets[0].1.sum, [3.0, 3.0]);
    }

    #[test]
    fn test_cold_histogram_reads_five_minute_rows_as_hours() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        store.append_sample(&entity, NOW, 12.0, 6.0);

        let series = store.load_all().unwrap();
        let histogram = dump_histogram(&series, &entity, Period::FourteenDays, NOW);
        assert_eq!(histogram.resolution, Some(300));
        let stats = histogram.buckets.values().next().unwrap();
        assert!((stats.sum[0] - 1.0).abs() < 1e-9);
        assert!((stats.sum[1] - 0.5).abs() < 1e-9);
        let mean = stats.mean().unwrap();
        assert!((mean[0] - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_rollup_implies_requests_from_efficiency() {
        let (_dir, store) = store();
        fill_hours(&store, &Entity::Namespace("web".into()), 2, 30.0, 10.0);
        fill_hours(&store, &Entity::RequestEfficiency("web".into()), 2, 0.5, 0.0);
        fill_hours(&store, &Entity::NonAllocatable, 2, 5.0, 5.0);
        fill_hours(&store, &Entity::BillingRate, 2, 2.0, 2.0);

        let rollup = PeriodRollup::build(&store.load_all().unwrap(), Period::FourteenDays, NOW);

        let bucket = Period::FourteenDays.bucket(NOW - HOUR);
        assert_eq!(rollup.usage[&bucket]["web"], [60.0, 20.0]);
        // cpu: 60 / 0.5, memory: efficiency 0 implies no request
        assert_eq!(rollup.requests[&bucket]["web"], [120.0, 0.0]);
        assert_eq!(rollup.usage[&bucket]["non-allocatable"], [10.0, 10.0]);
        assert_eq!(rollup.requests[&bucket]["non-allocatable"], [10.0, 10.0]);
        assert_eq!(rollup.billing[&bucket], 4.0);
        assert!(!rollup.usage[&bucket].contains_key("web__rf"));

        let totals = PeriodRollup::totals(&rollup.usage, Resource::Cpu);
        assert_eq!(totals[&bucket], 70.0);
    }

    #[test]
    fn test_missing_efficiency_counts_as_fully_efficient() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("batch".into());
        fill_hours(&store, &entity, 1, 8.0, 4.0);

        let rollup = PeriodRollup::build(&store.load_all().unwrap(), Period::FourteenDays, NOW);
        let bucket = Period::FourteenDays.bucket(NOW - HOUR);
        assert_eq!(rollup.requests[&bucket]["batch"], [8.0, 4.0]);
    }

    #[test]
    fn test_zero_efficiency_implies_no_request() {
        let (_dir, store) = store();
        fill_hours(&store, &Entity::Namespace("idle".into()), 2, 4.0, 2.0);
        fill_hours(&store, &Entity::RequestEfficiency("idle".into()), 2, 0.0, 0.0);

        let rollup = PeriodRollup::build(&store.load_all().unwrap(), Period::FourteenDays, NOW);
        let bucket = Period::FourteenDays.bucket(NOW - HOUR);
        assert_eq!(rollup.usage[&bucket]["idle"], [8.0, 4.0]);
        assert_eq!(rollup.requests[&bucket]["idle"], [0.0, 0.0]);
    }

    #[test]
    fn test_all_zero_histogram_keeps_its_buckets() {
        let (_dir, store) = store();
        let entity = Entity::RequestEfficiency("idle".into());
        fill_hours(&store, &entity, 2, 0.0, 0.0);

        let series = store.load_all().unwrap();
        let histogram = dump_histogram(&series, &entity, Period::FourteenDays, NOW);
        assert_eq!(histogram.resolution, Some(3600));
        let stats = histogram.buckets.values().next().unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.mean(), Some([0.0, 0.0]));

        let missing = Entity::RequestEfficiency("ghost".into());
        let series = store.load_all().unwrap();
        let histogram = dump_histogram(&series, &missing, Period::FourteenDays, NOW);
        assert!(histogram.is_empty());
        assert_eq!(histogram.resolution, None);
    }
}
