//! Chronological per-entity trends

use super::{round_output, utc, Period, Resource, FETCH_RESOLUTIONS};
use crate::store::{DataPoint, Entity, SeriesSet};
use serde::{Deserialize, Serialize};

/// One row of a trend dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub name: String,
    #[serde(rename = "dateUTC")]
    pub date_utc: String,
    pub usage: f64,
}

/// Trend of one entity, one series per resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trend {
    pub cpu: Vec<TrendPoint>,
    pub memory: Vec<TrendPoint>,
    /// Resolution the rows were read at, if any were found
    pub resolution: Option<u64>,
}

impl Trend {
    pub fn points(&self, resource: Resource) -> &[TrendPoint] {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.memory.is_empty()
    }

    /// Most recent value of a resource
    pub fn last(&self, resource: Resource) -> Option<f64> {
        self.points(resource).last().map(|p| p.usage)
    }
}

/// Read the last `period` of an entity as a chronological trend
///
/// Rows are read hourly first; if every known value sums to zero the
/// series is read again at 5 minutes. Unknown rows are skipped. The trend
/// is empty when no resolution yields usage.
pub fn dump_trend(series: &SeriesSet, entity: &Entity, period: Period, now: i64) -> Trend {
    let start = now - period.seconds();

    for resolution in FETCH_RESOLUTIONS {
        let points = series.fetch(entity, start, now, resolution);
        let trend = build_trend(entity.display_name(), &points, resolution);

        let total: f64 = trend.cpu.iter().chain(&trend.memory).map(|p| p.usage).sum();
        if total > 0.0 {
            return trend;
        }
    }

    Trend::default()
}

fn build_trend(name: &str, points: &[DataPoint], resolution: u64) -> Trend {
    let mut trend = Trend {
        resolution: Some(resolution),
        ..Default::default()
    };

    for point in points {
        let Some(values) = point.values else {
            continue;
        };
        let date_utc = utc(point.timestamp)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();
        trend.cpu.push(TrendPoint {
            name: name.to_string(),
            date_utc: date_utc.clone(),
            usage: round_output(Resource::Cpu.of(values)),
        });
        trend.memory.push(TrendPoint {
            name: name.to_string(),
            date_utc,
            usage: round_output(Resource::Memory.of(values)),
        });
    }

    trend
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SeriesStore;
    use tempfile::TempDir;

    const HOUR: i64 = 3600;
    const NOW: i64 = 1_709_375_400 / HOUR * HOUR;

    fn store() -> (TempDir, SeriesStore) {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::open(dir.path(), 300).unwrap();
        (dir, store)
    }

    #[test]
    fn test_trend_of_missing_entity_is_empty() {
        let (_dir, store) = store();
        let series = store.load_all().unwrap();
        let trend = dump_trend(&series, &Entity::Namespace("ghost".into()), Period::Week, NOW);
        assert!(trend.is_empty());
        assert_eq!(trend.resolution, None);
    }

    #[test]
    fn test_trend_uses_hourly_rows() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        let first_hour = NOW - 2 * HOUR;
        for i in 0..24 {
            store.append_sample(&entity, first_hour + i * 300, 10.0, 20.0 + i as f64);
        }

        let trend = dump_trend(&store.load_all().unwrap(), &entity, Period::Week, NOW);
        assert_eq!(trend.resolution, Some(3600));
        assert_eq!(trend.cpu.len(), 2);
        assert_eq!(trend.cpu[0].name, "default");
        assert_eq!(trend.cpu[0].date_utc, "2024-03-02T08:00:00Z");
        assert_eq!(trend.cpu[0].usage, 10.0);
        // Average of 20..=31 and 32..=43
        assert_eq!(trend.memory[0].usage, 25.5);
        assert_eq!(trend.last(Resource::Memory), Some(37.5));
    }

    #[test]
    fn test_cold_series_falls_back_to_five_minutes() {
        let (_dir, store) = store();
        let entity = Entity::NonAllocatable;
        store.append_sample(&entity, NOW, 4.123, 2.0);

        let trend = dump_trend(&store.load_all().unwrap(), &entity, Period::Week, NOW);
        assert_eq!(trend.resolution, Some(300));
        assert_eq!(trend.cpu.len(), 1);
        assert_eq!(trend.cpu[0].name, "non-allocatable");
        assert_eq!(trend.cpu[0].usage, 4.12);
    }

    #[test]
    fn test_all_zero_series_yields_empty_trend() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("idle".into());
        for i in 0..12 {
            store.append_sample(&entity, NOW - HOUR + i * 300, 0.0, 0.0);
        }
        let series = store.load_all().unwrap();
        assert!(dump_trend(&series, &entity, Period::Week, NOW).is_empty());
    }

    #[test]
    fn test_trend_point_json_shape() {
        let point = TrendPoint {
            name: "default".into(),
            date_utc: "2024-03-02T08:00:00Z".into(),
            usage: 1.5,
        };
        assert_eq!(
            serde_json::to_string(&point).unwrap(),
            r#"{"name":"default","dateUTC":"2024-03-02T08:00:00Z","usage":1.5}"#
        );
    }
}
