//! Round-robin gauge series
//!
//! A series stores two gauges per sample at a fixed step. Samples land in a
//! primary ring (one point per row) and are averaged into coarser rings.
//! Every ring has a fixed number of rows addressed by `(start / resolution)
//! mod rows`, and every row remembers the interval it holds, so a row whose
//! position was reused by a newer interval reads as unknown. Rows older
//! than a ring's span are never returned: old data is only ever available
//! at coarse resolution and eventually not at all.

/// Gauge values of one sample: CPU and memory
pub type Gauges = [f64; 2];

/// Primary archive span (14 days)
pub const PRIMARY_SPAN_SECS: u64 = 14 * 24 * 3600;

/// Number of rows in the hourly archive (370 days)
pub const HOURLY_ROWS: u64 = 8880;

/// A consolidated row is known when at least this fraction of its points is
const MIN_KNOWN_FRACTION: f64 = 0.5;

/// Start of a ring row that never held data
pub(super) const EMPTY_ROW: i64 = i64::MIN;

/// Shape of a consolidated archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Primary points averaged into one row
    pub points_per_row: u64,
    /// Number of rows retained
    pub rows: u64,
}

/// Shape of a whole series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLayout {
    /// Sample interval in seconds
    pub step: u64,
    pub primary_rows: u64,
    pub archives: Vec<ArchiveLayout>,
}

impl SeriesLayout {
    /// The default layout for `step`: a primary ring covering 14 days and
    /// an hourly ring covering 370 days
    pub fn new(step: u64) -> Self {
        let step = step.max(1);
        Self::with_archives(
            step,
            (PRIMARY_SPAN_SECS / step).max(1),
            vec![ArchiveLayout {
                points_per_row: (3600 / step).max(1),
                rows: HOURLY_ROWS,
            }],
        )
    }

    /// An explicit layout; archives that would not consolidate anything are
    /// left out
    pub fn with_archives(step: u64, primary_rows: u64, archives: Vec<ArchiveLayout>) -> Self {
        Self {
            step: step.max(1),
            primary_rows: primary_rows.max(1),
            archives: archives
                .into_iter()
                .filter(|layout| layout.points_per_row > 1 && layout.rows > 0)
                .collect(),
        }
    }

    /// Available resolutions in seconds, finest first
    pub fn resolutions(&self) -> Vec<u64> {
        (0..=self.archives.len())
            .map(|source| self.resolution(source) as u64)
            .collect()
    }

    /// Resolution of a data source: 0 is the primary ring, `i + 1` archive `i`
    pub(super) fn resolution(&self, source: usize) -> i64 {
        let step = self.step as i64;
        match source {
            0 => step,
            i => step * self.archives[i - 1].points_per_row as i64,
        }
    }

    pub(super) fn rows(&self, source: usize) -> u64 {
        match source {
            0 => self.primary_rows,
            i => self.archives[i - 1].rows,
        }
    }

    /// Ring position of the row starting at `start`
    pub(super) fn position(&self, source: usize, start: i64) -> usize {
        let resolution = self.resolution(source);
        start
            .div_euclid(resolution)
            .rem_euclid(self.rows(source) as i64) as usize
    }

    /// Rows starting at or before this instant have left the ring
    fn horizon(&self, source: usize, newest: i64) -> i64 {
        let resolution = self.resolution(source);
        align(newest, resolution) - self.rows(source) as i64 * resolution
    }

    /// Ring positions touched by writing `values` at `timestamp`
    ///
    /// `None` when the sample must be rejected, either because a value is
    /// not finite or because the slot already fell out of the primary ring.
    pub(super) fn place(
        &self,
        last_update: Option<i64>,
        timestamp: i64,
        values: Gauges,
    ) -> Option<Placement> {
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let slot = align(timestamp, self.step as i64);
        let newest = last_update.map_or(slot, |last| last.max(slot));
        if slot <= self.horizon(0, newest) {
            return None;
        }

        let archives = (1..=self.archives.len())
            .map(|source| {
                let start = align(slot, self.resolution(source));
                (self.position(source, start), start)
            })
            .collect();
        Some(Placement {
            slot,
            newest,
            primary: self.position(0, slot),
            archives,
        })
    }

    /// Source whose resolution is closest to `resolution` among those
    /// spanning `range`, falling back to the longest one
    pub fn pick_source(&self, range: i64, resolution: u64) -> usize {
        let spans: Vec<(usize, i64, i64)> = (0..=self.archives.len())
            .map(|i| {
                let res = self.resolution(i);
                (i, res, res * self.rows(i) as i64)
            })
            .collect();

        let wanted = resolution as i64;
        spans
            .iter()
            .filter(|(_, _, span)| *span >= range)
            .min_by_key(|(_, res, _)| ((res - wanted).abs(), *res))
            .or_else(|| spans.iter().max_by_key(|(_, _, span)| *span))
            .map(|(i, _, _)| *i)
            .unwrap_or(0)
    }
}

/// A primary ring row
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct PrimaryRow {
    pub slot: i64,
    pub values: Gauges,
}

impl PrimaryRow {
    pub const EMPTY: Self = Self {
        slot: EMPTY_ROW,
        values: [0.0; 2],
    };
}

/// A consolidated ring row: running sum of the primary points it covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct ArchiveRow {
    pub start: i64,
    pub sum: Gauges,
    pub count: u64,
}

impl ArchiveRow {
    pub const EMPTY: Self = Self {
        start: EMPTY_ROW,
        sum: [0.0; 2],
        count: 0,
    };
}

/// Where one sample lands
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Placement {
    pub slot: i64,
    /// Newest slot of the series once the sample is written
    pub newest: i64,
    pub primary: usize,
    /// Position and row start in each archive
    pub archives: Vec<(usize, i64)>,
}

impl Placement {
    /// Fold the sample into the rows currently stored at its positions
    ///
    /// Overwriting a slot replaces its contribution to the consolidated
    /// rows instead of counting it twice.
    pub fn apply(
        &self,
        values: Gauges,
        current: PrimaryRow,
        rows: &mut [ArchiveRow],
    ) -> PrimaryRow {
        let previous = (current.slot == self.slot).then_some(current.values);

        for (row, (_, start)) in rows.iter_mut().zip(&self.archives) {
            let reused = row.start != *start;
            if reused {
                *row = ArchiveRow {
                    start: *start,
                    ..ArchiveRow::EMPTY
                };
            }
            match previous.filter(|_| !reused) {
                Some(old) => {
                    row.sum[0] -= old[0];
                    row.sum[1] -= old[1];
                }
                None => row.count += 1,
            }
            row.sum[0] += values[0];
            row.sum[1] += values[1];
        }

        PrimaryRow {
            slot: self.slot,
            values,
        }
    }
}

/// A row returned by [`RoundRobinSeries::fetch`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    /// Start of the row's interval (Unix seconds)
    pub timestamp: i64,
    /// Averaged gauges, or `None` when the row is unknown
    pub values: Option<Gauges>,
}

impl DataPoint {
    pub fn cpu(&self) -> Option<f64> {
        self.values.map(|v| v[0])
    }

    pub fn mem(&self) -> Option<f64> {
        self.values.map(|v| v[1])
    }
}

/// Fixed-step, two-gauge round-robin series held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRobinSeries {
    pub(super) layout: SeriesLayout,
    pub(super) last_update: Option<i64>,
    pub(super) primary: Vec<PrimaryRow>,
    pub(super) archives: Vec<Vec<ArchiveRow>>,
}

impl RoundRobinSeries {
    /// Create a series with the default layout for the given step
    pub fn new(step: u64) -> Self {
        Self::from_layout(SeriesLayout::new(step))
    }

    /// Create a series with an explicit archive layout
    pub fn with_layout(step: u64, primary_rows: u64, archives: Vec<ArchiveLayout>) -> Self {
        Self::from_layout(SeriesLayout::with_archives(step, primary_rows, archives))
    }

    pub fn from_layout(layout: SeriesLayout) -> Self {
        let primary = vec![PrimaryRow::EMPTY; layout.primary_rows as usize];
        let archives = layout
            .archives
            .iter()
            .map(|archive| vec![ArchiveRow::EMPTY; archive.rows as usize])
            .collect();
        Self {
            layout,
            last_update: None,
            primary,
            archives,
        }
    }

    pub fn layout(&self) -> &SeriesLayout {
        &self.layout
    }

    pub fn step(&self) -> u64 {
        self.layout.step
    }

    /// Available resolutions in seconds, finest first
    pub fn resolutions(&self) -> Vec<u64> {
        self.layout.resolutions()
    }

    pub fn is_empty(&self) -> bool {
        self.last_update.is_none()
    }

    /// Timestamp of the newest primary slot
    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    /// Insert or overwrite the sample at the step-aligned `timestamp`
    ///
    /// Returns `false` when the sample was rejected, either because a value
    /// is not finite or because the slot already fell out of the primary
    /// archive.
    pub fn update(&mut self, timestamp: i64, values: Gauges) -> bool {
        let Some(placement) = self.layout.place(self.last_update, timestamp, values) else {
            return false;
        };

        let mut rows: Vec<ArchiveRow> = placement
            .archives
            .iter()
            .zip(&self.archives)
            .map(|((position, _), ring)| ring[*position])
            .collect();
        let primary = placement.apply(values, self.primary[placement.primary], &mut rows);

        self.primary[placement.primary] = primary;
        let rings = self.archives.iter_mut().zip(&placement.archives);
        for ((ring, (position, _)), row) in rings.zip(rows) {
            ring[*position] = row;
        }
        self.last_update = Some(placement.newest);
        true
    }

    /// Read rows covering `[start, end]` at (roughly) `resolution` seconds
    ///
    /// The archive whose resolution is closest to the requested one among
    /// those spanning the whole range is used, falling back to the longest
    /// archive. Rows finer than requested are averaged up. A series that
    /// never received a sample yields no rows at all.
    pub fn fetch(&self, start: i64, end: i64, resolution: u64) -> Vec<DataPoint> {
        if self.is_empty() || end < start {
            return Vec::new();
        }

        let source = self.layout.pick_source(end - start, resolution);
        let source_resolution = self.layout.resolution(source);
        let out_resolution = (resolution as i64).max(source_resolution);
        let points_per_out = (out_resolution / source_resolution).max(1);

        let first = align(start, out_resolution);
        let last = align(end, out_resolution);
        let mut points = Vec::with_capacity(((last - first) / out_resolution + 1) as usize);

        let mut row_start = first;
        while row_start <= last {
            let mut sum = [0.0; 2];
            let mut known = 0i64;
            let mut t = row_start;
            while t < row_start + out_resolution {
                if let Some(values) = self.source_value(source, t) {
                    sum[0] += values[0];
                    sum[1] += values[1];
                    known += 1;
                }
                t += source_resolution;
            }

            let values = if known > 0 && known as f64 >= MIN_KNOWN_FRACTION * points_per_out as f64
            {
                Some([sum[0] / known as f64, sum[1] / known as f64])
            } else {
                None
            };
            points.push(DataPoint {
                timestamp: row_start,
                values,
            });
            row_start += out_resolution;
        }

        points
    }

    fn source_value(&self, source: usize, start: i64) -> Option<Gauges> {
        let newest = self.last_update?;
        if start <= self.layout.horizon(source, newest) {
            return None;
        }
        let position = self.layout.position(source, start);

        if source == 0 {
            let row = self.primary[position];
            return (row.slot == start).then_some(row.values);
        }

        let row = self.archives[source - 1][position];
        let needed = MIN_KNOWN_FRACTION * self.layout.archives[source - 1].points_per_row as f64;
        if row.start != start || row.count == 0 || (row.count as f64) < needed {
            return None;
        }
        let count = row.count as f64;
        Some([row.sum[0] / count, row.sum[1] / count])
    }
}

/// Align a timestamp down to a multiple of `resolution`
pub fn align(timestamp: i64, resolution: i64) -> i64 {
    timestamp.div_euclid(resolution) * resolution
}
