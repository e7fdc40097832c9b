//! Binary layout of a series file
//!
//! ```text
//! header    "KOARRD01" | step u64 | primary rows u64 | archive count u64
//!           | (points per row u64, rows u64) per archive | last update i64
//! primary   (slot i64, cpu f64, mem f64) per row
//! archives  (start i64, cpu sum f64, mem sum f64, count u64) per row
//! ```
//!
//! Fields are little-endian and the file size is fixed by the header.
//! Appending a sample rewrites the rows it touches and the last update
//! field, never the whole file.

use super::rrd::{
    ArchiveLayout, ArchiveRow, Gauges, PrimaryRow, RoundRobinSeries, SeriesLayout, EMPTY_ROW,
};
use crate::error::StoreError;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"KOARRD01";
const PREFIX_LEN: usize = 32;
const PRIMARY_ROW_LEN: u64 = 24;
const ARCHIVE_ROW_LEN: u64 = 32;
const MAX_ARCHIVES: u64 = 16;
const MAX_ROWS: u64 = 1 << 32;

fn header_len(archives: usize) -> u64 {
    PREFIX_LEN as u64 + archives as u64 * 16 + 8
}

/// Byte offsets of the sections of a file with a given layout
struct Offsets {
    last_update: u64,
    primary: u64,
    archives: Vec<u64>,
    end: u64,
}

impl Offsets {
    fn of(layout: &SeriesLayout) -> Self {
        let header = header_len(layout.archives.len());
        let mut next = header + layout.primary_rows * PRIMARY_ROW_LEN;
        let archives = layout
            .archives
            .iter()
            .map(|archive| {
                let offset = next;
                next += archive.rows * ARCHIVE_ROW_LEN;
                offset
            })
            .collect();
        Self {
            last_update: header - 8,
            primary: header,
            archives,
            end: next,
        }
    }

    fn primary_row(&self, position: usize) -> u64 {
        self.primary + position as u64 * PRIMARY_ROW_LEN
    }

    fn archive_row(&self, archive: usize, position: usize) -> u64 {
        self.archives[archive] + position as u64 * ARCHIVE_ROW_LEN
    }
}

/// Encode a whole series
pub(super) fn encode(series: &RoundRobinSeries) -> Vec<u8> {
    let layout = &series.layout;
    let mut bytes = Vec::with_capacity(Offsets::of(layout).end as usize);

    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&layout.step.to_le_bytes());
    bytes.extend_from_slice(&layout.primary_rows.to_le_bytes());
    bytes.extend_from_slice(&(layout.archives.len() as u64).to_le_bytes());
    for archive in &layout.archives {
        bytes.extend_from_slice(&archive.points_per_row.to_le_bytes());
        bytes.extend_from_slice(&archive.rows.to_le_bytes());
    }
    bytes.extend_from_slice(&series.last_update.unwrap_or(EMPTY_ROW).to_le_bytes());

    for row in &series.primary {
        bytes.extend_from_slice(&encode_primary(row));
    }
    for ring in &series.archives {
        for row in ring {
            bytes.extend_from_slice(&encode_archive(row));
        }
    }
    bytes
}

/// Decode a whole series
pub(super) fn decode(path: &Path, bytes: &[u8]) -> Result<RoundRobinSeries, StoreError> {
    let (layout, last_update) = decode_header(path, bytes)?;
    let offsets = Offsets::of(&layout);
    check_len(path, bytes.len() as u64, offsets.end)?;

    let primary_end = offsets.primary + layout.primary_rows * PRIMARY_ROW_LEN;
    let primary = bytes[offsets.primary as usize..primary_end as usize]
        .chunks_exact(PRIMARY_ROW_LEN as usize)
        .map(decode_primary)
        .collect();
    let archives = layout
        .archives
        .iter()
        .zip(&offsets.archives)
        .map(|(archive, offset)| {
            let end = offset + archive.rows * ARCHIVE_ROW_LEN;
            bytes[*offset as usize..end as usize]
                .chunks_exact(ARCHIVE_ROW_LEN as usize)
                .map(decode_archive)
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(RoundRobinSeries {
        layout,
        last_update,
        primary,
        archives,
    })
}

/// Write one sample into an open series file
///
/// Returns `false` when the series rejected the sample (too old or not
/// finite). Nothing is written in that case.
pub(super) fn append(
    path: &Path,
    file: &mut File,
    timestamp: i64,
    values: Gauges,
) -> Result<bool, StoreError> {
    let (layout, last_update) = read_header(path, file)?;
    let offsets = Offsets::of(&layout);
    let len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();
    check_len(path, len, offsets.end)?;

    let Some(placement) = layout.place(last_update, timestamp, values) else {
        return Ok(false);
    };

    let io = |e| StoreError::io(path, e);
    let primary_at = offsets.primary_row(placement.primary);
    let current = decode_primary(&read_at::<24>(file, primary_at).map_err(io)?);
    let mut rows = Vec::with_capacity(placement.archives.len());
    for (archive, (position, _)) in placement.archives.iter().enumerate() {
        let at = offsets.archive_row(archive, *position);
        rows.push(decode_archive(&read_at::<32>(file, at).map_err(io)?));
    }

    let primary = placement.apply(values, current, &mut rows);

    for (archive, ((position, _), row)) in placement.archives.iter().zip(&rows).enumerate() {
        write_at(file, offsets.archive_row(archive, *position), &encode_archive(row)).map_err(io)?;
    }
    write_at(file, primary_at, &encode_primary(&primary)).map_err(io)?;
    write_at(file, offsets.last_update, &placement.newest.to_le_bytes()).map_err(io)?;
    Ok(true)
}

fn read_header(path: &Path, file: &mut File) -> Result<(SeriesLayout, Option<i64>), StoreError> {
    let prefix = read_at::<PREFIX_LEN>(file, 0).map_err(|e| truncated_or_io(path, e))?;
    let count = u64_at(&prefix, 24);
    if count > MAX_ARCHIVES {
        return Err(corrupt(path, format!("{count} archives")));
    }

    let mut header = vec![0u8; header_len(count as usize) as usize];
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_exact(&mut header))
        .map_err(|e| truncated_or_io(path, e))?;
    decode_header(path, &header)
}

fn decode_header(path: &Path, bytes: &[u8]) -> Result<(SeriesLayout, Option<i64>), StoreError> {
    if bytes.len() < PREFIX_LEN || &bytes[..8] != MAGIC {
        return Err(corrupt(path, "not a series file"));
    }

    let step = u64_at(bytes, 8);
    let primary_rows = u64_at(bytes, 16);
    let count = u64_at(bytes, 24);
    if step == 0 || primary_rows == 0 || primary_rows > MAX_ROWS || count > MAX_ARCHIVES {
        return Err(corrupt(path, "invalid layout"));
    }
    let header = header_len(count as usize) as usize;
    if bytes.len() < header {
        return Err(corrupt(path, "truncated header"));
    }

    let archives = (0..count as usize)
        .map(|i| ArchiveLayout {
            points_per_row: u64_at(bytes, PREFIX_LEN + i * 16),
            rows: u64_at(bytes, PREFIX_LEN + i * 16 + 8),
        })
        .collect::<Vec<_>>();
    if archives
        .iter()
        .any(|a| a.points_per_row < 2 || a.rows == 0 || a.rows > MAX_ROWS)
    {
        return Err(corrupt(path, "invalid archive layout"));
    }

    let last_update = i64_at(bytes, header - 8);
    Ok((
        SeriesLayout {
            step,
            primary_rows,
            archives,
        },
        (last_update != EMPTY_ROW).then_some(last_update),
    ))
}

fn check_len(path: &Path, found: u64, expected: u64) -> Result<(), StoreError> {
    if found == expected {
        Ok(())
    } else {
        Err(corrupt(
            path,
            format!("expected {expected} bytes, found {found}"),
        ))
    }
}

fn encode_primary(row: &PrimaryRow) -> [u8; 24] {
    let mut bytes = [0u8; 24];
    bytes[0..8].copy_from_slice(&row.slot.to_le_bytes());
    bytes[8..16].copy_from_slice(&row.values[0].to_le_bytes());
    bytes[16..24].copy_from_slice(&row.values[1].to_le_bytes());
    bytes
}

fn decode_primary(bytes: &[u8]) -> PrimaryRow {
    PrimaryRow {
        slot: i64_at(bytes, 0),
        values: [f64_at(bytes, 8), f64_at(bytes, 16)],
    }
}

fn encode_archive(row: &ArchiveRow) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&row.start.to_le_bytes());
    bytes[8..16].copy_from_slice(&row.sum[0].to_le_bytes());
    bytes[16..24].copy_from_slice(&row.sum[1].to_le_bytes());
    bytes[24..32].copy_from_slice(&row.count.to_le_bytes());
    bytes
}

fn decode_archive(bytes: &[u8]) -> ArchiveRow {
    ArchiveRow {
        start: i64_at(bytes, 0),
        sum: [f64_at(bytes, 8), f64_at(bytes, 16)],
        count: u64_at(bytes, 24),
    }
}

fn word(bytes: &[u8], at: usize) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    word
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(word(bytes, at))
}

fn i64_at(bytes: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(word(bytes, at))
}

fn f64_at(bytes: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(word(bytes, at))
}

fn read_at<const N: usize>(file: &mut File, offset: u64) -> std::io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn truncated_or_io(path: &Path, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::UnexpectedEof {
        corrupt(path, "truncated header")
    } else {
        StoreError::io(path, e)
    }
}
