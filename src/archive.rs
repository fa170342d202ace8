/*!
 * The on-disk time-series archive.
 *
 * One SQLite file holds one clipped composite series: a `partitions` table with one row per
 * calendar month, plus an `import_failures` ledger naming every source file that could not
 * be decoded. Month rows carry the cell selection and the values as little-endian blobs, so
 * re-importing the same month is byte-for-byte idempotent.
 */

use crate::{
    error::{ContinuityError, FormatError},
    grid::CellIds,
    partition::Partition,
    RadRainResult,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::Connection;
use std::path::Path;

// The blob layout below depends on these.
static_assertions::assert_eq_size!(f32, u32);
static_assertions::assert_eq_size!(u32, [u8; 4]);

/// One source file that failed to import, kept for the post-run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub year: i32,
    pub month: u32,
    pub filename: String,
    pub reason: String,
}

/// A connection to the archive database.
pub struct RainArchive {
    conn: Connection,
}

impl RainArchive {
    /// Open (and if necessary initialize) an archive file.
    pub fn connect<P: AsRef<Path>>(path: P) -> RadRainResult<RainArchive> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(include_str!("archive/create_archive.sql"))?;
        Ok(RainArchive { conn })
    }

    /**
     * Store one month partition, replacing any previous version of the same month.
     *
     * The month key is derived from the partition's start timestamp. Storing the same
     * partition twice leaves identical bytes behind.
     */
    pub fn store(&self, partition: &Partition) -> RadRainResult<()> {
        let start = partition.start();
        let mut stmt = self
            .conn
            .prepare_cached(include_str!("archive/add_partition.sql"))?;
        stmt.execute(rusqlite::params![
            start.year(),
            start.month(),
            start,
            partition.step().num_seconds(),
            partition.num_rows(),
            ids_to_blob(partition.cell_ids()),
            values_to_blob(partition.values()),
        ])?;
        Ok(())
    }

    /// Load one month partition, None when the month was never imported.
    pub fn load(&self, year: i32, month: u32) -> RadRainResult<Option<Partition>> {
        let mut stmt = self
            .conn
            .prepare_cached(include_str!("archive/get_partition.sql"))?;
        let mut rows = stmt.query(rusqlite::params![year, month])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let start: DateTime<Utc> = row.get(0)?;
        let step_seconds: i64 = row.get(1)?;
        let num_rows: usize = row.get(2)?;
        let id_blob: Vec<u8> = row.get(3)?;
        let val_blob: Vec<u8> = row.get(4)?;

        let cell_ids = ids_from_blob(&id_blob);
        let values = values_from_blob(&val_blob);
        if values.len() != num_rows * cell_ids.len() {
            return Err(FormatError::new(format!(
                "partition {}/{} holds {} values, expected {} rows of {} cells",
                year,
                month,
                values.len(),
                num_rows,
                cell_ids.len()
            ))
            .into());
        }

        let partition = Partition::new(start, Duration::seconds(step_seconds), cell_ids, values)?;
        Ok(Some(partition))
    }

    /**
     * Load a contiguous month range (inclusive on both ends) and stitch it into a single
     * partition. A month missing from the archive is a continuity error naming that month.
     */
    pub fn load_range(
        &self,
        from: (i32, u32),
        to: (i32, u32),
    ) -> RadRainResult<Partition> {
        let mut parts = Vec::new();
        for (year, month) in month_range(from, to) {
            match self.load(year, month)? {
                Some(part) => parts.push(part),
                None => {
                    return Err(ContinuityError::new(
                        year,
                        month,
                        "month is missing from the archive",
                    )
                    .into())
                }
            }
        }
        Partition::concat(parts)
    }

    /// Which months the archive holds, in chronological order.
    pub fn months(&self) -> RadRainResult<Vec<(i32, u32)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT year, month FROM partitions ORDER BY year, month")?;
        let months = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(months)
    }

    /// Append one entry to the failure ledger.
    pub fn record_failure(&self, failure: &ImportFailure) -> RadRainResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached(include_str!("archive/add_failure.sql"))?;
        stmt.execute(rusqlite::params![
            failure.year,
            failure.month,
            failure.filename,
            failure.reason,
        ])?;
        Ok(())
    }

    /// The full failure ledger.
    pub fn failures(&self) -> RadRainResult<Vec<ImportFailure>> {
        let mut stmt = self
            .conn
            .prepare(include_str!("archive/list_failures.sql"))?;
        let failures = stmt
            .query_map([], |row| {
                Ok(ImportFailure {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    filename: row.get(2)?,
                    reason: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }
}

/// Every (year, month) from `from` through `to`, both inclusive.
fn month_range(from: (i32, u32), to: (i32, u32)) -> impl Iterator<Item = (i32, u32)> {
    let first = from.0 * 12 + from.1 as i32 - 1;
    let last = to.0 * 12 + to.1 as i32 - 1;
    (first..=last).map(|m| (m.div_euclid(12), (m.rem_euclid(12) + 1) as u32))
}

fn ids_to_blob(ids: &CellIds) -> Vec<u8> {
    ids.as_slice()
        .iter()
        .flat_map(|id| id.to_le_bytes())
        .collect()
}

fn ids_from_blob(blob: &[u8]) -> CellIds {
    let ids = blob
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    CellIds::new(ids)
}

fn values_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn values_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
