/*!
 * Heavy rainfall analysis: select every interval in which a precipitation threshold is
 * exceeded over a minimum area, and count those exceedances per season.
 */

use crate::{
    archive::RainArchive,
    error::{ConfigError, ContinuityError},
    grid::CellIds,
    partition::ResampleFreq,
    RadRainResult,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/** The season a heavy rainfall scan covers.

Every season maps to a list of calendar months to load and to the aggregation span its
interval counts are reported in: whole years for the year-spanning seasons, calendar months
for a single month. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Year,
    MayToOctober,
    NovemberToApril,
    JanuaryDecember,
    Month(u32),
}

impl Season {
    /// Parse a season token. Unknown tokens fail instead of silently scanning nothing.
    pub fn parse(token: &str) -> RadRainResult<Season> {
        let season = match token {
            "Year" => Season::Year,
            "May - October" => Season::MayToOctober,
            "November - April" => Season::NovemberToApril,
            "January/December" => Season::JanuaryDecember,
            "Jan" => Season::Month(1),
            "Feb" => Season::Month(2),
            "Mar" => Season::Month(3),
            "Apr" => Season::Month(4),
            "May" => Season::Month(5),
            "Jun" => Season::Month(6),
            "Jul" => Season::Month(7),
            "Aug" => Season::Month(8),
            "Sep" => Season::Month(9),
            "Oct" => Season::Month(10),
            "Nov" => Season::Month(11),
            "Dec" => Season::Month(12),
            _ => return Err(ConfigError::new(format!("unknown season {:?}", token)).into()),
        };
        Ok(season)
    }

    /// The calendar months the season covers, in the order they are scanned within a year.
    pub fn months(&self) -> Vec<u32> {
        match *self {
            Season::Year => (1..=12).collect(),
            Season::MayToOctober => (5..=10).collect(),
            Season::NovemberToApril => vec![1, 2, 3, 4, 11, 12],
            Season::JanuaryDecember => vec![1, 12],
            Season::Month(m) => vec![m],
        }
    }

    /// The aggregation span interval counts are reported in. Year-spanning seasons report
    /// one row per (hydrological) year, single months one row per calendar month.
    pub fn count_span(&self) -> ResampleFreq {
        match *self {
            Season::Year => ResampleFreq::Years { end_month: 12 },
            Season::MayToOctober => ResampleFreq::Years { end_month: 10 },
            Season::NovemberToApril => ResampleFreq::Years { end_month: 4 },
            Season::JanuaryDecember => ResampleFreq::Years { end_month: 1 },
            Season::Month(_) => ResampleFreq::Months,
        }
    }
}

/// One interval that met the exceedance criteria, with its full cell row.
#[derive(Debug, Clone)]
pub struct HeavyRainfall {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f32>,
}

/// Exceedance counts per aggregation span: one row of per-cell counts per span label.
#[derive(Debug, Clone)]
pub struct IntervalCounts {
    pub labels: Vec<DateTime<Utc>>,
    pub cell_ids: CellIds,
    pub counts: Vec<u32>,
}

impl IntervalCounts {
    pub fn row(&self, i: usize) -> &[u32] {
        let n = self.cell_ids.len();
        &self.counts[i * n..(i + 1) * n]
    }
}

/// True when strictly more than `min_area` cells reach the threshold. NaN cells never count.
fn exceeding(row: &[f32], threshold: f32, min_area: usize) -> bool {
    row.iter().filter(|&&v| v >= threshold).count() > min_area
}

/**
 * Collect every interval of the season in which at least `min_area + 1` cells reach
 * `threshold` mm, over the year range (both ends inclusive).
 */
pub fn find_heavy_rainfalls(
    archive: &RainArchive,
    year_start: i32,
    year_end: i32,
    threshold: f32,
    min_area: usize,
    season: Season,
) -> RadRainResult<Vec<HeavyRainfall>> {
    let year_end = year_end.max(year_start);
    let mut hits = Vec::new();

    for year in year_start..=year_end {
        for month in season.months() {
            let part = archive.load(year, month)?.ok_or_else(|| {
                ContinuityError::new(year, month, "month is missing from the archive")
            })?;
            for i in 0..part.num_rows() {
                let row = part.row(i);
                if exceeding(row, threshold, min_area) {
                    hits.push(HeavyRainfall {
                        timestamp: part.timestamp(i),
                        values: row.to_vec(),
                    });
                }
            }
        }
    }

    Ok(hits)
}

/**
 * Count, per cell, how often the threshold was reached during heavy rainfall intervals,
 * aggregated into the season's span.
 *
 * Only intervals meeting the area criterion are counted at all; within those, each cell
 * contributes 1 per interval in which it reached the threshold itself. Spans without any
 * qualifying interval are omitted.
 */
pub fn count_heavy_rainfall_intervals(
    archive: &RainArchive,
    year_start: i32,
    year_end: i32,
    threshold: f32,
    min_area: usize,
    season: Season,
) -> RadRainResult<IntervalCounts> {
    let year_end = year_end.max(year_start);
    let span = season.count_span();

    let mut cell_ids: Option<CellIds> = None;
    let mut spans: BTreeMap<DateTime<Utc>, Vec<u32>> = BTreeMap::new();

    for year in year_start..=year_end {
        for month in season.months() {
            let part = archive.load(year, month)?.ok_or_else(|| {
                ContinuityError::new(year, month, "month is missing from the archive")
            })?;

            match &cell_ids {
                Some(ids) if ids != part.cell_ids() => {
                    return Err(ContinuityError::new(
                        year,
                        month,
                        "cell selection differs from the rest of the archive",
                    )
                    .into())
                }
                Some(_) => {}
                None => cell_ids = Some(part.cell_ids().clone()),
            }

            let ncell = part.num_cells();
            for i in 0..part.num_rows() {
                let row = part.row(i);
                if !exceeding(row, threshold, min_area) {
                    continue;
                }
                let label = span.span_label(part.timestamp(i));
                let counts = spans.entry(label).or_insert_with(|| vec![0u32; ncell]);
                for (c, &v) in counts.iter_mut().zip(row) {
                    if v >= threshold {
                        *c += 1;
                    }
                }
            }
        }
    }

    let cell_ids =
        cell_ids.ok_or_else(|| ConfigError::new("no data in the analysis period"))?;
    let mut labels = Vec::with_capacity(spans.len());
    let mut counts = Vec::with_capacity(spans.len() * cell_ids.len());
    for (label, row) in spans {
        labels.push(label);
        counts.extend_from_slice(&row);
    }

    Ok(IntervalCounts {
        labels,
        cell_ids,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn season_tokens() {
        assert_eq!(Season::parse("Year").unwrap(), Season::Year);
        assert_eq!(Season::parse("May - October").unwrap(), Season::MayToOctober);
        assert_eq!(Season::parse("Jul").unwrap(), Season::Month(7));
        assert!(Season::parse("Summer").is_err());

        assert_eq!(Season::NovemberToApril.months(), vec![1, 2, 3, 4, 11, 12]);
        assert_eq!(
            Season::MayToOctober.count_span(),
            ResampleFreq::Years { end_month: 10 }
        );
    }

    #[test]
    fn area_criterion_is_strict() {
        // One cell at exactly the threshold: enough for min_area 0, not for min_area 1.
        let row = [10.0f32, 2.0, f32::NAN];
        assert!(exceeding(&row, 10.0, 0));
        assert!(!exceeding(&row, 10.0, 1));
        // NaN cells never satisfy the threshold.
        assert!(!exceeding(&[f32::NAN, f32::NAN], 10.0, 0));
    }

    fn store_month(archive: &RainArchive, year: i32, month: u32, rows: &[(usize, [f32; 2])]) {
        let start = Utc.with_ymd_and_hms(year, month, 1, 1, 0, 0).unwrap();
        let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = Utc.with_ymd_and_hms(ny, nm, 1, 0, 0, 0).unwrap();
        let n_rows = ((end - start).num_hours() + 1) as usize;
        let mut values = vec![0.0f32; n_rows * 2];
        for &(row, cells) in rows {
            values[row * 2..row * 2 + 2].copy_from_slice(&cells);
        }
        let part = Partition::new(
            start,
            Duration::hours(1),
            CellIds::new(vec![3, 9]),
            values,
        )
        .unwrap();
        archive.store(&part).unwrap();
    }

    #[test]
    fn finds_and_counts_exceedances() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();

        // July 2001: one interval where both cells exceed, one where only cell 0 does.
        store_month(
            &archive,
            2001,
            7,
            &[(10, [12.0, 11.0]), (200, [15.0, 2.0])],
        );
        // July 2002: nothing.
        store_month(&archive, 2002, 7, &[]);

        let hits =
            find_heavy_rainfalls(&archive, 2001, 2002, 10.0, 0, Season::Month(7)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            hits[0].timestamp,
            Utc.with_ymd_and_hms(2001, 7, 1, 11, 0, 0).unwrap()
        );
        assert_eq!(hits[1].values, vec![15.0, 2.0]);

        // Requiring more than one cell drops the single-cell interval.
        let hits =
            find_heavy_rainfalls(&archive, 2001, 2002, 10.0, 1, Season::Month(7)).unwrap();
        assert_eq!(hits.len(), 1);

        // Counting: cell 0 reached the threshold twice, cell 1 once. Spans without any
        // qualifying interval (July 2002) are omitted.
        let counts =
            count_heavy_rainfall_intervals(&archive, 2001, 2002, 10.0, 0, Season::Month(7))
                .unwrap();
        assert_eq!(
            counts.labels,
            vec![Utc.with_ymd_and_hms(2001, 8, 1, 0, 0, 0).unwrap()]
        );
        assert_eq!(counts.row(0), &[2, 1]);
    }

    #[test]
    fn hydrological_season_counts_group_across_new_year() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();

        // November - April season needs months 1-4, 11, 12 of each scanned year.
        for year in [2001, 2002] {
            for month in [1u32, 2, 3, 4, 11, 12] {
                let rows: &[(usize, [f32; 2])] = match (year, month) {
                    (2001, 12) => &[(5, [20.0, 20.0])],
                    (2002, 1) => &[(5, [20.0, 0.0])],
                    _ => &[],
                };
                store_month(&archive, year, month, rows);
            }
        }

        let counts = count_heavy_rainfall_intervals(
            &archive,
            2001,
            2002,
            10.0,
            0,
            Season::NovemberToApril,
        )
        .unwrap();

        // December 2001 and January 2002 fall into the same November-April span, which is
        // labelled with its exclusive right edge, May 1st 2002.
        assert_eq!(
            counts.labels,
            vec![Utc.with_ymd_and_hms(2002, 5, 1, 0, 0, 0).unwrap()]
        );
        assert_eq!(counts.row(0), &[2, 1]);
    }

    #[test]
    fn missing_month_is_a_continuity_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();
        store_month(&archive, 2001, 5, &[]);

        let err = find_heavy_rainfalls(&archive, 2001, 2001, 10.0, 0, Season::MayToOctober)
            .unwrap_err();
        assert!(err.to_string().contains("2001/6"));
    }
}
