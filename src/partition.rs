/*!
 * In-memory time series of clipped composite rows.
 *
 * A partition is one contiguous, equidistant block of rows (normally a calendar month as it
 * sits in the archive). Partitions are assembled row by row during import, concatenated for
 * multi-month analysis, and resampled into coarser aggregation spans.
 */

use crate::{
    error::{ConfigError, ContinuityError, FormatError},
    grid::CellIds,
    RadRainResult,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/** One contiguous block of an archived time series.

Rows are stored row-major; row i carries the interval labelled `start + i * step`. Cells
follow the id order of the clip selection. Missing intervals hold NaN rows. */
#[derive(Debug, Clone)]
pub struct Partition {
    start: DateTime<Utc>,
    step: Duration,
    cell_ids: CellIds,
    values: Vec<f32>,
}

impl Partition {
    pub fn new(
        start: DateTime<Utc>,
        step: Duration,
        cell_ids: CellIds,
        values: Vec<f32>,
    ) -> RadRainResult<Partition> {
        if step <= Duration::zero() {
            return Err(ConfigError::new("partition step must be positive").into());
        }
        if cell_ids.is_empty() || values.len() % cell_ids.len() != 0 {
            return Err(ConfigError::new(format!(
                "{} values do not tile {} cells",
                values.len(),
                cell_ids.len()
            ))
            .into());
        }
        Ok(Partition {
            start,
            step,
            cell_ids,
            values,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn cell_ids(&self) -> &CellIds {
        &self.cell_ids
    }

    pub fn num_rows(&self) -> usize {
        self.values.len() / self.cell_ids.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// The timestamp labelling row i.
    pub fn timestamp(&self, i: usize) -> DateTime<Utc> {
        self.start + self.step * i as i32
    }

    /// The timestamp one step past the last row, where a directly adjacent partition starts.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.step * self.num_rows() as i32
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let n = self.cell_ids.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// Gather one cell's series across all rows.
    pub fn column(&self, j: usize) -> Vec<f32> {
        let n = self.cell_ids.len();
        self.values[j..].iter().step_by(n).copied().collect()
    }

    /// A copy of the row range [lo, hi).
    pub fn slice_rows(&self, lo: usize, hi: usize) -> Partition {
        let n = self.cell_ids.len();
        Partition {
            start: self.timestamp(lo),
            step: self.step,
            cell_ids: self.cell_ids.clone(),
            values: self.values[lo * n..hi * n].to_vec(),
        }
    }

    /**
     * Stitch adjacent partitions into one.
     *
     * Every partition must share the step and cell selection of the first, and must start
     * exactly where its predecessor ends. Anything else is a continuity error, named after
     * the month of the offending partition.
     */
    pub fn concat(parts: Vec<Partition>) -> RadRainResult<Partition> {
        let mut iter = parts.into_iter();
        let mut combined = iter
            .next()
            .ok_or_else(|| ConfigError::new("cannot concatenate zero partitions"))?;

        for part in iter {
            let expected = combined.end();
            if part.start != expected {
                return Err(ContinuityError::new(
                    part.start.year(),
                    part.start.month(),
                    format!("partition starts at {}, expected {}", part.start, expected),
                )
                .into());
            }
            if part.step != combined.step {
                return Err(ContinuityError::new(
                    part.start.year(),
                    part.start.month(),
                    format!(
                        "partition step {} does not match {}",
                        part.step, combined.step
                    ),
                )
                .into());
            }
            if part.cell_ids != combined.cell_ids {
                return Err(ContinuityError::new(
                    part.start.year(),
                    part.start.month(),
                    "partition cell selection does not match",
                )
                .into());
            }
            combined.values.extend_from_slice(&part.values);
        }

        Ok(combined)
    }

    /**
     * Aggregate the rows into coarser spans.
     *
     * Spans are right-closed and labelled with their exclusive right edge, so a row falling
     * exactly on a span boundary belongs to the span ENDING there. Sums skip NaN cells; a
     * span of nothing but NaN sums to zero.
     */
    pub fn resample(&self, freq: ResampleFreq) -> RadRainResult<AggregatedTable> {
        freq.validate()?;

        let n = self.cell_ids.len();
        let mut labels: Vec<DateTime<Utc>> = Vec::new();
        let mut values: Vec<f32> = Vec::new();

        for i in 0..self.num_rows() {
            let label = freq.span_label(self.timestamp(i));
            if labels.last() != Some(&label) {
                labels.push(label);
                values.extend(std::iter::repeat(0.0f32).take(n));
            }
            let acc_base = (labels.len() - 1) * n;
            for (j, &v) in self.row(i).iter().enumerate() {
                if !v.is_nan() {
                    values[acc_base + j] += v;
                }
            }
        }

        Ok(AggregatedTable {
            labels,
            cell_ids: self.cell_ids.clone(),
            values,
        })
    }
}

/** Aggregation result: one row of cell sums per span label. */
#[derive(Debug, Clone)]
pub struct AggregatedTable {
    pub labels: Vec<DateTime<Utc>>,
    pub cell_ids: CellIds,
    pub values: Vec<f32>,
}

impl AggregatedTable {
    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let n = self.cell_ids.len();
        &self.values[i * n..(i + 1) * n]
    }
}

/** Assembles one partition from decoded rows arriving in timestamp order.

Gaps in the incoming series are filled with NaN rows so that row index arithmetic stays
valid. Out-of-order or off-step timestamps are rejected; the caller records them as per-file
failures and keeps importing. */
pub struct PartitionBuilder {
    step: Duration,
    cell_ids: CellIds,
    start: Option<DateTime<Utc>>,
    values: Vec<f32>,
}

impl PartitionBuilder {
    pub fn new(step: Duration, cell_ids: CellIds) -> PartitionBuilder {
        PartitionBuilder {
            step,
            cell_ids,
            start: None,
            values: Vec::new(),
        }
    }

    fn next_expected(&self) -> Option<DateTime<Utc>> {
        self.start
            .map(|s| s + self.step * (self.values.len() / self.cell_ids.len()) as i32)
    }

    /// Add one decoded row. NaN-fills any gap between the expected and the given timestamp.
    pub fn push(&mut self, timestamp: DateTime<Utc>, row: &[f32]) -> RadRainResult<()> {
        if row.len() != self.cell_ids.len() {
            return Err(ConfigError::new(format!(
                "row holds {} cells, expected {}",
                row.len(),
                self.cell_ids.len()
            ))
            .into());
        }

        if let Some(expected) = self.next_expected() {
            if timestamp < expected {
                return Err(FormatError::new(format!(
                    "timestamp {} arrives before the expected {}",
                    timestamp, expected
                ))
                .into());
            }
            let lead = timestamp - expected;
            let step_secs = self.step.num_seconds();
            if lead.num_seconds() % step_secs != 0 {
                return Err(FormatError::new(format!(
                    "timestamp {} is not aligned to the {}s step",
                    timestamp, step_secs
                ))
                .into());
            }
            let missing = (lead.num_seconds() / step_secs) as usize;
            if missing > 0 {
                log::debug!("filling {} missing intervals before {}", missing, timestamp);
                self.values
                    .extend(std::iter::repeat(f32::NAN).take(missing * self.cell_ids.len()));
            }
        } else {
            self.start = Some(timestamp);
        }

        self.values.extend_from_slice(row);
        Ok(())
    }

    /// Record a row that failed to decode: a NaN row at the given timestamp.
    pub fn push_missing(&mut self, timestamp: DateTime<Utc>) -> RadRainResult<()> {
        let row = vec![f32::NAN; self.cell_ids.len()];
        self.push(timestamp, &row)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none()
    }

    pub fn finish(self) -> RadRainResult<Option<Partition>> {
        match self.start {
            Some(start) => Ok(Some(Partition::new(
                start,
                self.step,
                self.cell_ids,
                self.values,
            )?)),
            None => Ok(None),
        }
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                      Aggregation spans
 *-----------------------------------------------------------------------------------------------*/

/** The aggregation spans a partition can be resampled into.

Fixed-width spans (hours, days) are anchored at the unix epoch. Calendar spans follow the
civil calendar; `Years` ends its span after `end_month`, which expresses hydrological years
(e.g. `end_month: 10` spans November through October). */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleFreq {
    Hours(u32),
    Days(u32),
    Months,
    Years { end_month: u32 },
}

impl ResampleFreq {
    fn validate(&self) -> RadRainResult<()> {
        match *self {
            ResampleFreq::Hours(0) | ResampleFreq::Days(0) => {
                Err(ConfigError::new("aggregation span must be positive").into())
            }
            ResampleFreq::Years { end_month } if !(1..=12).contains(&end_month) => {
                Err(ConfigError::new(format!("invalid end month {}", end_month)).into())
            }
            _ => Ok(()),
        }
    }

    /// The exclusive right edge of the span a timestamp belongs to. Timestamps exactly on
    /// a span boundary label the span ending there.
    pub fn span_label(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            ResampleFreq::Hours(n) => fixed_span_label(ts, i64::from(n) * 3600),
            ResampleFreq::Days(n) => fixed_span_label(ts, i64::from(n) * 86_400),
            ResampleFreq::Months => {
                // Shift back one second so boundary timestamps land in the earlier month.
                let t = ts - Duration::seconds(1);
                let (year, month) = next_month(t.year(), t.month());
                month_start(year, month)
            }
            ResampleFreq::Years { end_month } => {
                let t = ts - Duration::seconds(1);
                let base_year = if t.month() <= end_month {
                    t.year()
                } else {
                    t.year() + 1
                };
                let (year, month) = next_month(base_year, end_month);
                month_start(year, month)
            }
        }
    }
}

fn fixed_span_label(ts: DateTime<Utc>, period_secs: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let rem = secs.rem_euclid(period_secs);
    let label = if rem == 0 { secs } else { secs - rem + period_secs };
    Utc.timestamp_opt(label, 0).unwrap()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Month arithmetic above always yields a valid calendar month.
    let naive = NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
        .unwrap();
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn two_cell_builder(step_minutes: i64) -> PartitionBuilder {
        PartitionBuilder::new(Duration::minutes(step_minutes), CellIds::new(vec![0, 1]))
    }

    #[test]
    fn builder_fills_gaps_with_nan() {
        let mut builder = two_cell_builder(60);
        builder.push(ts(2001, 1, 1, 1, 0), &[1.0, 2.0]).unwrap();
        // Two hours missing.
        builder.push(ts(2001, 1, 1, 4, 0), &[3.0, 4.0]).unwrap();

        let part = builder.finish().unwrap().unwrap();
        assert_eq!(part.num_rows(), 4);
        assert_eq!(part.row(0), &[1.0, 2.0]);
        assert!(part.row(1).iter().all(|v| v.is_nan()));
        assert!(part.row(2).iter().all(|v| v.is_nan()));
        assert_eq!(part.row(3), &[3.0, 4.0]);
        assert_eq!(part.end(), ts(2001, 1, 1, 5, 0));
    }

    #[test]
    fn builder_rejects_disorder_and_misalignment() {
        let mut builder = two_cell_builder(60);
        builder.push(ts(2001, 1, 1, 1, 0), &[1.0, 2.0]).unwrap();
        assert!(builder.push(ts(2001, 1, 1, 0, 0), &[1.0, 2.0]).is_err());
        assert!(builder.push(ts(2001, 1, 1, 2, 30), &[1.0, 2.0]).is_err());
        // The builder survives a rejected push.
        builder.push(ts(2001, 1, 1, 2, 0), &[5.0, 6.0]).unwrap();
        assert_eq!(builder.finish().unwrap().unwrap().num_rows(), 2);
    }

    #[test]
    fn concat_requires_adjacency() {
        let mut a = two_cell_builder(60);
        a.push(ts(2001, 1, 1, 1, 0), &[1.0, 1.0]).unwrap();
        a.push(ts(2001, 1, 1, 2, 0), &[2.0, 2.0]).unwrap();
        let a = a.finish().unwrap().unwrap();

        let mut b = two_cell_builder(60);
        b.push(ts(2001, 1, 1, 3, 0), &[3.0, 3.0]).unwrap();
        let b = b.finish().unwrap().unwrap();

        let joined = Partition::concat(vec![a.clone(), b]).unwrap();
        assert_eq!(joined.num_rows(), 3);
        assert_eq!(joined.column(0), vec![1.0, 2.0, 3.0]);

        let mut gapped = two_cell_builder(60);
        gapped.push(ts(2001, 1, 1, 5, 0), &[9.0, 9.0]).unwrap();
        let gapped = gapped.finish().unwrap().unwrap();
        let err = Partition::concat(vec![a, gapped]).unwrap_err();
        assert!(err.to_string().contains("continuity error"));
    }

    #[test]
    fn boundary_rows_belong_to_the_earlier_span() {
        // A row exactly at midnight belongs to the day ENDING at that midnight.
        let freq = ResampleFreq::Days(1);
        assert_eq!(freq.span_label(ts(2001, 1, 2, 0, 0)), ts(2001, 1, 2, 0, 0));
        assert_eq!(freq.span_label(ts(2001, 1, 2, 0, 5)), ts(2001, 1, 3, 0, 0));

        let monthly = ResampleFreq::Months;
        assert_eq!(monthly.span_label(ts(2001, 2, 1, 0, 0)), ts(2001, 2, 1, 0, 0));
        assert_eq!(monthly.span_label(ts(2001, 2, 1, 0, 5)), ts(2001, 3, 1, 0, 0));
        assert_eq!(monthly.span_label(ts(2001, 12, 15, 6, 0)), ts(2002, 1, 1, 0, 0));
    }

    #[test]
    fn hydrological_year_spans() {
        // End month October: November through October belong to the span labelled the
        // following November 1st.
        let freq = ResampleFreq::Years { end_month: 10 };
        assert_eq!(freq.span_label(ts(2001, 11, 15, 0, 0)), ts(2002, 11, 1, 0, 0));
        assert_eq!(freq.span_label(ts(2002, 4, 1, 12, 0)), ts(2002, 11, 1, 0, 0));
        assert_eq!(freq.span_label(ts(2002, 10, 31, 23, 55)), ts(2002, 11, 1, 0, 0));
        assert_eq!(freq.span_label(ts(2002, 11, 1, 0, 0)), ts(2002, 11, 1, 0, 0));

        let calendar = ResampleFreq::Years { end_month: 12 };
        assert_eq!(calendar.span_label(ts(2002, 6, 1, 0, 0)), ts(2003, 1, 1, 0, 0));
    }

    #[test]
    fn resample_sums_skip_nan() {
        let mut builder = two_cell_builder(60);
        builder.push(ts(2001, 1, 1, 1, 0), &[1.0, f32::NAN]).unwrap();
        builder.push(ts(2001, 1, 1, 2, 0), &[2.0, f32::NAN]).unwrap();
        // Next day.
        builder.push(ts(2001, 1, 2, 1, 0), &[5.0, 1.5]).unwrap();
        let part = builder.finish().unwrap().unwrap();

        let table = part.resample(ResampleFreq::Days(1)).unwrap();
        assert_eq!(table.labels, vec![ts(2001, 1, 2, 0, 0), ts(2001, 1, 3, 0, 0)]);
        assert_eq!(table.row(0)[0], 3.0);
        // All-NaN sums to zero.
        assert_eq!(table.row(0)[1], 0.0);
        assert_eq!(table.row(1), &[5.0, 1.5]);
    }

    #[test]
    fn zero_span_is_rejected() {
        let mut builder = two_cell_builder(60);
        builder.push(ts(2001, 1, 1, 1, 0), &[1.0, 2.0]).unwrap();
        let part = builder.finish().unwrap().unwrap();
        assert!(part.resample(ResampleFreq::Hours(0)).is_err());
        assert!(part
            .resample(ResampleFreq::Years { end_month: 13 })
            .is_err());
    }
}
