/*!
 * Rainfall erosivity analysis.
 *
 * Implements the R-factor calculation after Schwertmann et al. (1990): precipitation is
 * scanned for erosive rain events, each event contributes the product of its kinetic energy
 * density E [kJ/m^2] and its maximum 30-minute intensity I30 [mm/h], and the R-factor is the
 * sum of those products over the analysis period.
 */

use crate::{
    archive::RainArchive,
    error::{ConfigError, ContinuityError},
    grid::CellIds,
    partition::Partition,
    RadRainResult,
};

/*-------------------------------------------------------------------------------------------------
 *                                      Event calculation
 *-----------------------------------------------------------------------------------------------*/

/**
 * R-factor [kJ/m^2 * mm/h] and number of erosive rains for one cell's time series.
 *
 * An erosive rain is a sequence of intervals with less than six hours of pause between
 * them, with a precipitation sum of at least 10 mm or an I30 above 10 mm/h. Events with an
 * I30 above 40 mm/h are treated as outliers and discarded.
 *
 * If the series has more NaN intervals than `max_nan_days` worth of data, both results are
 * NaN and no events are counted.
 */
pub fn calc_r_factor(column: &[f32], freq_min: u32, max_nan_days: f64) -> (f64, f64) {
    let six_hours = (6 * 60 / freq_min) as usize;
    let window = (30 / freq_min) as usize;
    let max_nan_intervals = max_nan_days * f64::from(60 / freq_min) * 24.0;

    let nan_count = column.iter().filter(|v| v.is_nan()).count();
    if nan_count as f64 > max_nan_intervals {
        return (f64::NAN, f64::NAN);
    }

    let mut r = 0.0f64;
    let mut n_rains = 0u32;
    // Intensity conversion factor to mm/h; the validated frequencies all divide 60.
    let to_intensity = f64::from(60 / freq_min);

    let mut i = 0usize;
    while i < column.len() {
        // NaN never compares greater than zero, so gaps neither start nor extend an event.
        if column[i] > 0.0 {
            let start = i;
            let mut rain_pause = 0usize;

            // Scan forward until six hours have passed without rain (or the series ends).
            while rain_pause <= six_hours {
                i += 1;
                if i == column.len() {
                    rain_pause = six_hours + 1;
                } else if column[i] > 0.0 {
                    rain_pause = 0;
                } else {
                    rain_pause += 1;
                }
            }

            // Cut the trailing dry intervals off the event, unless rain fell inside the
            // final six-hour stretch (the series may have ended mid-event).
            let end = i.saturating_sub(six_hours);
            let event: &[f32] = if nansum(&column[end..i]) == 0.0 {
                if end > start {
                    &column[start..end]
                } else {
                    &[]
                }
            } else {
                &column[start..i]
            };

            if !event.is_empty() {
                let i30 = calc_i30(event, freq_min, window);

                if (i30 > 10.0 || nansum(event) >= 10.0) && i30 <= 40.0 {
                    n_rains += 1;

                    let mut e = 0.0f64;
                    for &v in event {
                        if v.is_nan() {
                            continue;
                        }
                        let v = f64::from(v);
                        let intensity = v * to_intensity;
                        if intensity > 0.05 && intensity < 76.2 {
                            e += (11.89 + 8.73 * intensity.log10()) * v * 1e-3;
                        } else if intensity >= 76.2 {
                            e += 28.33 * v * 1e-3;
                        }
                    }
                    r += e * i30;
                }
            }
        }
        i += 1;
    }

    (r, f64::from(n_rains))
}

/// Maximum 30-minute intensity of one event in mm/h. Hourly series are already in mm/h, so
/// the maximum value stands as is; finer series take the highest 30-minute sum, doubled.
fn calc_i30(event: &[f32], freq_min: u32, window: usize) -> f64 {
    if freq_min == 60 {
        return nanmax(event);
    }

    let i30 = if event.len() <= window {
        nansum(event)
    } else {
        let mut best = nansum(&event[..window]);
        for k in 1..=(event.len() - window) {
            let sum = nansum(&event[k..k + window]);
            if sum > best {
                best = sum;
            }
        }
        best
    };

    i30 * 2.0
}

fn nansum(values: &[f32]) -> f64 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| f64::from(v))
        .sum()
}

fn nanmax(values: &[f32]) -> f64 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, &v| {
            if acc.is_nan() || f64::from(v) > acc {
                f64::from(v)
            } else {
                acc
            }
        })
}

/// The series frequency in minutes. Only frequencies the 30-minute window arithmetic can
/// handle are accepted.
fn freq_minutes(partition: &Partition) -> RadRainResult<u32> {
    let secs = partition.step().num_seconds();
    if secs <= 0 || secs % 60 != 0 {
        return Err(ConfigError::new("series step must be a whole number of minutes").into());
    }
    let freq = (secs / 60) as u32;
    if freq != 60 && 30 % freq != 0 {
        return Err(ConfigError::new(format!(
            "unsupported series step of {} minutes",
            freq
        ))
        .into());
    }
    Ok(freq)
}

/*-------------------------------------------------------------------------------------------------
 *                                     Calculation engines
 *-----------------------------------------------------------------------------------------------*/

/// Applies the R-factor calculation to every cell column of a partition.
pub trait ErosivityEngine {
    /// One (R, number of rains) pair per cell, in cell id order.
    fn r_factors(
        &self,
        partition: &Partition,
        max_nan_days: f64,
    ) -> RadRainResult<(Vec<f64>, Vec<f64>)>;
}

/// Processes cell columns one after another on the calling thread.
pub struct SerialEngine;

impl ErosivityEngine for SerialEngine {
    fn r_factors(
        &self,
        partition: &Partition,
        max_nan_days: f64,
    ) -> RadRainResult<(Vec<f64>, Vec<f64>)> {
        let freq = freq_minutes(partition)?;
        let ncell = partition.num_cells();

        let mut r = Vec::with_capacity(ncell);
        let mut n = Vec::with_capacity(ncell);
        for j in 0..ncell {
            let column = partition.column(j);
            let (rj, nj) = calc_r_factor(&column, freq, max_nan_days);
            r.push(rj);
            n.push(nj);
        }
        Ok((r, n))
    }
}

/// Splits the cell columns into contiguous chunks, one worker thread per chunk.
pub struct ThreadPoolEngine {
    workers: usize,
}

impl ThreadPoolEngine {
    pub fn new(workers: usize) -> ThreadPoolEngine {
        ThreadPoolEngine {
            workers: workers.max(1),
        }
    }

    /// One worker per available core.
    pub fn with_all_cores() -> ThreadPoolEngine {
        ThreadPoolEngine::new(num_cpus::get())
    }
}

impl ErosivityEngine for ThreadPoolEngine {
    fn r_factors(
        &self,
        partition: &Partition,
        max_nan_days: f64,
    ) -> RadRainResult<(Vec<f64>, Vec<f64>)> {
        let freq = freq_minutes(partition)?;
        let ncell = partition.num_cells();

        let mut r = vec![0.0f64; ncell];
        let mut n = vec![0.0f64; ncell];
        let workers = self.workers.min(ncell).max(1);
        let chunk = (ncell + workers - 1) / workers;

        std::thread::scope(|scope| {
            let mut base = 0;
            for (r_chunk, n_chunk) in r.chunks_mut(chunk).zip(n.chunks_mut(chunk)) {
                let lo = base;
                base += r_chunk.len();
                scope.spawn(move || {
                    for (k, (rv, nv)) in r_chunk.iter_mut().zip(n_chunk.iter_mut()).enumerate() {
                        let column = partition.column(lo + k);
                        let (rj, nj) = calc_r_factor(&column, freq, max_nan_days);
                        *rv = rj;
                        *nv = nj;
                    }
                });
            }
        });

        Ok((r, n))
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                     Month-boundary carry
 *-----------------------------------------------------------------------------------------------*/

/**
 * Load one month, extended by up to six hours from the adjacent months when an event may
 * cross the month boundary.
 *
 * A neighbor is only pulled in when rain fell within the first (respectively last) six
 * hours of the month itself. A neighbor missing from the archive is tolerated: the month is
 * analyzed without it, with a warning.
 */
pub fn load_month_with_carry(
    archive: &RainArchive,
    year: i32,
    month: u32,
) -> RadRainResult<Option<Partition>> {
    let Some(part) = archive.load(year, month)? else {
        return Ok(None);
    };

    let freq = freq_minutes(&part)?;
    let six_hours = (6 * 60 / freq) as usize;
    let rows = part.num_rows();
    let head_rows = six_hours.min(rows);

    let mut parts = Vec::with_capacity(3);

    if nansum(&part.values()[..head_rows * part.num_cells()]) > 0.0 {
        let (py, pm) = previous_month(year, month);
        match archive.load(py, pm)? {
            Some(prev) if adjoins(&prev, &part) => {
                let lo = prev.num_rows().saturating_sub(six_hours);
                parts.push(prev.slice_rows(lo, prev.num_rows()));
            }
            Some(_) => log::warn!(
                "{}/{} does not adjoin {}/{}, analyzing the month without it",
                py,
                pm,
                year,
                month
            ),
            None => log::warn!(
                "rain near the start of {}/{} but {}/{} is not in the archive",
                year,
                month,
                py,
                pm
            ),
        }
    }

    parts.push(part.clone());

    let tail_lo = rows - head_rows;
    if nansum(&part.values()[tail_lo * part.num_cells()..]) > 0.0 {
        let (ny, nm) = next_month(year, month);
        match archive.load(ny, nm)? {
            Some(next) if adjoins(&part, &next) => {
                let hi = six_hours.min(next.num_rows());
                parts.push(next.slice_rows(0, hi));
            }
            Some(_) => log::warn!(
                "{}/{} does not adjoin {}/{}, analyzing the month without it",
                ny,
                nm,
                year,
                month
            ),
            None => log::warn!(
                "rain near the end of {}/{} but {}/{} is not in the archive",
                year,
                month,
                ny,
                nm
            ),
        }
    }

    Ok(Some(Partition::concat(parts)?))
}

/// Whether `later` picks up exactly where `earlier` stops, with the same step and cells.
/// A neighbor month that fails this (say a partial import) cannot contribute carry rows.
fn adjoins(earlier: &Partition, later: &Partition) -> bool {
    earlier.end() == later.start()
        && earlier.step() == later.step()
        && earlier.cell_ids() == later.cell_ids()
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                      Multi-year drivers
 *-----------------------------------------------------------------------------------------------*/

/** R-factor results over a multi-year period: one row per index entry (month number or
year), one column per cell. */
#[derive(Debug, Clone)]
pub struct RFactorTable {
    pub index: Vec<i32>,
    pub cell_ids: CellIds,
    /// R-factors, row-major.
    pub r: Vec<f64>,
    /// Erosive rain counts, row-major.
    pub n: Vec<f64>,
}

impl RFactorTable {
    pub fn row_r(&self, i: usize) -> &[f64] {
        let n = self.cell_ids.len();
        &self.r[i * n..(i + 1) * n]
    }

    pub fn row_n(&self, i: usize) -> &[f64] {
        let n = self.cell_ids.len();
        &self.n[i * n..(i + 1) * n]
    }
}

fn load_for_analysis(
    archive: &RainArchive,
    year: i32,
    month: u32,
    carry: bool,
) -> RadRainResult<Partition> {
    let part = if carry {
        load_month_with_carry(archive, year, month)?
    } else {
        archive.load(year, month)?
    };
    part.ok_or_else(|| ContinuityError::new(year, month, "month is missing from the archive").into())
}

/**
 * Mean monthly R-factor over a range of years.
 *
 * Returns one row per calendar month (index 1 through 12), each the mean over all years of
 * that month's R-factor. `max_nan_days` applies to each month individually.
 */
pub fn monthly_r_factor(
    archive: &RainArchive,
    engine: &dyn ErosivityEngine,
    year_start: i32,
    year_end: i32,
    max_nan_days: f64,
    carry: bool,
) -> RadRainResult<RFactorTable> {
    let year_end = year_end.max(year_start);
    let n_years = (year_end - year_start + 1) as f64;

    let mut cell_ids: Option<CellIds> = None;
    let mut r_out = Vec::new();
    let mut n_out = Vec::new();

    for month in 1..=12u32 {
        let mut r_sum: Vec<f64> = Vec::new();
        let mut n_sum: Vec<f64> = Vec::new();

        for year in year_start..=year_end {
            let part = load_for_analysis(archive, year, month, carry)?;
            check_cells(&mut cell_ids, &part, year, month)?;
            let (r, n) = engine.r_factors(&part, max_nan_days)?;
            accumulate(&mut r_sum, &r);
            accumulate(&mut n_sum, &n);
        }

        r_out.extend(r_sum.iter().map(|v| v / n_years));
        n_out.extend(n_sum.iter().map(|v| v / n_years));
    }

    Ok(RFactorTable {
        index: (1..=12).collect(),
        cell_ids: cell_ids.ok_or_else(|| ConfigError::new("no data in the analysis period"))?,
        r: r_out,
        n: n_out,
    })
}

/**
 * Annual R-factor for each year of a range.
 *
 * Each year is processed month by month to bound memory, with `max_nan_days / 12` applied
 * to every month. A month that exceeds its NaN budget turns the whole year NaN.
 */
pub fn annual_r_factor(
    archive: &RainArchive,
    engine: &dyn ErosivityEngine,
    year_start: i32,
    year_end: i32,
    max_nan_days: f64,
    carry: bool,
) -> RadRainResult<RFactorTable> {
    let year_end = year_end.max(year_start);
    let max_nan_month = max_nan_days / 12.0;

    let mut cell_ids: Option<CellIds> = None;
    let mut r_out = Vec::new();
    let mut n_out = Vec::new();

    for year in year_start..=year_end {
        let mut r_year: Vec<f64> = Vec::new();
        let mut n_year: Vec<f64> = Vec::new();

        for month in 1..=12u32 {
            let part = load_for_analysis(archive, year, month, carry)?;
            check_cells(&mut cell_ids, &part, year, month)?;
            let (r, n) = engine.r_factors(&part, max_nan_month)?;
            accumulate(&mut r_year, &r);
            accumulate(&mut n_year, &n);
        }

        r_out.extend_from_slice(&r_year);
        n_out.extend_from_slice(&n_year);
    }

    Ok(RFactorTable {
        index: (year_start..=year_end).collect(),
        cell_ids: cell_ids.ok_or_else(|| ConfigError::new("no data in the analysis period"))?,
        r: r_out,
        n: n_out,
    })
}

fn check_cells(
    expected: &mut Option<CellIds>,
    part: &Partition,
    year: i32,
    month: u32,
) -> RadRainResult<()> {
    match expected {
        Some(ids) if ids != part.cell_ids() => Err(ContinuityError::new(
            year,
            month,
            "cell selection differs from the rest of the archive",
        )
        .into()),
        Some(_) => Ok(()),
        None => {
            *expected = Some(part.cell_ids().clone());
            Ok(())
        }
    }
}

fn accumulate(acc: &mut Vec<f64>, values: &[f64]) {
    if acc.is_empty() {
        acc.extend_from_slice(values);
    } else {
        for (a, v) in acc.iter_mut().zip(values) {
            // NaN from a failed month poisons the whole accumulation on purpose.
            *a += v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RainArchive;
    use chrono::{Duration, TimeZone, Utc};

    /// The R contribution of a single event at 60-minute frequency.
    fn expected_r_hourly(event: &[f64]) -> f64 {
        let i30 = event.iter().cloned().fold(f64::NAN, f64::max);
        let e: f64 = event
            .iter()
            .map(|&v| (11.89 + 8.73 * v.log10()) * v * 1e-3)
            .sum();
        e * i30
    }

    #[test]
    fn dry_series_has_no_erosivity() {
        let column = vec![0.0f32; 288];
        assert_eq!(calc_r_factor(&column, 5, 10.0), (0.0, 0.0));
    }

    #[test]
    fn excessive_nan_yields_nan() {
        // 5-minute data: one day of allowed NaN is 288 intervals. Even a clearly erosive
        // burst in the reliable part of the series must not produce a partial result.
        let mut column = vec![0.0f32; 1000];
        for v in column.iter_mut().take(289) {
            *v = f32::NAN;
        }
        for v in column[500..504].iter_mut() {
            *v = 3.0;
        }
        let (r, n) = calc_r_factor(&column, 5, 1.0);
        assert!(r.is_nan());
        assert!(n.is_nan());

        // One fewer NaN stays under the budget and the burst counts.
        column[288] = 0.0;
        let (r, n) = calc_r_factor(&column, 5, 1.0);
        assert_eq!(n, 1.0);
        assert!(r > 0.0);
    }

    #[test]
    fn short_burst_is_one_erosive_event() {
        // 12 mm in 20 minutes at 5-minute resolution.
        let mut column = vec![0.0f32; 288];
        for v in column[100..104].iter_mut() {
            *v = 3.0;
        }
        let (r, n) = calc_r_factor(&column, 5, 10.0);
        assert_eq!(n, 1.0);

        // Event shorter than 30 minutes: I30 is the doubled sum, 24 mm/h. Each interval
        // runs at 36 mm/h, inside the logarithmic energy branch.
        let e = 4.0 * (11.89 + 8.73 * 36.0f64.log10()) * 3.0 * 1e-3;
        assert!((r - e * 24.0).abs() < 1e-9);

        // The same burst split by an eight-hour dry gap is two events.
        let mut column = vec![0.0f32; 576];
        for v in column[100..102].iter_mut() {
            *v = 6.0;
        }
        for v in column[198..200].iter_mut() {
            *v = 6.0;
        }
        let (_, n) = calc_r_factor(&column, 5, 10.0);
        assert_eq!(n, 2.0);
    }

    #[test]
    fn six_hour_pause_splits_events() {
        let mut column = vec![0.0f32; 48];
        column[2] = 12.0;
        // Exactly six hours of pause keeps one event, more than six hours splits.
        column[9] = 12.0;
        let (_, n) = calc_r_factor(&column, 60, 10.0);
        assert_eq!(n, 1.0);

        let mut column = vec![0.0f32; 48];
        column[2] = 12.0;
        column[10] = 12.0;
        let (_, n) = calc_r_factor(&column, 60, 10.0);
        assert_eq!(n, 2.0);
    }

    #[test]
    fn trailing_zeros_are_cut_from_the_event() {
        // The event ends at index 1; the rain at index 7 is within six hours, so the whole
        // stretch stays one event and the trailing rain is included.
        let mut joined = vec![0.0f32; 8];
        joined[0] = 5.0;
        joined[1] = 6.0;
        joined[7] = 3.0;
        let (r_joined, n) = calc_r_factor(&joined, 60, 10.0);
        assert_eq!(n, 1.0);
        assert!((r_joined - expected_r_hourly(&[5.0, 6.0, 3.0])).abs() < 1e-9);

        // Stretched past six hours the trailing rain becomes its own (non-erosive) event
        // and the first event is truncated to its rainy intervals.
        let mut split = vec![0.0f32; 10];
        split[0] = 5.0;
        split[1] = 6.0;
        split[9] = 3.0;
        let (r_split, n) = calc_r_factor(&split, 60, 10.0);
        assert_eq!(n, 1.0);
        assert!((r_split - expected_r_hourly(&[5.0, 6.0])).abs() < 1e-9);
    }

    #[test]
    fn i30_outliers_are_discarded() {
        // A single hour at 45 mm/h exceeds the 40 mm/h outlier threshold.
        let mut column = vec![0.0f32; 24];
        column[3] = 45.0;
        let (r, n) = calc_r_factor(&column, 60, 10.0);
        assert_eq!((r, n), (0.0, 0.0));
    }

    #[test]
    fn high_intensity_energy_branch() {
        // 7 mm in 5 minutes is 84 mm/h, beyond the logarithmic formula's validity.
        let mut column = vec![0.0f32; 288];
        column[50] = 7.0;
        column[51] = 7.0;
        let (r, n) = calc_r_factor(&column, 5, 10.0);
        assert_eq!(n, 1.0);
        let e = 2.0 * 28.33 * 7.0 * 1e-3;
        let i30 = 28.0; // doubled 14 mm sum
        assert!((r - e * i30).abs() < 1e-9);
    }

    #[test]
    fn engines_agree() {
        let start = Utc.with_ymd_and_hms(2001, 5, 1, 1, 0, 0).unwrap();
        let ncell = 7;
        let rows = 24 * 31;
        let mut values = vec![0.0f32; rows * ncell];
        // A deterministic scatter of rain and gaps.
        for (idx, v) in values.iter_mut().enumerate() {
            match idx % 97 {
                0 => *v = 12.0,
                13 => *v = 3.5,
                41 => *v = f32::NAN,
                _ => {}
            }
        }
        let part = Partition::new(
            start,
            Duration::hours(1),
            CellIds::new((0..ncell as u32).collect()),
            values,
        )
        .unwrap();

        let (r_serial, n_serial) = SerialEngine.r_factors(&part, 10.0).unwrap();
        let (r_pool, n_pool) = ThreadPoolEngine::new(3).r_factors(&part, 10.0).unwrap();

        assert_eq!(r_serial, r_pool);
        assert_eq!(n_serial, n_pool);
    }

    fn store_month(archive: &RainArchive, year: i32, month: u32, bursts: &[(usize, f32)]) {
        let start = Utc.with_ymd_and_hms(year, month, 1, 1, 0, 0).unwrap();
        let next = super::next_month(year, month);
        let end = Utc.with_ymd_and_hms(next.0, next.1, 1, 0, 0, 0).unwrap();
        let rows = ((end - start).num_hours() + 1) as usize;
        let mut values = vec![0.0f32; rows];
        for &(row, v) in bursts {
            values[row] = v;
        }
        let part = Partition::new(start, Duration::hours(1), CellIds::new(vec![0]), values)
            .unwrap();
        archive.store(&part).unwrap();
    }

    #[test]
    fn annual_and_monthly_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();

        // Two years of hourly data, one cell. 2001 has an erosive event in June,
        // 2002 has one in June and one in August.
        for year in [2001, 2002] {
            for month in 1..=12u32 {
                let bursts: &[(usize, f32)] = match (year, month) {
                    (_, 6) => &[(200, 12.0)],
                    (2002, 8) => &[(300, 15.0)],
                    _ => &[],
                };
                store_month(&archive, year, month, bursts);
            }
        }

        let engine = SerialEngine;
        let annual = annual_r_factor(&archive, &engine, 2001, 2002, 24.0, false).unwrap();
        assert_eq!(annual.index, vec![2001, 2002]);
        assert_eq!(annual.row_n(0), &[1.0]);
        assert_eq!(annual.row_n(1), &[2.0]);
        let r_12 = expected_r_hourly(&[12.0]);
        let r_15 = expected_r_hourly(&[15.0]);
        assert!((annual.row_r(0)[0] - r_12).abs() < 1e-9);
        assert!((annual.row_r(1)[0] - (r_12 + r_15)).abs() < 1e-9);

        let monthly = monthly_r_factor(&archive, &engine, 2001, 2002, 2.0, false).unwrap();
        assert_eq!(monthly.index, (1..=12).collect::<Vec<_>>());
        // June: an event in both years, mean count 1. August: one event in one of two years.
        assert_eq!(monthly.row_n(5), &[1.0]);
        assert_eq!(monthly.row_n(7), &[0.5]);
        assert!((monthly.row_r(5)[0] - r_12).abs() < 1e-9);
        assert!((monthly.row_r(7)[0] - r_15 / 2.0).abs() < 1e-9);
        assert_eq!(monthly.row_n(0), &[0.0]);
    }

    #[test]
    fn carry_pulls_six_hours_from_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();

        // Rain in the last hours of May and the first hour of June.
        store_month(&archive, 2001, 5, &[(742, 8.0)]);
        store_month(&archive, 2001, 6, &[(0, 8.0)]);

        let june = load_month_with_carry(&archive, 2001, 6).unwrap().unwrap();
        let june_alone = archive.load(2001, 6).unwrap().unwrap();
        // Six hours of May prepended.
        assert_eq!(june.num_rows(), june_alone.num_rows() + 6);
        assert_eq!(
            june.start(),
            june_alone.start() - Duration::hours(6)
        );

        // The boundary-crossing rain is one event, not two.
        let (_, n) = SerialEngine.r_factors(&june, 24.0).unwrap();
        assert_eq!(n, vec![1.0]);

        // A missing neighbor is tolerated.
        let dir2 = tempfile::tempdir().unwrap();
        let lonely = RainArchive::connect(dir2.path().join("rain.sqlite")).unwrap();
        store_month(&lonely, 2001, 6, &[(0, 8.0), (719, 8.0)]);
        let june = load_month_with_carry(&lonely, 2001, 6).unwrap().unwrap();
        assert_eq!(june.num_rows(), 720);
    }

    #[test]
    fn short_neighbor_is_treated_like_a_missing_one() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RainArchive::connect(dir.path().join("rain.sqlite")).unwrap();

        // A partially imported May that stops two days short of June.
        let start = Utc.with_ymd_and_hms(2001, 5, 1, 1, 0, 0).unwrap();
        let mut values = vec![0.0f32; 29 * 24];
        values[29 * 24 - 1] = 8.0;
        let may = Partition::new(start, Duration::hours(1), CellIds::new(vec![0]), values)
            .unwrap();
        archive.store(&may).unwrap();
        store_month(&archive, 2001, 6, &[(0, 8.0)]);

        let june = load_month_with_carry(&archive, 2001, 6).unwrap().unwrap();
        assert_eq!(june.num_rows(), 720);
        assert_eq!(
            june.start(),
            Utc.with_ymd_and_hms(2001, 6, 1, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn odd_step_is_rejected() {
        let start = Utc.with_ymd_and_hms(2001, 5, 1, 0, 7, 0).unwrap();
        let part = Partition::new(
            start,
            Duration::minutes(7),
            CellIds::new(vec![0]),
            vec![0.0; 10],
        )
        .unwrap();
        assert!(SerialEngine.r_factors(&part, 10.0).is_err());
    }
}
