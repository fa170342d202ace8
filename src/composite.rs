/*!
 * Decoder for the quantitative composite format of the German Weather Service (DWD).
 *
 * The format was established in the course of the RADOLAN project and covers many product
 * types (RW, YW, RY, RX, RZ, PG, ...). A file is a short ASCII header terminated by an ETX
 * byte, followed by a binary payload whose encoding depends on the product type.
 */

use crate::{
    error::FormatError,
    grid::PrecipGrid,
    product::{Encoding, Product},
    RadRainResult,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use flate2::read::GzDecoder;
use rustc_hash::FxHashMap;
use std::{io::Read, path::Path};

/// End of the ASCII header section.
const ETX: u8 = 0x03;
/// End of the run-length coded payload.
const EOT: u8 = 0x04;
const LF: u8 = 0x0A;

/// The header token vocabulary of the composite format.
const TOKENS: [&str; 15] = [
    "BY", "VS", "SW", "PR", "INT", "GP", "MS", "LV", "CS", "MX", "BG", "ST", "VV", "MF", "VR",
];

/**
 * Metadata parsed from the ASCII header of one composite file.
 *
 * Token absence is not an error, optional fields are simply unset.
 */
#[derive(Debug, Clone)]
pub struct CompositeMeta {
    /// Two letter product code, e.g. "RW" or "YW".
    pub product: String,
    /// Composite timestamp (UTC), assembled from the header date fields.
    pub datetime: DateTime<Utc>,
    /// Radar location id, "10000" for a true national composite.
    pub radar_id: String,
    /// Exact byte count of the binary payload (BY token minus header length minus one).
    pub data_size: usize,
    /// Multiplicative precision factor from the PR token.
    pub precision: Option<f64>,
    /// Interval length in seconds from the INT token.
    pub interval_seconds: Option<u32>,
    /// Grid rows (GP or BG token).
    pub nrow: Option<usize>,
    /// Grid columns (GP or BG token).
    pub ncol: Option<usize>,
    /// Maximum range indicator (VS token).
    pub max_range: Option<&'static str>,
    /// RADOLAN software version (SW token).
    pub version: Option<String>,
    /// Level count (LV token).
    pub n_level: Option<usize>,
    /// Level values (LV token).
    pub levels: Vec<f64>,
    /// Contributing radar site codes (MS token).
    pub radar_locations: Vec<String>,
    /// Contributing radar day strings (ST token).
    pub radar_days: Vec<String>,
    /// Vertical indicator (CS token).
    pub indicator: Option<&'static str>,
    /// Image count (MX token).
    pub image_count: Option<u32>,
    /// Forecast prediction time in minutes (VV token).
    pub prediction_time: Option<i32>,
    /// Module flag (MF token).
    pub module_flag: Option<i32>,
    /// Reanalysis version string (VR token).
    pub reanalysis_version: Option<String>,
    /// Flat positions flagged as secondary measurements (bit 13 of 16-bit payloads).
    pub secondary: Vec<usize>,
    /// Flat positions flagged as clutter (bit 16 of 16-bit payloads, value 249 of byte payloads).
    pub clutter_mask: Vec<usize>,
}

/** One decoded composite: the precipitation grid plus the header metadata.

Grid values are in physical units (the precision factor is already applied), missing cells
carry the NaN sentinel. Row 0 of the grid is the geographic south, matching the payload
order of the format. */
#[derive(Debug, Clone)]
pub struct Composite {
    pub grid: PrecipGrid,
    pub meta: CompositeMeta,
}

impl Composite {
    /// Read and decode one composite file, transparently unwrapping gzip.
    pub fn open<P: AsRef<Path>>(path: P) -> RadRainResult<Composite> {
        let raw = std::fs::read(path.as_ref())?;
        let bytes = maybe_gunzip(raw)?;
        Self::decode(&bytes)
    }

    /// Decode one composite from an in-memory byte buffer.
    pub fn decode(buf: &[u8]) -> RadRainResult<Composite> {
        let etx = buf
            .iter()
            .position(|&b| b == ETX)
            .ok_or_else(|| FormatError::new("missing ETX"))?;

        // The token scan below slices the header at byte offsets, so it must be ASCII, not
        // merely valid UTF-8.
        let header_bytes = &buf[..etx];
        if !header_bytes.is_ascii() {
            return Err(FormatError::new("header is not ASCII").into());
        }
        let header = std::str::from_utf8(header_bytes)
            .map_err(|_| FormatError::new("header is not ASCII"))?;

        let mut meta = parse_header(header)?;

        if meta.radar_id != "10000" {
            log::warn!(
                "radar id {} is not the composite id 10000, results may not be valid",
                meta.radar_id
            );
        }

        let payload = &buf[etx + 1..];
        if payload.len() < meta.data_size {
            return Err(FormatError::new(format!(
                "truncated payload: expected {} bytes, found {}",
                meta.data_size,
                payload.len()
            ))
            .into());
        }
        let payload = &payload[..meta.data_size];

        let nrow = meta
            .nrow
            .ok_or_else(|| FormatError::new("missing grid dimensions (GP or BG token)"))?;
        let ncol = meta
            .ncol
            .ok_or_else(|| FormatError::new("missing grid dimensions (GP or BG token)"))?;

        let values = match Product::encoding_for_code(&meta.product) {
            Encoding::Byte => decode_byte_payload(payload, &mut meta),
            Encoding::RunLength => decode_runlength_payload(payload, ncol)?,
            Encoding::Bits16 => decode_bits16_payload(payload, &mut meta)?,
        };

        let grid = PrecipGrid::new(nrow, ncol, values)?;

        Ok(Composite { grid, meta })
    }
}

/// Unwrap a gzip stream if the buffer starts with the gzip magic, otherwise pass it through.
fn maybe_gunzip(raw: Vec<u8>) -> RadRainResult<Vec<u8>> {
    if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut out = Vec::with_capacity(raw.len() * 4);
        GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(raw)
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                        Header parsing
 *-----------------------------------------------------------------------------------------------*/

/// Find each known token in the header and bound its value span by the start of the nearest
/// subsequent token, or the header end.
fn token_spans(header: &str) -> FxHashMap<&'static str, (usize, usize)> {
    let mut positions: FxHashMap<&'static str, usize> = FxHashMap::default();
    for token in TOKENS {
        if let Some(pos) = header.rfind(token) {
            positions.insert(token, pos);
        }
    }

    let mut spans = FxHashMap::default();
    for (&token, &pos) in positions.iter() {
        let start = pos + token.len();
        let stop = positions
            .values()
            .copied()
            .filter(|&other| other > pos)
            .min()
            .unwrap_or_else(|| header.len());
        spans.insert(token, (start, stop.max(start)));
    }

    spans
}

fn parse_header(header: &str) -> RadRainResult<CompositeMeta> {
    if header.len() < 17 {
        return Err(FormatError::new("header shorter than the fixed preamble").into());
    }

    let product = header[0..2].to_string();
    let datetime = parse_header_datetime(header)?;
    let radar_id = header[8..13].to_string();

    let mut meta = CompositeMeta {
        product,
        datetime,
        radar_id,
        data_size: 0,
        precision: None,
        interval_seconds: None,
        nrow: None,
        ncol: None,
        max_range: None,
        version: None,
        n_level: None,
        levels: Vec::new(),
        radar_locations: Vec::new(),
        radar_days: Vec::new(),
        indicator: None,
        image_count: None,
        prediction_time: None,
        module_flag: None,
        reanalysis_version: None,
        secondary: Vec::new(),
        clutter_mask: Vec::new(),
    };

    let spans = token_spans(header);
    let value = |token: &str| spans.get(token).map(|&(start, stop)| &header[start..stop]);

    if let Some(v) = value("BY") {
        let total: usize = parse_trimmed(v, "BY")?;
        meta.data_size = total
            .checked_sub(header.len() + 1)
            .ok_or_else(|| FormatError::new("BY token smaller than header length"))?;
    } else {
        return Err(FormatError::new("missing BY token").into());
    }

    if let Some(v) = value("VS") {
        let code: i64 = parse_trimmed(v, "VS")?;
        meta.max_range = Some(match code {
            0 => "100 km and 128 km (mixed)",
            2 => "128 km",
            3 => "150 km",
            _ => "100 km",
        });
    }

    if let Some(v) = value("SW") {
        meta.version = Some(v.trim().to_string());
    }

    if let Some(v) = value("PR") {
        // The PR value is a precision factor encoded with an implied leading "1",
        // e.g. " E-01" reads as 1E-01 = 0.1. This is not a literal decimal parse.
        let text = format!("1{}", v.trim());
        let precision: f64 = text
            .parse()
            .map_err(|_| FormatError::new(format!("unparseable PR token {:?}", v)))?;
        meta.precision = Some(precision);
    }

    if let Some(v) = value("INT") {
        meta.interval_seconds = Some(parse_interval(v)?);
    }

    if let Some(v) = value("GP") {
        let mut dims = v.split('x');
        let nrow = dims
            .next()
            .ok_or_else(|| FormatError::new("malformed GP token"))?;
        let ncol = dims
            .next()
            .ok_or_else(|| FormatError::new("malformed GP token"))?;
        meta.nrow = Some(parse_trimmed(nrow, "GP")?);
        meta.ncol = Some(parse_trimmed(ncol, "GP")?);
    }

    if let Some(v) = value("BG") {
        // BG packs both dimensions into one digit string, split exactly in half.
        let half = v.len() / 2;
        meta.nrow = Some(parse_trimmed(&v[..half], "BG")?);
        meta.ncol = Some(parse_trimmed(&v[half..], "BG")?);
    }

    if let Some(v) = value("LV") {
        let mut fields = v.split_whitespace();
        let n: usize = fields
            .next()
            .ok_or_else(|| FormatError::new("empty LV token"))?
            .parse()
            .map_err(|_| FormatError::new("unparseable LV level count"))?;
        meta.n_level = Some(n);
        meta.levels = fields
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|_| FormatError::new("unparseable LV level value"))
            })
            .collect::<Result<_, _>>()?;
    }

    if let Some(&(start, _)) = spans.get("MS") {
        meta.radar_locations = parse_angle_list(&header[start..]);
    }

    if let Some(&(start, _)) = spans.get("ST") {
        meta.radar_days = parse_angle_list(&header[start..]);
    }

    if let Some(v) = value("CS") {
        let code: i64 = parse_trimmed(v, "CS")?;
        meta.indicator = match code {
            0 => Some("near ground level"),
            1 => Some("maximum"),
            2 => Some("tops"),
            _ => None,
        };
    }

    if let Some(v) = value("MX") {
        meta.image_count = Some(parse_trimmed(v, "MX")?);
    }

    if let Some(v) = value("VV") {
        meta.prediction_time = Some(parse_trimmed(v, "VV")?);
    }

    if let Some(v) = value("MF") {
        meta.module_flag = Some(parse_trimmed(v, "MF")?);
    }

    if let Some(v) = value("VR") {
        meta.reanalysis_version = Some(v.to_string());
    }

    Ok(meta)
}

/// The composite timestamp is split around the radar id: DDHHMM at offsets [2..8] and
/// MMYY at offsets [13..17].
fn parse_header_datetime(header: &str) -> RadRainResult<DateTime<Utc>> {
    let field = |range: std::ops::Range<usize>| -> RadRainResult<u32> {
        header[range.clone()]
            .parse()
            .map_err(|_| FormatError::new(format!("bad date field at {:?}", range)).into())
    };

    let day = field(2..4)?;
    let hour = field(4..6)?;
    let minute = field(6..8)?;
    let month = field(13..15)?;
    let yy = field(15..17)?;
    // Two digit years, pivoting the same way strptime's %y does.
    let year = if yy < 69 { 2000 + yy } else { 1900 + yy } as i32;

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| FormatError::new("invalid composite timestamp"))?;

    Ok(Utc.from_utc_datetime(&naive))
}

/// INT values are minutes, except when the value carries the "U" day-unit marker, in which
/// case the digits before the marker are in days.
fn parse_interval(value: &str) -> RadRainResult<u32> {
    let trimmed = value.trim();
    if let Some(pos) = trimmed.find('U') {
        let days: u32 = parse_trimmed(&trimmed[..pos], "INT")?;
        Ok(days * 60 * 24)
    } else {
        let minutes: u32 = parse_trimmed(trimmed, "INT")?;
        Ok(minutes * 60)
    }
}

/// Text between the first '<' and the following '>', split on commas.
fn parse_angle_list(text: &str) -> Vec<String> {
    let Some(open) = text.find('<') else {
        return Vec::new();
    };
    let rest = &text[open + 1..];
    let close = rest.find('>').unwrap_or(rest.len());
    rest[..close].split(',').map(|s| s.to_string()).collect()
}

fn parse_trimmed<T: std::str::FromStr>(value: &str, token: &str) -> Result<T, FormatError> {
    value
        .trim()
        .parse()
        .map_err(|_| FormatError::new(format!("unparseable {} token {:?}", token, value)))
}

/*-------------------------------------------------------------------------------------------------
 *                                        Payload decoding
 *-----------------------------------------------------------------------------------------------*/

/// Byte-per-cell products (RX class): 250 is the no-data value, 249 positions are recorded
/// as clutter but left unaltered.
fn decode_byte_payload(payload: &[u8], meta: &mut CompositeMeta) -> Vec<f32> {
    let mut values = Vec::with_capacity(payload.len());
    for (i, &b) in payload.iter().enumerate() {
        if b == 249 {
            meta.clutter_mask.push(i);
        }
        values.push(if b == 250 { f32::NAN } else { f32::from(b) });
    }
    values
}

/// Default 16-bit products: little-endian words with flag bits 13-16 and a 12-bit magnitude
/// that is scaled by the precision factor.
fn decode_bits16_payload(payload: &[u8], meta: &mut CompositeMeta) -> RadRainResult<Vec<f32>> {
    if payload.len() % 2 != 0 {
        return Err(FormatError::new("odd payload length for 16-bit product").into());
    }

    let precision = meta
        .precision
        .ok_or_else(|| FormatError::new("missing PR token for 16-bit product"))?;
    let negate = meta.product == "RD";

    let mut values = Vec::with_capacity(payload.len() / 2);
    for (i, pair) in payload.chunks_exact(2).enumerate() {
        let raw = u16::from_le_bytes([pair[0], pair[1]]);

        if raw & 0x1000 != 0 {
            meta.secondary.push(i);
        }
        if raw & 0x8000 != 0 {
            meta.clutter_mask.push(i);
        }

        let mut magnitude = f64::from(raw & 0x0FFF);
        // The sign bit only applies to RD, the adjustment-difference product.
        if negate && raw & 0x4000 != 0 {
            magnitude = -magnitude;
        }

        if raw & 0x2000 != 0 {
            values.push(f32::NAN);
        } else {
            values.push((magnitude * precision) as f32);
        }
    }

    Ok(values)
}

/// Run-length coded products (PG class): newline-terminated ASCII lines, decoded top line
/// first and flipped vertically so that row 0 is the geographic south like every other
/// product family.
fn decode_runlength_payload(payload: &[u8], ncol: usize) -> RadRainResult<Vec<f32>> {
    let mut rows: Vec<Vec<f32>> = Vec::new();

    let mut pos = 0;
    while pos < payload.len() {
        let start = pos;
        while pos < payload.len() && payload[pos] != LF {
            pos += 1;
        }
        let line = if pos < payload.len() {
            pos += 1;
            &payload[start..pos]
        } else {
            &payload[start..]
        };

        if line.first() == Some(&EOT) {
            break;
        }
        if line.is_empty() {
            continue;
        }

        rows.push(decode_runlength_line(line, ncol)?);
    }

    rows.reverse();
    Ok(rows.into_iter().flatten().collect())
}

fn decode_runlength_line(line: &[u8], ncol: usize) -> RadRainResult<Vec<f32>> {
    // Byte 0 is the encoded line number which we don't need.
    if line.len() < 2 {
        return Err(FormatError::new("truncated run-length line").into());
    }

    // Line-feed directly behind the line number means an empty line.
    if line[1] == LF {
        return Ok(vec![f32::NAN; ncol]);
    }

    // Leading no-data offset, with 255 as the escape byte continuing the accumulation
    // (255 itself contributes 255 - 16 = 239).
    let mut lo = 1;
    let mut byte = line[lo];
    let mut offset = byte.wrapping_sub(16) as usize;
    while byte == 255 {
        lo += 1;
        byte = *line
            .get(lo)
            .ok_or_else(|| FormatError::new("truncated run-length offset"))?;
        offset += byte.wrapping_sub(16) as usize;
    }

    let mut row: Vec<f32> = Vec::with_capacity(ncol);
    row.resize(offset, f32::NAN);

    // Packed (length, value) nibble pairs until the line feed.
    for &b in &line[lo + 1..] {
        if b == LF {
            break;
        }
        let width = (b >> 4) as usize;
        let val = f32::from(b & 0x0F);
        row.extend(std::iter::repeat(val).take(width));
    }

    // Shortfall is padded with no-data, excess is truncated.
    if row.len() < ncol {
        row.resize(ncol, f32::NAN);
    } else {
        row.truncate(ncol);
    }

    Ok(row)
}

/*-------------------------------------------------------------------------------------------------
 *                                   Filename timestamp fallback
 *-----------------------------------------------------------------------------------------------*/

/** Recover the composite timestamp from a file name.

Composite file names embed a 10-digit YYMMDDHHMM token (e.g. `raa01-rw_10000-0805011050-dwd---bin.gz`).
This is the fallback used to place a sentinel row when a file fails to decode. */
pub fn datetime_from_filename(fname: &str) -> Option<DateTime<Utc>> {
    let bytes = fname.as_bytes();

    let mut run_start = None;
    let mut run_len = 0;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if run_len == 0 {
                run_start = Some(i);
            }
            run_len += 1;
        } else {
            if run_len == 10 {
                break;
            }
            run_len = 0;
            run_start = None;
        }
    }
    if run_len != 10 {
        return None;
    }
    let start = run_start?;
    let token = &fname[start..start + 10];

    let yy: u32 = token[0..2].parse().ok()?;
    let month: u32 = token[2..4].parse().ok()?;
    let day: u32 = token[4..6].parse().ok()?;
    let hour: u32 = token[6..8].parse().ok()?;
    let minute: u32 = token[8..10].parse().ok()?;
    let year = if yy < 69 { 2000 + yy } else { 1900 + yy } as i32;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}
