use chrono::{DateTime, Datelike, Duration, Utc};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::LevelFilter;
use radrain::{
    datetime_from_filename, CellIds, Composite, ImportFailure, PartitionBuilder, Product,
    RadRainResult, RainArchive,
};
use simple_logger::SimpleLogger;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

const CHANNEL_SIZE: usize = 100;

/*-------------------------------------------------------------------------------------------------
 *                               Parse Command Line Arguments
 *-----------------------------------------------------------------------------------------------*/
///
/// Import RADOLAN composite files into an archive database.
///
/// Walks a data directory of composite files (gzipped or raw), decodes them, clips each grid
/// to the cell selection, and stores the resulting time series month by month. Files that
/// fail to decode are recorded in the archive's failure ledger and leave a NoData row behind,
/// so a single corrupt file never aborts an import run.
///
#[derive(Debug, Parser)]
#[clap(name = "importrain")]
#[clap(author, version, about)]
struct ImportRainOptions {
    /// The path to the archive database file.
    ///
    /// If this is not specified, then the program will check for it in the "RAIN_DB"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "RAIN_DB")]
    store_file: PathBuf,

    /// The directory to walk for composite files.
    data_dir: PathBuf,

    /// A text file with the cell ids of the study area, one id per line.
    ///
    /// Without it the full national grid is imported, which makes for a very large archive.
    #[clap(short, long)]
    id_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

/*-------------------------------------------------------------------------------------------------
 *                                        Pipeline messages
 *-----------------------------------------------------------------------------------------------*/

/// One file to decode, already placed in its month.
struct FileJob {
    year: i32,
    month: u32,
    timestamp: DateTime<Utc>,
    path: PathBuf,
    filename: String,
}

/// The outcome of decoding one file.
struct DecodedRow {
    year: i32,
    month: u32,
    timestamp: DateTime<Utc>,
    filename: String,
    outcome: Result<(Vec<f32>, Duration, Arc<CellIds>), String>,
}

fn main() -> RadRainResult<()> {
    let opts = ImportRainOptions::parse();

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .with_module_level("importrain", level)
        .with_module_level("radrain", level)
        .init()?;

    let cell_ids = match &opts.id_file {
        Some(path) => Some(CellIds::from_file(path)?),
        None => None,
    };

    let (to_decode, from_path_gen) = bounded(CHANNEL_SIZE);
    let (to_archive, from_decode) = bounded(CHANNEL_SIZE);

    let path_gen = start_path_generation_thread(opts.data_dir.clone(), to_decode)?;
    let decode = start_decode_thread(cell_ids, from_path_gen, to_archive)?;
    let archive = start_archive_thread(opts.store_file.clone(), from_decode)?;

    path_gen.join().unwrap();
    decode.join().unwrap();
    let (rows, failures) = archive.join().unwrap();

    log::info!("");
    log::info!("Import finished:");
    log::info!("      rows stored - {:>9}", rows);
    log::info!("     files failed - {:>9}", failures);
    log::info!("");
    if failures > 0 {
        log::warn!("see the import_failures table in the archive for details");
    }

    Ok(())
}

/*-------------------------------------------------------------------------------------------------
 *                                        Pipeline stages
 *-----------------------------------------------------------------------------------------------*/

/// Walk the data directory, order every file by its name timestamp, and feed the decoder.
///
/// Files without a recognizable timestamp are skipped here; they cannot even be assigned a
/// NoData row.
fn start_path_generation_thread(
    data_dir: PathBuf,
    to_decode: Sender<FileJob>,
) -> RadRainResult<JoinHandle<()>> {
    let jh = thread::Builder::new()
        .name("importrain-path_gen".to_owned())
        .spawn(move || {
            // Group by month so the archive stage sees whole months in order.
            let mut months: BTreeMap<(i32, u32), Vec<(DateTime<Utc>, PathBuf, String)>> =
                BTreeMap::new();

            for entry in walkdir::WalkDir::new(&data_dir)
                .into_iter()
                .filter_map(|res| res.ok())
                // Ignore directories, WalkDir will take care of recursing into them.
                .filter(|entry| entry.path().is_file())
            {
                let fname: String = entry.file_name().to_string_lossy().to_string();
                let Some(timestamp) = datetime_from_filename(&fname) else {
                    log::warn!("no timestamp in file name, skipping: {}", fname);
                    continue;
                };
                months
                    .entry((timestamp.year(), timestamp.month()))
                    .or_default()
                    .push((timestamp, entry.path().to_path_buf(), fname));
            }

            for ((year, month), mut files) in months {
                files.sort_by_key(|(timestamp, _, _)| *timestamp);
                log::debug!("queueing {} files for {}/{}", files.len(), year, month);
                for (timestamp, path, filename) in files {
                    to_decode
                        .send(FileJob {
                            year,
                            month,
                            timestamp,
                            path,
                            filename,
                        })
                        .unwrap();
                }
            }
        })?;

    Ok(jh)
}

/// Decode and clip each file. Runs on a single thread so rows stay in timestamp order.
fn start_decode_thread(
    cell_ids: Option<CellIds>,
    from_path_gen: Receiver<FileJob>,
    to_archive: Sender<DecodedRow>,
) -> RadRainResult<JoinHandle<()>> {
    let jh = thread::Builder::new()
        .name("importrain-decode".to_owned())
        .spawn(move || {
            let mut cell_ids = cell_ids.map(Arc::new);

            for job in from_path_gen {
                let outcome = decode_one(&job.path, &mut cell_ids);
                let timestamp = match &outcome {
                    Ok((_, _, _, meta_time)) => *meta_time,
                    Err(_) => job.timestamp,
                };

                if let Err(reason) = &outcome {
                    log::error!("failed to decode {}: {}", job.filename, reason);
                }

                to_archive
                    .send(DecodedRow {
                        year: job.year,
                        month: job.month,
                        timestamp,
                        filename: job.filename,
                        outcome: outcome.map(|(row, step, ids, _)| (row, step, ids)),
                    })
                    .unwrap();
            }
        })?;

    Ok(jh)
}

fn decode_one(
    path: &std::path::Path,
    cell_ids: &mut Option<Arc<CellIds>>,
) -> Result<(Vec<f32>, Duration, Arc<CellIds>, DateTime<Utc>), String> {
    let composite = Composite::open(path).map_err(|e| e.to_string())?;

    let ids = cell_ids
        .get_or_insert_with(|| {
            Arc::new(CellIds::full_grid(
                composite.grid.nrow(),
                composite.grid.ncol(),
            ))
        })
        .clone();
    let row = composite
        .grid
        .to_clipped_row(&ids)
        .map_err(|e| e.to_string())?;

    let step = composite
        .meta
        .interval_seconds
        .map(|s| Duration::seconds(i64::from(s)))
        .or_else(|| Product::time_step_for_code(&composite.meta.product))
        .ok_or_else(|| {
            format!(
                "product {} has no interval information",
                composite.meta.product
            )
        })?;

    Ok((row, step, ids, composite.meta.datetime))
}

/// Assemble month partitions and store them, recording every failed file in the ledger.
fn start_archive_thread(
    store_file: PathBuf,
    from_decode: Receiver<DecodedRow>,
) -> RadRainResult<JoinHandle<(usize, usize)>> {
    let jh = thread::Builder::new()
        .name("importrain-archive".to_owned())
        .spawn(move || {
            let archive = RainArchive::connect(&store_file).unwrap();

            let mut current: Option<((i32, u32), PartitionBuilder)> = None;
            let mut rows_stored = 0usize;
            let mut failures = 0usize;

            for decoded in from_decode {
                let key = (decoded.year, decoded.month);

                // Month boundary: flush the finished month.
                if let Some((open_key, _)) = &current {
                    if *open_key != key {
                        let (_, builder) = current.take().unwrap();
                        rows_stored += flush_month(&archive, builder);
                    }
                }

                match decoded.outcome {
                    Ok((row, step, ids)) => {
                        let builder = &mut current
                            .get_or_insert_with(|| {
                                (key, PartitionBuilder::new(step, (*ids).clone()))
                            })
                            .1;
                        if let Err(err) = builder.push(decoded.timestamp, &row) {
                            log::error!("rejected row from {}: {}", decoded.filename, err);
                            record_failure(&archive, &decoded.filename, key, &err.to_string());
                            failures += 1;
                        }
                    }
                    Err(reason) => {
                        record_failure(&archive, &decoded.filename, key, &reason);
                        failures += 1;
                        // Leave a NoData row behind if a month is already open.
                        if let Some((_, builder)) = &mut current {
                            if let Err(err) = builder.push_missing(decoded.timestamp) {
                                log::error!(
                                    "could not place NoData row for {}: {}",
                                    decoded.filename,
                                    err
                                );
                            }
                        }
                    }
                }
            }

            if let Some((_, builder)) = current {
                rows_stored += flush_month(&archive, builder);
            }

            (rows_stored, failures)
        })?;

    Ok(jh)
}

fn flush_month(archive: &RainArchive, builder: PartitionBuilder) -> usize {
    match builder.finish() {
        Ok(Some(partition)) => {
            let rows = partition.num_rows();
            log::info!(
                "storing {}/{} with {} rows",
                partition.start().year(),
                partition.start().month(),
                rows
            );
            archive.store(&partition).unwrap();
            rows
        }
        Ok(None) => 0,
        Err(err) => {
            log::error!("could not assemble month partition: {}", err);
            0
        }
    }
}

fn record_failure(archive: &RainArchive, filename: &str, key: (i32, u32), reason: &str) {
    let failure = ImportFailure {
        year: key.0,
        month: key.1,
        filename: filename.to_string(),
        reason: reason.to_string(),
    };
    if let Err(err) = archive.record_failure(&failure) {
        log::error!("could not record failure for {}: {}", filename, err);
    }
}
