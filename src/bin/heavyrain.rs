use clap::Parser;
use log::LevelFilter;
use radrain::{
    count_heavy_rainfall_intervals, find_heavy_rainfalls, RadRainResult, RainArchive, Season,
};
use simple_logger::SimpleLogger;
use std::{io::Write, path::PathBuf};

/*-------------------------------------------------------------------------------------------------
 *                               Parse Command Line Arguments
 *-----------------------------------------------------------------------------------------------*/
///
/// Scan an archive database for heavy rainfall intervals.
///
/// An interval qualifies when strictly more than the minimum number of cells reach the
/// intensity threshold. The default output is a CSV of per-cell exceedance counts aggregated
/// over the season's span; with --list every qualifying interval is printed instead.
///
#[derive(Debug, Parser)]
#[clap(name = "heavyrain")]
#[clap(author, version, about)]
struct HeavyRainOptions {
    /// The path to the archive database file.
    ///
    /// If this is not specified, then the program will check for it in the "RAIN_DB"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "RAIN_DB")]
    store_file: PathBuf,

    /// The first year of the analysis period.
    year_start: i32,

    /// The last year of the analysis period.
    year_end: i32,

    /// Rainfall intensity threshold in mm per interval.
    threshold: f32,

    /// Minimum number of cells that must reach the threshold (exceedance is strict, so 0
    /// means at least one cell).
    #[clap(short, long, default_value_t = 0)]
    min_area: usize,

    /// Season to scan: "Year", "May - October", "November - April", "January/December",
    /// or a month abbreviation like "Jul".
    #[clap(parse(try_from_str=Season::parse))]
    #[clap(default_value = "Year")]
    season: Season,

    /// List every qualifying interval instead of counting them.
    #[clap(short, long)]
    list: bool,

    /// Write the CSV here instead of standard output.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> RadRainResult<()> {
    let opts = HeavyRainOptions::parse();

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .with_module_level("heavyrain", level)
        .with_module_level("radrain", level)
        .init()?;

    let archive = RainArchive::connect(&opts.store_file)?;

    let mut out: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };

    if opts.list {
        let hits = find_heavy_rainfalls(
            &archive,
            opts.year_start,
            opts.year_end,
            opts.threshold,
            opts.min_area,
            opts.season,
        )?;
        log::info!("{} intervals met the criteria", hits.len());

        writeln!(out, "timestamp,cells_at_threshold,max")?;
        for hit in hits {
            let cells = hit
                .values
                .iter()
                .filter(|&&v| v >= opts.threshold)
                .count();
            let max = hit.values.iter().cloned().fold(f32::NAN, f32::max);
            writeln!(out, "{},{},{}", hit.timestamp, cells, max)?;
        }
    } else {
        let counts = count_heavy_rainfall_intervals(
            &archive,
            opts.year_start,
            opts.year_end,
            opts.threshold,
            opts.min_area,
            opts.season,
        )?;
        log::info!("{} spans with qualifying intervals", counts.labels.len());

        write!(out, "span_end")?;
        for id in counts.cell_ids.as_slice() {
            write!(out, ",{}", id)?;
        }
        writeln!(out)?;
        for (i, label) in counts.labels.iter().enumerate() {
            write!(out, "{}", label)?;
            for c in counts.row(i) {
                write!(out, ",{}", c)?;
            }
            writeln!(out)?;
        }
    }

    Ok(())
}
