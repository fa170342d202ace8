use clap::Parser;
use log::LevelFilter;
use radrain::{
    annual_r_factor, monthly_r_factor, ErosivityEngine, RFactorTable, RadRainResult, RainArchive,
    SerialEngine, ThreadPoolEngine,
};
use simple_logger::SimpleLogger;
use std::{
    fmt::{self, Display},
    io::Write,
    path::PathBuf,
};

/*-------------------------------------------------------------------------------------------------
 *                               Parse Command Line Arguments
 *-----------------------------------------------------------------------------------------------*/
///
/// Calculate rainfall erosivity (R-factors) from an archive database.
///
/// Writes one CSV table with the R-factor and one with the number of erosive rains, one row
/// per month (mean over the year range) or per year, one column per cell.
///
#[derive(Debug, Parser)]
#[clap(name = "rfactor")]
#[clap(author, version, about)]
struct RFactorOptions {
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

    /// Analysis span: "monthly" for mean monthly R-factors, "annual" for one row per year.
    #[clap(parse(try_from_str=parse_span))]
    #[clap(default_value = "annual")]
    span: Span,

    /// Maximum days of NoData before a cell's result turns NaN.
    #[clap(short, long, default_value_t = 30.0)]
    max_nan_days: f64,

    /// Extend each month by up to six hours from its neighbors, so rain events crossing a
    /// month boundary count as one event.
    #[clap(short, long)]
    carry: bool,

    /// Process the cells serially instead of with one worker per core.
    #[clap(long)]
    serial: bool,

    /// Write the R-factor CSV here instead of standard output. The rain count table goes to
    /// the same path with an "_n" suffix.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Monthly,
    Annual,
}

impl Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Span::Monthly => write!(f, "monthly"),
            Span::Annual => write!(f, "annual"),
        }
    }
}

fn parse_span(span: &str) -> RadRainResult<Span> {
    match span {
        "monthly" => Ok(Span::Monthly),
        "annual" => Ok(Span::Annual),
        _ => Err(format!("unknown span {:?}, use \"monthly\" or \"annual\"", span).into()),
    }
}

fn main() -> RadRainResult<()> {
    let opts = RFactorOptions::parse();

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .with_module_level("rfactor", level)
        .with_module_level("radrain", level)
        .init()?;

    let archive = RainArchive::connect(&opts.store_file)?;

    let engine: Box<dyn ErosivityEngine> = if opts.serial {
        Box::new(SerialEngine)
    } else {
        Box::new(ThreadPoolEngine::with_all_cores())
    };

    log::info!(
        "calculating {} R-factors for {} - {}",
        opts.span,
        opts.year_start,
        opts.year_end
    );

    let table = match opts.span {
        Span::Monthly => monthly_r_factor(
            &archive,
            engine.as_ref(),
            opts.year_start,
            opts.year_end,
            opts.max_nan_days,
            opts.carry,
        )?,
        Span::Annual => annual_r_factor(
            &archive,
            engine.as_ref(),
            opts.year_start,
            opts.year_end,
            opts.max_nan_days,
            opts.carry,
        )?,
    };

    let index_name = match opts.span {
        Span::Monthly => "month",
        Span::Annual => "year",
    };

    match &opts.output {
        Some(path) => {
            let mut r_file = std::io::BufWriter::new(std::fs::File::create(path)?);
            write_csv(&mut r_file, &table, index_name, |t, i| t.row_r(i))?;

            let n_path = with_n_suffix(path);
            let mut n_file = std::io::BufWriter::new(std::fs::File::create(&n_path)?);
            write_csv(&mut n_file, &table, index_name, |t, i| t.row_n(i))?;

            log::info!("wrote {} and {}", path.display(), n_path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            write_csv(&mut out, &table, index_name, |t, i| t.row_r(i))?;
        }
    }

    Ok(())
}

/// "r.csv" becomes "r_n.csv".
fn with_n_suffix(path: &std::path::Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let mut name = format!("{}_n", stem);
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}

fn write_csv<W: Write>(
    out: &mut W,
    table: &RFactorTable,
    index_name: &str,
    row: impl Fn(&RFactorTable, usize) -> &[f64],
) -> RadRainResult<()> {
    write!(out, "{}", index_name)?;
    for id in table.cell_ids.as_slice() {
        write!(out, ",{}", id)?;
    }
    writeln!(out)?;

    for (i, idx) in table.index.iter().enumerate() {
        write!(out, "{}", idx)?;
        for v in row(table, i) {
            write!(out, ",{}", v)?;
        }
        writeln!(out)?;
    }

    Ok(())
}
