pub use archive::{ImportFailure, RainArchive};
pub use composite::{datetime_from_filename, Composite, CompositeMeta};
pub use error::{ConfigError, ContinuityError, FormatError};
pub use erosivity::{
    annual_r_factor, calc_r_factor, load_month_with_carry, monthly_r_factor, ErosivityEngine,
    RFactorTable, SerialEngine, ThreadPoolEngine,
};
pub use grid::{degree_to_stereographic, CellIds, PrecipGrid};
pub use heavyrain::{
    count_heavy_rainfall_intervals, find_heavy_rainfalls, HeavyRainfall, IntervalCounts, Season,
};
pub use partition::{AggregatedTable, Partition, PartitionBuilder, ResampleFreq};
pub use product::Product;

/// Result type used throughout this crate.
pub type RadRainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

/**************************************************************************************************
 * Private Implementation
 *************************************************************************************************/
mod archive;
mod composite;
mod error;
mod erosivity;
mod grid;
mod heavyrain;
mod partition;
mod product;
