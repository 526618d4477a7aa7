use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use chrono::Local;
use clap::{ArgAction, Parser};
use env_logger::Builder;
use glob::glob;
use log::LevelFilter;
use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};
use thiserror::Error;

use pcd_core::pointcloud::header::PointHeader;
use pcd_parser::{reader::open_reader, ReadError};
use pcd_stats::{
    histogram::{AverageSpec, HistogramSpec},
    ExtentTracker, HistogramCatalog, HistogramConfig, OccupancyGrid, PointSummary, StatsError,
};

#[derive(Parser, Debug)]
#[command(
    name = "pstats",
    about = "Streaming statistics, histograms and occupancy for point cloud files",
    author = "MIERUNE Inc.",
    version = "0.0.1"
)]
struct Cli {
    #[arg(short, long, required = true, num_args = 1.., value_name = "FILE")]
    input: Vec<String>,

    /// Report file; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Histogram of a point field, e.g. `--histo z 0.5`
    #[arg(long, num_args = 2, value_names = ["NAME", "STEP"], action = ArgAction::Append)]
    histo: Vec<String>,

    /// Histogram of averages, e.g. `--histo-avg classification 1 intensity`
    #[arg(long = "histo-avg", num_args = 3, value_names = ["NAME", "STEP", "NAME_AVG"], action = ArgAction::Append)]
    histo_avg: Vec<String>,

    /// JSON histogram configuration, combined with the flags above
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Track occupied cells of this size in the xy plane
    #[arg(long, value_name = "SPACING")]
    occupancy: Option<f64>,

    /// Write the occupancy grid as ESRI ASCII grid
    #[arg(long, value_name = "FILE", requires = "occupancy")]
    asc_grid: Option<PathBuf>,

    /// Scale of the integer coordinates of CSV/TXT input
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [0.01, 0.01, 0.01])]
    scale: Vec<f64>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("{0}")]
    Args(String),
}

/// Statistics of one input file.
struct FileStats {
    path: PathBuf,
    header: Option<PointHeader>,
    extent: ExtentTracker,
    summary: PointSummary,
    histograms: HistogramCatalog,
    occupancy: Option<OccupancyGrid>,
}

impl FileStats {
    fn merge(&mut self, other: &FileStats) -> Result<(), StatsError> {
        self.extent.merge(&other.extent);
        self.summary.merge(&other.summary);
        self.histograms.merge(&other.histograms)?;
        if let (Some(mine), Some(theirs)) = (self.occupancy.as_mut(), other.occupancy.as_ref()) {
            mine.merge(theirs)?;
        }
        Ok(())
    }
}

fn expand_globs(input_patterns: &[String]) -> Result<Vec<PathBuf>, AppError> {
    let mut paths = Vec::new();
    for pattern in input_patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            for entry in glob(pattern)? {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => log::warn!("skipping unreadable path: {:?}", e),
                }
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }
    Ok(paths)
}

fn parse_step(value: &str) -> Result<f64, AppError> {
    value
        .parse()
        .map_err(|_| AppError::Args(format!("'{}' is no valid step", value)))
}

/// Reads the `--config` file and appends the `--histo`/`--histo-avg` flags.
fn histogram_config(args: &Cli) -> Result<HistogramConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => HistogramConfig::default(),
    };
    for pair in args.histo.chunks(2) {
        let [channel, step] = pair else {
            return Err(AppError::Args("--histo needs 2 arguments: name step".into()));
        };
        config.histograms.push(HistogramSpec {
            channel: channel.clone(),
            step: parse_step(step)?,
        });
    }
    for triple in args.histo_avg.chunks(3) {
        let [channel, step, average_of] = triple else {
            return Err(AppError::Args(
                "--histo-avg needs 3 arguments: name step name_avg".into(),
            ));
        };
        config.averages.push(AverageSpec {
            channel: channel.clone(),
            step: parse_step(step)?,
            average_of: average_of.clone(),
        });
    }
    Ok(config)
}

/// Scale and offset all files are brought to before their integer
/// coordinates are aggregated: those of the first file.
fn shared_quantization(path: &Path, scale: [f64; 3]) -> Result<Option<PointHeader>, AppError> {
    let reader = open_reader(vec![path.to_path_buf()], scale)?;
    Ok(reader.header().cloned())
}

fn process_file(
    path: &Path,
    config: &HistogramConfig,
    occupancy: Option<f64>,
    scale: [f64; 3],
    quantization: Option<&PointHeader>,
) -> Result<FileStats, AppError> {
    let start = std::time::Instant::now();
    let mut reader = open_reader(vec![path.to_path_buf()], scale)?;
    let mut header = reader.header().cloned();
    let requantize = match (quantization, header.as_mut()) {
        (Some(shared), Some(own)) if !own.same_quantization(shared) => {
            log::info!(
                "{:?}: requantizing from scale {:?} offset {:?} to scale {:?} offset {:?}",
                path,
                own.scale,
                own.offset,
                shared.scale,
                shared.offset
            );
            own.scale = shared.scale;
            own.offset = shared.offset;
            Some(shared)
        }
        _ => None,
    };
    let mut stats = FileStats {
        path: path.to_path_buf(),
        header,
        extent: ExtentTracker::new(),
        summary: PointSummary::new(),
        histograms: HistogramCatalog::from_config(config)?,
        occupancy: occupancy.map(OccupancyGrid::new).transpose()?,
    };

    while let Some(mut point) = reader.next_point()? {
        if let Some(shared) = requantize {
            point.requantize(shared);
        }
        stats.extent.add(&point);
        stats.summary.add(&point);
        stats.histograms.add(&point)?;
        if let Some(grid) = stats.occupancy.as_mut() {
            grid.add_point(&point)?;
        }
    }

    if let Some(header) = &stats.header {
        let declared = header.point_count();
        if declared > 0 && declared != stats.extent.point_count() {
            log::warn!(
                "{:?}: header declares {} points but {} were read",
                path,
                declared,
                stats.extent.point_count()
            );
        }
    }
    log::info!(
        "read {} points from {:?} in {:?}",
        stats.extent.point_count(),
        path,
        start.elapsed()
    );
    Ok(stats)
}

fn write_report<W: Write>(w: &mut W, stats: &FileStats, files: usize) -> Result<(), AppError> {
    writeln!(w, "statistics of {} file(s)", files)?;
    stats.summary.report(w, stats.header.as_ref())?;

    if let Some(header) = &stats.header {
        let mut merged = header.clone();
        match stats.extent.merge_into_header(&mut merged) {
            Ok(()) => {
                writeln!(
                    w,
                    "header after merge: {} points, min {:?}, max {:?}",
                    merged.extended_number_of_point_records,
                    merged.bounding_volume.min,
                    merged.bounding_volume.max
                )?;
                let by_return: Vec<u64> = (1..=5).map(|r| stats.extent.points_by_return(r)).collect();
                writeln!(w, "  number of points by return {:?}", by_return)?;
            }
            Err(e) => log::warn!("cannot update header: {}", e),
        }
    }

    if stats.histograms.is_active() {
        stats.histograms.report(w)?;
    }

    if let Some(grid) = &stats.occupancy {
        writeln!(
            w,
            "occupancy grid with cell size {}: {} occupied cell(s)",
            grid.spacing(),
            grid.num_occupied()
        )?;
        if let Some(bounds) = grid.bounds() {
            writeln!(
                w,
                "  cells [{}, {}] x [{}, {}]",
                bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y
            )?;
        }
    }
    Ok(())
}

fn run(args: Cli) -> Result<(), AppError> {
    let start = std::time::Instant::now();

    let input_files = expand_globs(&args.input)?;
    if input_files.is_empty() {
        return Err(AppError::Args("no input files".into()));
    }
    log::info!("expanded input files: {:?}", input_files);

    let config = histogram_config(&args)?;
    if !config.is_empty() {
        log::info!(
            "histograms: {}",
            HistogramCatalog::from_config(&config)?.unparse().trim_end()
        );
    }
    let scale = match args.scale.as_slice() {
        [x, y, z] => [*x, *y, *z],
        _ => return Err(AppError::Args("--scale needs 3 values".into())),
    };

    let quantization = match input_files.as_slice() {
        [first, _, ..] => shared_quantization(first, scale)?,
        _ => None,
    };

    log::info!("start reading...");
    let results: Vec<FileStats> = input_files
        .par_iter()
        .map(|path| process_file(path, &config, args.occupancy, scale, quantization.as_ref()))
        .collect::<Result<_, _>>()?;

    let mut results = results.into_iter();
    let Some(mut total) = results.next() else {
        return Err(AppError::Args("no input files".into()));
    };
    for stats in results {
        log::debug!("merging {:?}", stats.path);
        total.merge(&stats)?;
    }
    log::info!("merged statistics of {} file(s)", input_files.len());

    total.summary.warn_fluff();

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_report(&mut writer, &total, input_files.len())?;
            writer.flush()?;
            log::info!("wrote report to {:?}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            write_report(&mut writer, &total, input_files.len())?;
        }
    }

    if let (Some(path), Some(grid)) = (&args.asc_grid, &total.occupancy) {
        grid.write_asc_grid(path)?;
    }

    log::info!("Elapsed: {:?}", start.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            if args.verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
        )
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pstats").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn histogram_flags_build_a_config() {
        let args = cli(&[
            "-i", "a.las", "--histo", "z", "0.5", "--histo", "intensity", "8", "--histo-avg",
            "scan_angle", "1", "z",
        ]);
        let config = histogram_config(&args).unwrap();
        assert_eq!(config.histograms.len(), 2);
        assert_eq!(config.histograms[1].channel, "intensity");
        assert_eq!(config.histograms[1].step, 8.0);
        assert_eq!(config.averages[0].average_of, "z");
        assert_eq!(args.scale, vec![0.01, 0.01, 0.01]);
    }

    #[test]
    fn bad_step_is_an_argument_error() {
        let args = cli(&["-i", "a.las", "--histo", "z", "fine"]);
        assert!(matches!(histogram_config(&args), Err(AppError::Args(_))));
    }

    #[test]
    fn asc_grid_requires_occupancy() {
        let parsed = Cli::try_parse_from(["pstats", "-i", "a.las", "--asc-grid", "g.asc"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn files_are_processed_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        fs::write(&first, "x,y,z,intensity\n0.5,0.5,1,10\n1.5,0.5,2,20\n").unwrap();
        fs::write(&second, "x,y,z,intensity\n0.7,0.2,3,30\n-3.0,4.0,4,40\n").unwrap();

        let args = cli(&[
            "-i",
            dir.path().join("*.csv").to_str().unwrap(),
            "--histo",
            "intensity",
            "10",
            "--occupancy",
            "1",
        ]);
        let files = expand_globs(&args.input).unwrap();
        assert_eq!(files.len(), 2);
        let config = histogram_config(&args).unwrap();

        let mut total =
            process_file(&files[0], &config, args.occupancy, [0.01; 3], None).unwrap();
        let other = process_file(&files[1], &config, args.occupancy, [0.01; 3], None).unwrap();
        total.merge(&other).unwrap();

        assert_eq!(total.extent.point_count(), 4);
        assert_eq!(total.summary.count(), 4);
        let grid = total.occupancy.as_ref().unwrap();
        assert_eq!(grid.num_occupied(), 3);

        let mut out = Vec::new();
        write_report(&mut out, &total, 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("statistics of 2 file(s)\n"));
        assert!(text.contains("intensity histogram with bin size 10.000000\n"));
        assert!(text.contains("  bin [30,40) has 1\n"));
        assert!(text.contains("occupancy grid with cell size 1: 3 occupied cell(s)\n"));
    }

    fn write_las(path: &Path, offset: f64, points: &[(f64, f64, f64)]) {
        let mut builder = las::Builder::from((1, 2));
        let transform = las::Transform {
            scale: 0.01,
            offset,
        };
        builder.transforms = las::Vector {
            x: transform,
            y: transform,
            z: transform,
        };
        let header = builder.into_header().unwrap();
        let mut writer = las::Writer::from_path(path, header).unwrap();
        for &(x, y, z) in points {
            writer
                .write_point(las::Point {
                    x,
                    y,
                    z,
                    return_number: 1,
                    number_of_returns: 1,
                    ..Default::default()
                })
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn files_with_different_offsets_share_one_quantization() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.las");
        let second = dir.path().join("b.las");
        write_las(&first, 0.0, &[(10.0, 10.0, 10.0)]);
        write_las(&second, 1000.0, &[(1010.0, 1020.0, 1005.5)]);

        let config = HistogramConfig::default();
        let shared = shared_quantization(&first, [0.01; 3]).unwrap().unwrap();
        let mut total = process_file(&first, &config, None, [0.01; 3], Some(&shared)).unwrap();
        let other = process_file(&second, &config, None, [0.01; 3], Some(&shared)).unwrap();
        assert_eq!(other.header.as_ref().unwrap().offset, [0.0; 3]);
        total.merge(&other).unwrap();

        let mut merged = total.header.clone().unwrap();
        total.extent.merge_into_header(&mut merged).unwrap();
        assert_eq!(merged.extended_number_of_point_records, 2);
        let min = merged.bounding_volume.min;
        let max = merged.bounding_volume.max;
        for (value, expected) in min.iter().zip([10.0, 10.0, 10.0]) {
            assert!((value - expected).abs() < 1e-9);
        }
        for (value, expected) in max.iter().zip([1010.0, 1020.0, 1005.5]) {
            assert!((value - expected).abs() < 1e-9);
        }
    }
}
