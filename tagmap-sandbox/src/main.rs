use log::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tagmap::compare::{compare, sweep, ComparisonSettings, NamedWeights, Sweep, SweepMetric};
use tagmap::metrics::ground_truth_metric;
use tagmap::{Capture, Error, Pose, Prescaling, WeightPreset};

#[derive(StructOpt, Clone)]
#[structopt(
    name = "tagmap-sandbox",
    about = "A tool for comparing tag prescaling strategies and weight vectors"
)]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `tagmap::compare::ComparisonSettings`.
    #[structopt(short, long, default_value = "tagmap-settings.json")]
    settings: PathBuf,
    /// Tag prescaling strategy to run (USE_SBA, FULL_COV, DIAG_COV or ONES)
    ///
    /// May be given several times. Defaults to all of them.
    #[structopt(long = "strategy")]
    strategies: Vec<Prescaling>,
    /// Weight vector to run, either a preset name or 18 comma-separated weights
    ///
    /// May be given several times. Defaults to all presets.
    #[structopt(short, long)]
    weights: Vec<String>,
    /// Sweep weight components instead of comparing whole vectors
    ///
    /// Each occurrence adds one dimension: comma-separated components of the weight vector
    /// that share a value, e.g. `--sweep 0,1,2 --sweep 8,9`. The first `--weights` entry is
    /// the base vector. Cells are scored by ground truth when given, otherwise by chi2.
    #[structopt(long = "sweep")]
    sweep_dimensions: Vec<String>,
    /// Values every swept dimension takes, as `start:stop:step` with `stop` excluded
    #[structopt(long, default_value = "-10:10:0.2")]
    sweep_values: String,
    /// Score sweep cells by the second half of a split capture instead of chi2
    #[structopt(long)]
    sweep_split: bool,
    /// Ground truth tag poses as a JSON object from tag id to `[x, y, z, qx, qy, qz, qw]`
    #[structopt(short, long)]
    ground_truth: Option<PathBuf>,
    /// Output file for the processed map of the best run on the first capture
    #[structopt(short, long)]
    output: Option<PathBuf>,
    /// Capture files
    #[structopt(parse(from_os_str))]
    captures: Vec<PathBuf>,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let settings = File::open(&opt.settings)
        .ok()
        .and_then(|file| serde_json::from_reader(BufReader::new(file)).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    let settings: ComparisonSettings = settings.unwrap_or_default();

    let captures: Vec<(String, Capture)> = opt
        .captures
        .iter()
        .filter_map(|path| match load_capture(path) {
            Ok(capture) => Some((path.display().to_string(), capture)),
            Err(e) => {
                error!("skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    if captures.is_empty() {
        error!("no capture could be loaded");
        std::process::exit(1);
    }

    let strategies = if opt.strategies.is_empty() {
        Prescaling::ALL.to_vec()
    } else {
        opt.strategies.clone()
    };
    let weights: Vec<NamedWeights> = if opt.weights.is_empty() {
        WeightPreset::ALL.iter().map(|&p| p.into()).collect()
    } else {
        match opt
            .weights
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<NamedWeights>, Error>>()
        {
            Ok(weights) => weights,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    };

    if !opt.sweep_dimensions.is_empty() {
        if let Err(e) = run_sweep(&opt, &captures[0], &strategies, &weights[0], &settings) {
            error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    let table = compare(&captures, &strategies, &weights, &settings);

    info!(
        "{:<24} {:<9} {:<18} {:>14} {:>14} {:>6} {}",
        "capture", "strategy", "weights", "initial chi2", "final chi2", "iters", "status"
    );
    for (key, run) in table.iter() {
        match run {
            Ok(outcome) => info!(
                "{:<24} {:<9} {:<18} {:>14.6} {:>14.6} {:>6} {:?}",
                key.capture,
                key.prescaling.name(),
                key.weights,
                outcome.result.initial_chi2,
                outcome.result.final_chi2,
                outcome.result.iterations,
                outcome.result.convergence
            ),
            Err(e) => info!(
                "{:<24} {:<9} {:<18} {}",
                key.capture,
                key.prescaling.name(),
                key.weights,
                e
            ),
        }
    }
    info!("{} of {} runs failed", table.failures(), table.len());

    let first = &captures[0].0;
    let (best_key, best) = match table.best(first) {
        Some(best) => best,
        None => {
            warn!("no run on {} converged", first);
            return;
        }
    };
    info!(
        "best run on {}: {} with {} (chi2 {})",
        first,
        best_key.prescaling,
        best_key.weights,
        best.result.final_chi2
    );
    let map = best.map();

    if let Some(path) = &opt.ground_truth {
        match load_ground_truth(path) {
            Ok(truth) => match ground_truth_metric(&map.tag_poses(), &truth) {
                Some(metric) => info!("ground truth metric: {} m", metric),
                None => warn!("fewer than two tags in common with the ground truth"),
            },
            Err(e) => error!("unable to read ground truth {}: {}", path.display(), e),
        }
    }

    if let Some(path) = &opt.output {
        info!("exporting the processed map");
        match File::create(path) {
            Ok(file) => {
                if let Err(e) = map.write_json(file) {
                    error!("unable to write processed map: {}", e);
                }
            }
            Err(e) => error!("unable to create {}: {}", path.display(), e),
        }
    }
}

fn load_capture(path: &Path) -> Result<Capture, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn load_ground_truth(path: &Path) -> Result<BTreeMap<u32, Pose>, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Sweeps the first capture under every strategy and logs the best cell of each.
fn run_sweep(
    opt: &Opt,
    (name, capture): &(String, Capture),
    strategies: &[Prescaling],
    base: &NamedWeights,
    settings: &ComparisonSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let dimensions = opt
        .sweep_dimensions
        .iter()
        .map(|d| {
            d.split(',')
                .map(|c| c.trim().parse::<usize>())
                .collect::<Result<Vec<usize>, _>>()
        })
        .collect::<Result<Vec<Vec<usize>>, _>>()?;
    let grid = Sweep::new(base.clone(), dimensions, parse_range(&opt.sweep_values)?);
    let metric = match &opt.ground_truth {
        Some(path) => SweepMetric::GroundTruth(load_ground_truth(path)?),
        None if opt.sweep_split => SweepMetric::Split,
        None => SweepMetric::Chi2,
    };

    for &prescaling in strategies {
        let result = sweep(capture, prescaling, &grid, &metric, settings)?;
        for cell in &result.cells {
            debug!("{:?}: {:?}", cell.indices, cell.metric);
        }
        match result.best() {
            Some(best) => info!(
                "{} {}: best metric {:?} with weights {:?}",
                name,
                prescaling.name(),
                best.metric,
                best.weights.as_slice()
            ),
            None => warn!("{} {}: no cell produced a metric", name, prescaling.name()),
        }
    }
    Ok(())
}

/// Parses `start:stop:step` into the values from `start` up to, not including, `stop`.
fn parse_range(s: &str) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let parts = s
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()?;
    match parts[..] {
        [start, stop, step] if step > 0.0 => {
            let count = ((stop - start) / step).ceil().max(0.0) as usize;
            Ok((0..count).map(|k| start + k as f64 * step).collect())
        }
        _ => Err(format!("`{}` is not a `start:stop:step` range", s).into()),
    }
}
