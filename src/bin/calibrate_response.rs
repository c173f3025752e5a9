use std::path::PathBuf;

use clap::{App, Arg, ArgMatches};
use tracing::{error, info};

use lib::{dataset_io, logger};
use sensor_response::{
    AlternatingCalibration, AlternatingOptions, Calibration, CalibrationOptions, Method,
    RobustCalibration, RobustOptions,
};

fn main() {
    let matches = App::new("Calibrate Radiometric Response")
        .version("0.1")
        .about("Estimates the inverse camera response from a directory of images taken at several exposure times")
        .arg(
            Arg::with_name("DATASET")
                .help("directory of images named TTTTTT_III.png or TTTTTT_III.mat, where TTTTTT is the exposure time")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("FILE")
                .help("where to write the calibrated response")
                .default_value("response.mat")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("method")
                .short("m")
                .long("method")
                .value_name("NAME")
                .help("calibration method")
                .possible_values(&["engel", "debevec"])
                .case_insensitive(true)
                .default_value("engel")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("threshold")
                .short("t")
                .long("threshold")
                .value_name("VALUE")
                .help("convergence threshold (engel)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("iterations")
                .long("iterations")
                .value_name("N")
                .help("maximum number of iterations per channel")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("valid_min")
                .long("valid-min")
                .value_name("LEVEL")
                .help("lowest brightness level considered correctly exposed")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("valid_max")
                .long("valid-max")
                .value_name("LEVEL")
                .help("highest brightness level considered correctly exposed")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("min_samples")
                .long("min-samples")
                .value_name("N")
                .help("minimum number of samples per brightness level (debevec)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("lambda")
                .long("lambda")
                .value_name("VALUE")
                .help("smoothing weight (debevec)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("save_dataset")
                .short("s")
                .long("save-dataset")
                .value_name("DIR")
                .help("save the loaded dataset in the given directory as raw matrices")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("plot")
                .long("plot")
                .value_name("FILE")
                .help("save a PNG plot of the calibrated response")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("progress_dir")
                .long("progress-dir")
                .value_name("DIR")
                .help("save a PNG plot of the estimate after every iteration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("print progress tables (-vv adds solver reports and debug logs)"),
        )
        .get_matches();

    logger::init(matches.occurrences_of("v"));

    if let Err(e) = run(&matches) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let verbosity = matches.occurrences_of("v").min(2) as u32;

    let mut options = CalibrationOptions::default().verbosity(verbosity);
    if let Some(n) = parse_arg::<usize>(matches, "iterations")? {
        options = options.max_num_iterations(n);
    }
    let (mut min_valid, mut max_valid) = options.valid_pixel_range;
    if let Some(v) = parse_arg::<u8>(matches, "valid_min")? {
        min_valid = v;
    }
    if let Some(v) = parse_arg::<u8>(matches, "valid_max")? {
        max_valid = v;
    }
    options = options.valid_pixel_range(min_valid, max_valid);
    options.validate()?;

    let method_name = matches.value_of("method").unwrap_or("engel");
    let method = match Method::from_name(method_name)? {
        Method::Alternating(_) => {
            let mut alternating = AlternatingOptions::default();
            if let Some(t) = parse_arg::<f64>(matches, "threshold")? {
                alternating = alternating.convergence_threshold(t);
            }
            Method::Alternating(AlternatingCalibration::new(alternating))
        }
        Method::Robust(_) => {
            let mut robust = RobustOptions::default();
            if let Some(n) = parse_arg::<usize>(matches, "min_samples")? {
                robust = robust.min_samples_per_level(n);
            }
            if let Some(l) = parse_arg::<f64>(matches, "lambda")? {
                robust = robust.smoothing_lambda(l);
            }
            Method::Robust(RobustCalibration::new(robust)?)
        }
    };

    let dataset = dataset_io::load_dataset(matches.value_of("DATASET").unwrap_or("."))?;
    if let Some(dir) = matches.value_of("save_dataset") {
        dataset_io::save_dataset(&dataset, dir)?;
    }

    let mut calibration = Calibration::new(method, options);
    if let Some(dir) = matches.value_of("progress_dir") {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)?;
        let mut frame = 0usize;
        calibration.set_progress_hook(move |plot| {
            let path = dir.join(format!("progress_{:04}.png", frame));
            frame += 1;
            if let Err(e) = dataset_io::save_plot(plot, &path) {
                error!("Couldn't save {}: {}", path.display(), e);
            }
        });
    }

    let response = calibration.calibrate(&dataset)?;

    let output = matches.value_of("output").unwrap_or("response.mat");
    dataset_io::save_response(&response, output)?;
    info!("Saved response to {}", output);

    if let Some(path) = matches.value_of("plot") {
        dataset_io::save_plot(&response.plot(512, 512), path)?;
        info!("Saved plot to {}", path);
    }

    Ok(())
}

/// Parses an optional argument, reporting malformed values by name.
fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| format!("invalid value \"{}\" for --{}: {}", s, name.replace('_', "-"), e)),
        None => Ok(None),
    }
}
