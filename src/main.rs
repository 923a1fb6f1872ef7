use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use image::RgbImage;
use panostitch::core::{MatchConfig, StitchError};
use panostitch::features::{extract, match_descriptors};
use panostitch::imgproc::convert_rgb_to_gray;
use panostitch::{init_thread_pool, Panorama, StitchMode, Stitcher, StitcherConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stitch overlapping photographs into a panorama.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Worker threads; defaults to PANOSTITCH_THREADS or one per core.
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract features from two images and report how well they match.
    Features {
        first: PathBuf,
        second: PathBuf,
        /// JSON stitcher configuration; defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Stitch two or more images.
    Stitch {
        #[arg(required = true, num_args = 2..)]
        images: Vec<PathBuf>,
        #[arg(short, long, default_value = "panorama_result.jpg")]
        output: PathBuf,
        /// Overrides the mode of the configuration file.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Trim black margins from the result.
        #[arg(long)]
        crop: bool,
        #[arg(long)]
        max_features: Option<usize>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Flat documents related by plane homographies.
    Scans,
    /// A camera rotating about its centre.
    Panorama,
}

impl From<ModeArg> for StitchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Scans => StitchMode::PlanarScan,
            ModeArg::Panorama => StitchMode::panoramic(),
        }
    }
}

/// Images loaded for one invocation, in command-line order.
struct Session {
    paths: Vec<PathBuf>,
    images: Vec<RgbImage>,
}

impl Session {
    fn load(paths: &[PathBuf]) -> Result<Self, Box<dyn Error>> {
        let images = paths
            .iter()
            .map(|p| {
                image::open(p)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| format!("cannot read {}: {e}", p.display()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            paths: paths.to_vec(),
            images,
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<StitcherConfig, Box<dyn Error>> {
    match path {
        Some(p) => {
            let data = fs::read_to_string(p)?;
            Ok(serde_json::from_str(&data)?)
        }
        None => Ok(StitcherConfig::default()),
    }
}

/// Names the failing stage in the message the user sees.
fn stage_error(err: StitchError) -> Box<dyn Error> {
    format!("{} failed: {err}", err.stage()).into()
}

fn run_features(first: &Path, second: &Path, config: &StitcherConfig) -> Result<(usize, usize, usize), Box<dyn Error>> {
    let session = Session::load(&[first.to_path_buf(), second.to_path_buf()])?;
    let features: Vec<_> = session
        .images
        .iter()
        .map(|img| extract(&convert_rgb_to_gray(img), &config.features))
        .collect();

    for (i, f) in features.iter().enumerate() {
        info!(image = %session.paths[i].display(), keypoints = f.len(), "features extracted");
        if f.len() < config.min_keypoint_count {
            return Err(stage_error(StitchError::InsufficientFeatures {
                image: i,
                found: f.len(),
                required: config.min_keypoint_count,
            }));
        }
    }

    let matching: &MatchConfig = &config.matching;
    let matches = match_descriptors(&features[0].descriptors, &features[1].descriptors, matching);
    if matches.len() < config.verify.min_match_count {
        return Err(stage_error(StitchError::InsufficientMatches {
            found: matches.len(),
            required: config.verify.min_match_count,
        }));
    }
    Ok((features[0].len(), features[1].len(), matches.len()))
}

fn run_stitch(session: &Session, config: StitcherConfig, output: &Path) -> Result<Panorama, Box<dyn Error>> {
    let stitcher = Stitcher::new(config);
    let panorama = stitcher.stitch(&session.images).map_err(stage_error)?;
    panorama
        .image
        .save(output)
        .map_err(|e| format!("cannot write {}: {e}", output.display()))?;
    info!(
        output = %output.display(),
        width = panorama.width(),
        height = panorama.height(),
        images = panorama.indices.len(),
        "panorama written"
    );
    Ok(panorama)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_thread_pool(cli.threads)?;

    match cli.command {
        Command::Features { first, second, config } => {
            let config = load_config(config.as_deref())?;
            let (a, b, matches) = run_features(&first, &second, &config)?;
            println!("keypoints: {a} / {b}, matches: {matches}");
        }
        Command::Stitch {
            images,
            output,
            mode,
            crop,
            max_features,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            if let Some(n) = max_features {
                config.features.max_features = n;
            }
            config.crop_black_borders |= crop;

            let session = Session::load(&images)?;
            let panorama = run_stitch(&session, config, &output)?;
            println!(
                "{}x{} panorama from {} of {} images written to {}",
                panorama.width(),
                panorama.height(),
                panorama.indices.len(),
                session.images.len(),
                output.display()
            );
        }
    }
    Ok(())
}
