use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;

use terramap::{MapKind, NoiseFilter, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "terramap")]
#[command(about = "Generate layered terrain maps: elevation, slope, rivers and a color composite")]
struct Args {
    /// Width of the map in cells
    #[arg(short = 'W', long, default_value = "512")]
    width: usize,

    /// Height of the map in cells
    #[arg(short = 'H', long, default_value = "512")]
    height: usize,

    /// Random seed (uses a random seed if not specified)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Sea level as a percentage of the elevation maximum (0-100)
    #[arg(long, default_value = "50")]
    sea_level: u8,

    /// Noise filter as "scale:amplitude", e.g. --filter 100:80.
    /// Repeatable; order matters. Defaults to a three-layer stack.
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<NoiseFilter>,

    /// JSON pipeline config file; other flags except --seed are ignored
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for the rendered PNGs
    #[arg(short, long, default_value = "maps")]
    out: PathBuf,
}

fn parse_filter(s: &str) -> Result<NoiseFilter, String> {
    let (scale, amplitude) = s
        .split_once(':')
        .ok_or_else(|| format!("expected scale:amplitude, got '{}'", s))?;
    let scale: f64 = scale
        .parse()
        .map_err(|_| format!("bad filter scale '{}'", scale))?;
    let amplitude: f32 = amplitude
        .parse()
        .map_err(|_| format!("bad filter amplitude '{}'", amplitude))?;
    Ok(NoiseFilter::new(scale, amplitude))
}

const OUTPUTS: [(MapKind, &str); 6] = [
    (MapKind::Elevation, "elevation"),
    (MapKind::MeanElevation, "mean_elevation"),
    (MapKind::Slope, "slope"),
    (MapKind::LandMask, "land_mask"),
    (MapKind::River, "rivers"),
    (MapKind::Composite, "composite"),
];

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => {
            let mut config = PipelineConfig::new(args.width, args.height, 0, args.sea_level);
            if !args.filters.is_empty() {
                config.filters = args.filters.clone();
            }
            config.seed = rand::random();
            config
        }
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    println!(
        "Generating {}x{} terrain with seed {}",
        config.width, config.height, config.seed
    );
    println!(
        "Sea level: {}%, {} noise filters",
        config.sea_level,
        config.filters.len()
    );

    let mut pipeline = Pipeline::new(config)?;

    fs::create_dir_all(&args.out)?;
    for (kind, name) in OUTPUTS {
        let path = args.out.join(format!("{}.png", name));
        pipeline.image(kind)?.save(&path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
