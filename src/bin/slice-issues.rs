use std::error::Error;

use resin_slice::{
    DecodeOptions, IslandDetector, IssueKind, SliceFile, SliceFormat,
};
use structopt::StructOpt;

/// Reports unsupported islands and clipped layers in a slice file.
#[derive(StructOpt, Debug)]
#[structopt(name = "slice-issues", max_term_width = 80)]
struct Args {
    /// Supporting pixels below a region that make it safe regardless of its
    /// size.
    #[structopt(long, default_value = "5")]
    required_support: u32,
    /// Directory to export every layer into as a grayscale PNG.
    #[structopt(long, parse(from_os_str))]
    export: Option<std::path::PathBuf>,
    /// Fail on corrupted layer data instead of skipping bad runs.
    #[structopt(long)]
    strict: bool,
    /// File to read.
    #[structopt(parse(from_os_str))]
    input: std::path::PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let args = Args::from_args();
    let options = DecodeOptions {
        strict_rle: args.strict,
    };
    let file = SliceFile::open(&args.input, &options)?;
    let layers = file.layers();

    if let Some(dir) = &args.export {
        std::fs::create_dir_all(dir)?;
        for layer in layers {
            layer.image()?.save(dir.join(layer.filename()))?;
        }
        log::info!("exported {} layers to {}", layers.len(), dir.display());
    }

    let detector = IslandDetector::new(args.required_support)
        .with_sub_images(file.layer_table().levels());
    let found = detector.scan(layers)?;
    let mut islands = 0;
    for (index, issues) in &found {
        for issue in issues {
            let (x, y) = issue.first_pixel().unwrap_or_default();
            let kind = match issue.kind {
                IssueKind::Island => {
                    islands += 1;
                    "island"
                }
                IssueKind::TouchingBound => "touching bounds",
            };
            println!(
                "layer {}: {} of {} pixels at ({}, {})",
                index,
                kind,
                issue.size(),
                x,
                y
            );
        }
    }
    println!(
        "{} layers checked, {} with issues, {} islands",
        layers.len(),
        found.len(),
        islands
    );

    Ok(())
}
