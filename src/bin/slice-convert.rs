use std::error::Error;
use std::path::Path;

use clap::arg_enum;
use resin_slice::{DecodeOptions, Magic, SliceFile, SliceFormat};
use structopt::StructOpt;

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Format {
        ctb,
        cbddlp,
        phz,
    }
}

impl From<Format> for Magic {
    fn from(f: Format) -> Self {
        match f {
            Format::ctb => Magic::CTB,
            Format::cbddlp => Magic::CBDDLP,
            Format::phz => Magic::PHZ,
        }
    }
}

/// Performs format conversions between supported slice file types.
#[derive(StructOpt, Debug)]
#[structopt(name = "slice-convert", max_term_width = 80)]
struct Args {
    /// Output encryption key override, or 0 to disable output encryption.
    ///
    /// Must be a 32-bit integer. If this option isn't present, the encryption
    /// key from the input (if any) will be reused. Ignored if the output format
    /// does not support encryption.
    #[structopt(long)]
    key: Option<u32>,
    /// Output antialiasing level override. For cbddlp output this is how many
    /// thresholded copies of each layer get stored.
    #[structopt(long)]
    antialias: Option<u32>,
    /// Input file format.
    ///
    /// If omitted, the format is taken from the file's magic number.
    #[structopt(short = "I", long, possible_values = &Format::variants(),
        case_insensitive = true)]
    input_format: Option<Format>,
    /// Output file format.
    ///
    /// If omitted, the format is guessed from the file extension. The format
    /// must be provided explicitly if the output file does not have an
    /// extension, or if the extension is non-standard.
    #[structopt(short = "O", long, possible_values = &Format::variants(),
        case_insensitive = true)]
    output_format: Option<Format>,
    /// Fail on corrupted layer data instead of skipping bad runs.
    #[structopt(long)]
    strict: bool,
    /// File to read.
    #[structopt(parse(from_os_str))]
    input: std::path::PathBuf,
    /// File to write.
    #[structopt(parse(from_os_str))]
    output: std::path::PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let args = Args::from_args();

    let output_format = args
        .output_format
        .map(Magic::from)
        .or_else(|| format_from_path(&args.output))
        .unwrap_or_else(|| {
            eprintln!(
                "output file must have a recognized extension, or \
            format must be specified"
            );
            std::process::exit(1);
        });

    let options = DecodeOptions {
        strict_rle: args.strict,
    };
    let input = SliceFile::open(&args.input, &options)?;
    if let Some(expected) = args.input_format.map(Magic::from) {
        if input.magic() != expected {
            eprintln!(
                "input is {:?}, not {:?}",
                input.magic(),
                expected
            );
            std::process::exit(1);
        }
    }
    log::info!(
        "read {:?} with {} layers",
        input.magic(),
        input.layer_count()
    );

    let mut output = input.convert(output_format)?;

    // Preserve the input key, unless an output key has been explicitly
    // provided.
    if let Some(key) = args.key {
        output.set_encryption_key(key);
    }
    if let Some(level) = args.antialias {
        match &mut output {
            SliceFile::Chitubox(f) => f.set_antialias_level(level),
            SliceFile::Phz(f) => {
                f.header.antialias_level = resin_slice::U32LE::new(level);
                f.header.antialias_level_again = resin_slice::U32LE::new(level);
            }
        }
    }

    output.save(&args.output)?;
    Ok(())
}

fn format_from_path(path: &Path) -> Option<Magic> {
    Magic::from_extension(path.extension()?.to_str()?)
}
