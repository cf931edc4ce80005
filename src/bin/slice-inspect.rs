use std::error::Error;

use resin_slice::{DecodeOptions, SliceFile, SliceFormat};
use structopt::StructOpt;

/// Extracts and prints header information from supported slice files.
#[derive(StructOpt, Debug)]
#[structopt(name = "slice-inspect", max_term_width = 80)]
struct Args {
    /// Also print every layer table record.
    #[structopt(short, long)]
    layers: bool,
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

    println!("format: {:?}", file.magic());
    match &file {
        SliceFile::Chitubox(f) => {
            println!("--- file header ---");
            println!("{:#x?}", f.header);
            println!("--- print parameters ---");
            println!("{:#x?}", f.print_parameters);
            println!("--- slicer info ---");
            println!("{:#x?}", f.slicer_info);
        }
        SliceFile::Phz(f) => {
            println!("--- file header ---");
            println!("{:#x?}", f.header);
        }
    }
    println!(
        "machine name: {:?}",
        String::from_utf8_lossy(&file.machine().machine_name)
    );
    for (size, preview) in [
        ("small", file.preview(resin_slice::PreviewSize::Small)),
        ("large", file.preview(resin_slice::PreviewSize::Large)),
    ] {
        println!("--- {} preview image ---", size);
        match preview {
            Some(p) => println!("{:#x?}", p.header),
            None => println!("(none)"),
        }
    }

    let table = file.layer_table();
    println!(
        "--- layer table: {} layers x {} levels ---",
        table.layer_count(),
        table.levels()
    );
    if args.layers {
        for (i, record) in table.records().iter().enumerate() {
            println!("{}: {:#x?}", i, record);
        }
    }

    Ok(())
}
