//! Inspect a cascade file: dump its header bytes and summarize its stages.
//!
//! Usage:
//!   cascade-info facefinder
//!   cascade-info model.bin --format staged --stages

use std::path::PathBuf;

use clap::Parser;
use pepe_face::{read_cascade_bytes, CascadeForest, ModelFormat};

#[derive(Parser, Debug)]
#[command(name = "cascade-info")]
#[command(author, version, about = "Inspect a cascade model file", long_about = None)]
struct Args {
    /// Cascade model path (.bz2 files are decompressed)
    model: PathBuf,

    /// Cascade file layout
    #[arg(long, value_enum, default_value_t = ModelFormat::Pigo)]
    format: ModelFormat,

    /// Number of leading bytes to dump
    #[arg(long, default_value_t = 64)]
    header_bytes: usize,

    /// List every stage with its threshold
    #[arg(long)]
    stages: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn hex_dump(bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        print!("{:04x}: ", i * 16);
        for b in chunk {
            print!("{:02x} ", b);
        }
        print!("{:width$} ", "", width = (16 - chunk.len()) * 3);
        for b in chunk {
            if b.is_ascii_graphic() || *b == b' ' {
                print!("{}", *b as char);
            } else {
                print!(".");
            }
        }
        println!();
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model: {}", args.model.display());

    let bytes = read_cascade_bytes(&args.model)?;

    let shown = bytes.len().min(args.header_bytes);
    println!("\nFirst {} of {} bytes:", shown, bytes.len());
    hex_dump(&bytes[..shown]);

    println!("\nParsing as {:?}...", args.format);
    let forest = CascadeForest::parse(&bytes, args.format)?;

    println!("  stages: {}", forest.num_stages());
    println!("  trees:  {}", forest.num_trees());
    println!("  depth:  {}", forest.depth());

    let thresholds: Vec<f32> = forest.stages().iter().map(|s| s.threshold).collect();
    if let (Some(first), Some(last)) = (thresholds.first(), thresholds.last()) {
        println!("  first threshold: {:.4}", first);
        println!("  last threshold:  {:.4}", last);
    }

    if args.stages {
        println!("\n{:>6} {:>6} {:>12}", "stage", "trees", "threshold");
        for (i, stage) in forest.stages().iter().enumerate() {
            println!("{:>6} {:>6} {:>12.4}", i, stage.trees.len(), stage.threshold);
        }
    }

    Ok(())
}
