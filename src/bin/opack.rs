use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// one-shot packer: walk a directory tree and emit a zlib-compressed
/// SquashFS 4.0 image
#[derive(Parser, Debug)]
#[command(author, version, name = "opack")]
struct Args {
    /// Directory tree to pack
    input_directory: PathBuf,

    /// Squashfs image to create
    output_file: PathBuf,
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opack=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // `spec.md` §6/§7: wrong argument count exits 1, not clap's
            // default 2.
            print!("{e}");
            return ExitCode::FAILURE;
        },
    };

    if !args.input_directory.is_dir() {
        error!("{} is not a directory", args.input_directory.display());
        return ExitCode::FAILURE;
    }

    match opack::pack(&args.input_directory, &args.output_file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        },
    }
}
