//! `mkfs`: builds a fresh log-structured file system image from a list of host files.

mod builder;

use std::path::PathBuf;
use std::process::exit;

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("mkfs: {msg}");
    exit(1);
}

fn main() {
    let mut args = std::env::args_os().skip(1);

    let image_path = match args.next() {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("Usage: mkfs <image> [<file>...]");
            exit(1);
        }
    };

    let host_files: Vec<PathBuf> = args.map(PathBuf::from).collect();

    if let Err(e) = builder::build_image(&image_path, &host_files) {
        fail(format_args!("{}: {e}", image_path.display()));
    }
}
