//! Break flash images and firmware files down into their parts
//!
//! Given a full SPI flash image, the flash descriptor tells where the regions
//! are. The BIOS region is scanned for UEFI firmware volumes, the ME region
//! holds a partition table. For anything else, e.g. vendor update packages or
//! pieces extracted from images, the format is first guessed from its header.

use std::fs;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, error, info};

mod show;

use flash_tree::check::Registry;

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify, parse and display a file as a tree
    #[clap(verbatim_doc_comment)]
    Show {
        /// File to read
        file_name: String,
    },
    /// Print the detected format of each file
    #[clap(verbatim_doc_comment)]
    Classify {
        /// Files to read
        #[clap(required = true)]
        file_names: Vec<String>,
    },
}

/// Decompose SPI flash images and classify firmware files
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command to run
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, short, action, global = true)]
    debug: bool,
    #[clap(long, short, action, global = true)]
    verbose: bool,
}

fn main() -> ExitCode {
    let Cli {
        cmd,
        debug,
        verbose,
    } = Cli::parse();

    // Default to log level "info". Otherwise, you get no "regular" logs.
    let level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();

    let registry = Registry::builtin();
    debug!("{} testers", registry.testers().len());

    match cmd {
        Command::Show { file_name } => {
            info!("Reading {file_name}...");
            let data = match fs::read(&file_name) {
                Ok(d) => d,
                Err(e) => {
                    error!("Cannot read {file_name}: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let Some((tester, res)) = registry.open(&data) else {
                error!("{file_name}: unknown format");
                return ExitCode::FAILURE;
            };
            match res {
                Ok(image) => show::show(tester, &image, verbose),
                Err(e) => {
                    error!("{file_name} looks like {}, but: {e:?}", tester.name);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Classify { file_names } => {
            let mut ok = true;
            for f in file_names {
                match fs::read(&f) {
                    Ok(data) => {
                        let n = registry.classify(&data).map_or("unknown", |t| t.name);
                        println!("{f}: {n}");
                    }
                    Err(e) => {
                        error!("Cannot read {f}: {e}");
                        ok = false;
                    }
                }
            }
            if !ok {
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
