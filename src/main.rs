//! kanimate - Command-line tool for converting Klei animation data to and from Spriter projects

use std::process::ExitCode;

use kanimate::cli;

fn main() -> ExitCode {
    cli::run()
}
