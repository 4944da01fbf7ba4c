//! Command-line interface implementation

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::convert::{self, ConvertOptions, Format, Source};
use crate::error::KanimError;
use crate::kanim::DumpSink;

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;
/// A chunk whose magic bytes are wrong, usually build and anim files swapped.
const EXIT_BAD_HEADER: u8 = 2;
const EXIT_INVALID_ARGS: u8 = 3;

/// kanimate - Convert Klei animation data (kanim) to and from Spriter projects (scml)
#[derive(Parser)]
#[command(name = "kanimate")]
#[command(about = "Convert Klei animation data (kanim) to and from Spriter projects (scml)")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert kanim to scml. Equivalent to 'convert -I kanim -O scml'
    Scml {
        /// The build file, anim file, and atlas image, in any order
        files: Vec<PathBuf>,

        #[command(flatten)]
        common: CommonOptions,
    },

    /// Convert scml to kanim. Equivalent to 'convert -I scml -O kanim'
    Kanim {
        /// The project file. Sprites are the .png files beside it
        scml: PathBuf,

        #[command(flatten)]
        common: CommonOptions,
    },

    /// Convert between formats, including a format to itself
    Convert {
        /// The input format, from [kanim, scml]
        #[arg(short = 'I', long = "input-format")]
        input_format: String,

        /// The output format, from [kanim, scml]
        #[arg(short = 'O', long = "output-format")]
        output_format: String,

        /// The input files for the chosen input format
        files: Vec<PathBuf>,

        #[command(flatten)]
        common: CommonOptions,
    },

    /// Read either format and print a JSON summary of its contents
    Info {
        /// Either a project file or the kanim file triple
        files: Vec<PathBuf>,

        #[command(flatten)]
        common: CommonOptions,
    },
}

/// Flags shared by every subcommand.
#[derive(Args)]
pub struct CommonOptions {
    /// Directory to write result files into
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Totally silence output on success
    #[arg(short, long)]
    silent: bool,

    /// Treat recoverable project problems as fatal
    #[arg(short = 'S', long)]
    strict: bool,

    /// Fill in missing keyframes before reading a project
    #[arg(short, long)]
    interpolate: bool,

    /// Flatten bone hierarchies before reading a project
    #[arg(short = 'b', long)]
    debone: bool,

    /// Write a line-by-line trace of binary decoding to this file
    #[arg(long)]
    dump: Option<PathBuf>,
}

impl CommonOptions {
    fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            strict: self.strict,
            interpolate: self.interpolate,
            debone: self.debone,
        }
    }
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_INVALID_ARGS,
            });
        }
    };

    match cli.command {
        Commands::Scml { files, common } => {
            run_convert(&files, Format::Kanim, Format::Scml, &common)
        }
        Commands::Kanim { scml, common } => {
            run_convert(&[scml], Format::Scml, Format::Kanim, &common)
        }
        Commands::Convert {
            input_format,
            output_format,
            files,
            common,
        } => {
            let source = match input_format.parse::<Format>() {
                Ok(format) => format,
                Err(error) => {
                    eprintln!("Error: {error}");
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
            };
            let target = match output_format.parse::<Format>() {
                Ok(format) => format,
                Err(error) => {
                    eprintln!("Error: {error}");
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
            };
            run_convert(&files, source, target, &common)
        }
        Commands::Info { files, common } => run_info(&files, &common),
    }
}

/// Execute a conversion end to end: load, convert, save.
fn run_convert(
    files: &[PathBuf],
    source_format: Format,
    target_format: Format,
    common: &CommonOptions,
) -> ExitCode {
    let options = common.convert_options();

    if common.verbose {
        eprintln!("Reading {source_format} input.");
    }
    let source = match load_source(files, source_format) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let mut dump_file = match open_dump(common) {
        Ok(file) => file,
        Err(code) => return code,
    };
    let mut sink = match dump_file.as_mut() {
        Some(file) => DumpSink::to(file),
        None => DumpSink::disabled(),
    };

    let outcome = match convert::convert(source, target_format, &options, &mut sink) {
        Ok(outcome) => outcome,
        Err(error) => return report_error(&error),
    };

    for warning in &outcome.warnings {
        eprintln!("Warning: {warning}");
    }

    if common.verbose {
        eprintln!(
            "Writing {} {target_format} file(s) to '{}'.",
            outcome.files.len(),
            common.output.display()
        );
    }
    if let Err(error) = outcome.files.save_to_dir(&common.output) {
        return report_error(&error);
    }

    if !common.silent {
        for name in outcome.files.names() {
            println!("Saved: {}", common.output.join(name).display());
        }
    }
    ExitCode::from(EXIT_SUCCESS)
}

/// Execute the info command: decode and print a JSON summary.
fn run_info(files: &[PathBuf], common: &CommonOptions) -> ExitCode {
    let options = common.convert_options();
    let format = if files
        .iter()
        .any(|path| path.extension().is_some_and(|ext| ext == "scml"))
    {
        Format::Scml
    } else {
        Format::Kanim
    };

    let source = match load_source(files, format) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let mut dump_file = match open_dump(common) {
        Ok(file) => file,
        Err(code) => return code,
    };
    let mut sink = match dump_file.as_mut() {
        Some(file) => DumpSink::to(file),
        None => DumpSink::disabled(),
    };

    let outcome = match source.read(&options, &mut sink) {
        Ok(outcome) => outcome,
        Err(error) => return report_error(&error),
    };
    for warning in &outcome.warnings {
        eprintln!("Warning: {warning}");
    }

    match serde_json::to_string_pretty(&outcome.set.summary()) {
        Ok(text) => {
            println!("{text}");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn report_error(error: &KanimError) -> ExitCode {
    eprintln!("Error: {error}");
    match error {
        KanimError::HeaderMismatch { .. } => ExitCode::from(EXIT_BAD_HEADER),
        _ => ExitCode::from(EXIT_ERROR),
    }
}

fn open_dump(common: &CommonOptions) -> Result<Option<File>, ExitCode> {
    match &common.dump {
        Some(path) => match File::create(path) {
            Ok(file) => Ok(Some(file)),
            Err(error) => {
                eprintln!(
                    "Error: cannot create dump file '{}': {error}",
                    path.display()
                );
                Err(ExitCode::from(EXIT_INVALID_ARGS))
            }
        },
        None => Ok(None),
    }
}

fn load_source(files: &[PathBuf], format: Format) -> Result<Source, KanimError> {
    match format {
        Format::Kanim => load_kanim_source(files),
        Format::Scml => load_scml_source(files),
    }
}

/// Sorts the given paths into build, anim, and atlas roles by name, so the
/// three files can be passed in any order.
fn load_kanim_source(files: &[PathBuf]) -> Result<Source, KanimError> {
    let mut build: Option<Vec<u8>> = None;
    let mut anim: Option<Vec<u8>> = None;
    let mut atlas: Option<Vec<u8>> = None;

    for path in files {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        // "build" is checked first so "animation_build.bytes" lands right.
        let slot = if name.ends_with(".png") {
            &mut atlas
        } else if name.contains("build") {
            &mut build
        } else if name.contains("anim") {
            &mut anim
        } else {
            return Err(KanimError::ProjectStructure(format!(
                "cannot tell whether \"{}\" is the build or anim file; name it *build*.bytes or *anim*.bytes",
                path.display()
            )));
        };
        if slot.replace(fs::read(path)?).is_some() {
            return Err(KanimError::ProjectStructure(format!(
                "\"{}\" fills a role another argument already filled",
                path.display()
            )));
        }
    }

    match (build, anim, atlas) {
        (Some(build), Some(anim), Some(atlas)) => Ok(Source::Kanim { build, anim, atlas }),
        _ => Err(KanimError::ProjectStructure(
            "kanim input needs a build file, an anim file, and an atlas image".to_string(),
        )),
    }
}

/// Loads the project file plus every sibling .png as a loose sprite.
fn load_scml_source(files: &[PathBuf]) -> Result<Source, KanimError> {
    let [path] = files else {
        return Err(KanimError::ProjectStructure(
            "scml input takes exactly one project file".to_string(),
        ));
    };

    let document = fs::read_to_string(path)?;
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let pattern = directory.join("*.png");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|error| {
        KanimError::ProjectStructure(format!("bad sprite search pattern: {error}"))
    })?;

    let mut sprites = Vec::new();
    for entry in entries {
        let sprite_path = entry.map_err(|error| KanimError::Io(error.into_error()))?;
        let name = sprite_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image = image::open(&sprite_path)?.to_rgba8();
        sprites.push((name, image));
    }

    Ok(Source::Scml { document, sprites })
}
