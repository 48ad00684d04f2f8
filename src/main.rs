use clap::Parser;
use docmerge::{DocmergeError, Docx, GenerateOptions, Result, fs_utils};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LONG_HELP: &str = r#"
Fields:
  MERGEFIELD name                - Value of `name` in the data
  MERGEFIELD customer.address.city - Dotted path into nested objects
  MERGEFIELD price|currency($)   - Value passed through a filter
  MERGEFIELD start:items ... MERGEFIELD end:items
                                 - Repeat the enclosed region per element of
                                   `items`, or keep it once if `items` is truthy
  Form checkboxes are ticked from the key named after the checkbox.

Filters:
  currency(SYMBOL), upcase, downcase, capitalize, titleize, reverse

Examples:
  # Merge a template with a data file
  docmerge offer.docx --data offer.json -o offer-ann.docx
  # Read the data from stdin, overwriting an earlier result
  cat offer.json | docmerge offer.docx --data - -o offer-ann.docx --force
  # Show the placeholders of a template
  docmerge offer.docx --tree
  # Show the shape of the data a template needs
  docmerge offer.docx --required
"#;

/// Fill merge fields in .docx templates from JSON data.
///
/// Copyright 2025 0x484558 @ aleph0 s.r.o.
/// Licensed under the EUPL v1.2.
#[derive(Parser, Debug)]
#[command(
    name = "docmerge",
    version,
    author = "0x484558 @ aleph0 s.r.o.",
    about = "Fill merge fields in .docx templates from JSON data.",
    after_long_help = LONG_HELP
)]
struct Cli {
    /// Template document (.docx)
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,

    /// JSON data file. Use '-' for stdin.
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "DOCMERGE_DATA",
        required_unless_present_any = ["tree", "required"]
    )]
    data: Option<PathBuf>,

    /// Output document (defaults to <TEMPLATE>.merged.docx)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Overwrite the output document if it exists
    #[arg(long)]
    force: bool,

    /// Print the placeholder tree of every part as JSON
    #[arg(long, conflicts_with = "required")]
    tree: bool,

    /// Print the data shape the template needs as JSON
    #[arg(long)]
    required: bool,

    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the command line flags
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("docmerge={level}").into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(&cli) {
        match e {
            DocmergeError::Merge(errors) => {
                match serde_json::to_string_pretty(&errors) {
                    Ok(json) => eprintln!("{json}"),
                    Err(_) => eprintln!("Error: {errors}"),
                }
            }
            other => eprintln!("Error: {other}"),
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let data = match &cli.data {
        Some(path) => fs_utils::read_data(path)?,
        None => Value::Object(Map::new()),
    };
    let docx = Docx::new(&cli.template, data)?;

    if cli.tree {
        return print_json(&serde_json::to_value(docx.to_tree()?)?);
    }
    if cli.required {
        return print_json(&docx.required_hash()?);
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| fs_utils::default_output_path(&cli.template));
    docx.generate(&output, &GenerateOptions { force: cli.force })?;
    info!(output = %output.display(), "done");
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut stdout = io::stdout();
    writeln!(stdout, "{json}")?;
    stdout.flush()?;
    Ok(())
}
