use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use store_geocoder::batch::{run_batch, BatchOptions, ColumnMapping, Table};
use store_geocoder::config::Config;
use store_geocoder::geocode::{GeocodeRequest, RawPinCode};
use store_geocoder::map;
use store_geocoder::server::{self, state::AppState};

/// Store geocoder: addresses and pin codes to coordinates.
///
/// Tries Nominatim first and falls back to Google Maps when an API key is
/// configured (GOOGLE_MAPS_API_KEY or `[google] api-key`).
///
/// Examples:
///   geocoder resolve "12 MG Road, Bengaluru" --pin 560001
///   geocoder batch stores.csv --address-column Address --pin-column "Pin Code" -o out.csv
///   geocoder batch stores.csv --address-column Address --pin-column Pin --map stores.geojson
///   geocoder serve --port 8080
#[derive(Parser)]
#[command(name = "geocoder", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to <config dir>/store-geocoder/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Geocode a single address and print the result as JSON.
    Resolve {
        address: String,

        /// Pin code.
        #[arg(long)]
        pin: Option<String>,

        /// State qualifier added to the query candidates.
        #[arg(long)]
        state: Option<String>,
    },

    /// Geocode every row of a CSV/TSV file.
    Batch {
        input: PathBuf,

        #[arg(long)]
        address_column: String,

        #[arg(long)]
        pin_column: String,

        #[arg(long)]
        state: Option<String>,

        /// Process only the first N rows.
        #[arg(long)]
        max_records: Option<usize>,

        /// Output file. Defaults to stdout.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Output format: "csv", "tsv" or "json". Inferred from --output if omitted.
        #[arg(long, value_parser = parse_format)]
        format: Option<OutputFormat>,

        /// Also write a GeoJSON map layer of the successful rows.
        #[arg(long)]
        map: Option<PathBuf>,
    },

    /// Run the HTTP API.
    Serve {
        /// Overrides `[server] host`.
        #[arg(long)]
        host: Option<String>,

        /// Overrides `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Tsv,
    Json,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "csv" => Ok(OutputFormat::Csv),
        "tsv" | "tab" => Ok(OutputFormat::Tsv),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!("Unknown format '{}'. Use 'csv', 'tsv' or 'json'.", s)),
    }
}

fn infer_format(output: Option<&Path>) -> OutputFormat {
    let ext = output
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("tsv") | Some("tab") => OutputFormat::Tsv,
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Csv,
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Resolve {
            address,
            pin,
            state,
        } => {
            let resolver = config.build_resolver();
            let request = GeocodeRequest::new(address, RawPinCode::from(pin)).with_state(state);
            let result = resolver.resolve(&request);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Batch {
            input,
            address_column,
            pin_column,
            state,
            max_records,
            output,
            format,
            map: map_path,
        } => {
            let table = Table::from_path(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            if table.is_empty() {
                log::warn!("{} has no data rows", input.display());
            }

            let resolver = config.build_resolver();
            let columns = ColumnMapping {
                address: address_column,
                pin_code: pin_column,
            };
            let options = BatchOptions { state, max_records };
            let report = run_batch(&resolver, &table, &columns, &options, |p| {
                log::info!(
                    "Processing {}/{}: {}",
                    p.index + 1,
                    p.total,
                    p.address.chars().take(50).collect::<String>()
                );
            })?;

            let format = format.unwrap_or_else(|| infer_format(output.as_deref()));
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let mut writer = BufWriter::new(writer);
            match format {
                OutputFormat::Csv => report.write_delimited(&mut writer, b',')?,
                OutputFormat::Tsv => report.write_delimited(&mut writer, b'\t')?,
                OutputFormat::Json => report.write_json(&mut writer)?,
            }
            writer.flush()?;

            if let Some(path) = map_path {
                let layer = map::feature_collection(&report, &resolver.provider_names());
                std::fs::write(&path, serde_json::to_string_pretty(&layer)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                log::info!("Map layer written to {}", path.display());
            }

            eprintln!("{}", report.summary);
        }

        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let state = AppState::new(config.build_resolver());

            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            runtime
                .block_on(server::start(state, &host, port))
                .with_context(|| format!("serving on {}:{}", host, port))?;
        }
    }

    Ok(())
}
