//! Command-line front end: normalize a tracker export or score it against a
//! routing service.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;

use track_anomaly::geometry::ConstantSpeedRouter;
use track_anomaly::http::DEFAULT_OSRM_URL;
use track_anomaly::{
    normalize_file, summarize, AnomalyThresholds, GeometryResolver, NormalizeConfig, OsrmClient,
    RouteStore, RoutingConfig, RoutingService, TrackError, TravelMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "GPS track normalization and anomaly scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize a CSV export and print the points as JSON
    Normalize(NormalizeArgs),
    /// Resolve road geometry for a CSV export and tag travel-time anomalies
    Score(ScoreArgs),
}

#[derive(Parser, Debug)]
struct NormalizeArgs {
    /// CSV file exported by the tracker
    input: PathBuf,

    /// Header row indices to try, in order (comma separated)
    #[arg(long, value_delimiter = ',', default_values_t = [0usize, 6])]
    header_rows: Vec<usize>,

    /// Offset applied to timestamps without a zone, e.g. +02:00
    #[arg(long, default_value = "+00:00", allow_hyphen_values = true)]
    utc_offset: String,
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    #[command(flatten)]
    input: NormalizeArgs,

    /// Travel mode: car, bike, foot or straight
    #[arg(long, default_value = "car")]
    mode: TravelMode,

    /// Base URL of an OSRM-compatible routing server
    #[arg(long, default_value = DEFAULT_OSRM_URL)]
    router_url: String,

    /// Route offline at a constant speed (km/h) instead of calling a server
    #[arg(long)]
    speed_kmh: Option<f64>,

    /// Overrun percent for a medium tag
    #[arg(long, default_value_t = 20.0)]
    warning: f64,

    /// Overrun percent for a high tag
    #[arg(long, default_value_t = 50.0)]
    danger: f64,

    /// Maximum waypoints per routing request
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,
}

impl NormalizeArgs {
    fn config(&self) -> Result<NormalizeConfig, TrackError> {
        Ok(NormalizeConfig {
            header_row_candidates: self.header_rows.clone(),
            utc_offset_minutes: parse_utc_offset(&self.utc_offset)?,
            ..NormalizeConfig::default()
        })
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HH` or `Z` into minutes east of UTC.
fn parse_utc_offset(text: &str) -> Result<i32, TrackError> {
    let invalid = || TrackError::Config {
        message: format!("Invalid UTC offset '{}', expected e.g. +02:00", text),
    };

    let text = text.trim();
    if text.eq_ignore_ascii_case("z") || text.is_empty() {
        return Ok(0);
    }

    let (sign, rest) = match text.as_bytes()[0] {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => (1, text),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    hours
        .checked_mul(60)
        .and_then(|m| m.checked_add(minutes))
        .map(|total| sign * total)
        .ok_or_else(invalid)
}

async fn run_normalize(args: NormalizeArgs) -> Result<(), Box<dyn Error>> {
    let config = args.config()?;
    let points = normalize_file(&args.input, &config)?;
    info!("Normalized {} points from {}", points.len(), args.input.display());
    println!("{}", serde_json::to_string_pretty(&points)?);
    Ok(())
}

async fn run_score(args: ScoreArgs) -> Result<(), Box<dyn Error>> {
    let config = args.input.config()?;
    let thresholds = AnomalyThresholds::new(args.warning, args.danger)?;
    let routing = RoutingConfig {
        chunk_size: args.chunk_size,
        timeout_ms: args.timeout_secs.saturating_mul(1000),
    };

    let service: Arc<dyn RoutingService> = match args.speed_kmh {
        Some(speed) => Arc::new(ConstantSpeedRouter::from_kmh(speed)),
        None => Arc::new(OsrmClient::new(
            &args.router_url,
            Duration::from_secs(args.timeout_secs),
        )?),
    };
    let resolver = GeometryResolver::new(service, routing)?;

    let store = RouteStore::new();
    let id = store.import_file(&args.input.input, &config).await?;
    store
        .refresh_geometry(&id, &resolver, args.mode, &thresholds, None)
        .await?;

    let route = store
        .get(&id)
        .await
        .ok_or_else(|| TrackError::RouteNotFound { id: id.clone() })?;
    let summary = summarize(&route.points);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "route": route, "summary": summary }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Normalize(args) => run_normalize(args).await,
        Command::Score(args) => run_score(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+02:00").unwrap(), 120);
        assert_eq!(parse_utc_offset("-05:30").unwrap(), -330);
        assert_eq!(parse_utc_offset("3").unwrap(), 180);
        assert_eq!(parse_utc_offset("Z").unwrap(), 0);
        assert!(parse_utc_offset("+02:75").is_err());
        assert!(parse_utc_offset("east").is_err());
        assert!(parse_utc_offset("+600000000").is_err());
        assert!(parse_utc_offset("-99999999:30").is_err());
        assert!(parse_utc_offset("+-5").is_err());
    }

    #[test]
    fn test_huge_offset_rejected_by_config() {
        let args = NormalizeArgs {
            input: PathBuf::from("track.csv"),
            header_rows: vec![0],
            utc_offset: "+600000".to_string(),
        };
        let config = args.config().unwrap();
        assert!(matches!(config.date_parser(), Err(TrackError::Config { .. })));
    }
}
