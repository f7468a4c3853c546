//! birdtrip CLI - plan a birding road trip from the command line

use birdtrip::config::{Constraints, DateRange, ObservationQuality, Settings, StartLocation};
use birdtrip::{PipelineInput, PipelineRunner};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "birdtrip",
    version,
    about = "Plan a birding road trip from recent eBird observations"
)]
struct Cli {
    /// Target species (common names, scientific names, or eBird codes)
    #[arg(required = true)]
    species: Vec<String>,

    /// eBird region code, e.g. US-MA
    #[arg(long)]
    region: Option<String>,

    /// Starting latitude (requires --lng)
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Starting longitude (requires --lat)
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Days of observation history to consider (max 30)
    #[arg(long, default_value_t = 7)]
    days_back: u32,

    /// Maximum daily driving distance in km
    #[arg(long, default_value_t = 200)]
    max_daily_distance_km: u32,

    /// Maximum radius from the start point in km (defaults to the daily distance)
    #[arg(long)]
    max_travel_radius_km: Option<u32>,

    /// Observation window start, YYYY-MM-DD (requires --end-date)
    #[arg(long, requires = "end_date")]
    start_date: Option<String>,

    /// Observation window end, YYYY-MM-DD (requires --start-date)
    #[arg(long, requires = "start_date")]
    end_date: Option<String>,

    /// Minimum observation quality: any, valid, or reviewed
    #[arg(long, default_value = "any")]
    quality: String,

    /// Maximum stops per day
    #[arg(long, default_value_t = 8)]
    max_locations_per_day: usize,

    /// Minimum location score to include in the route
    #[arg(long, default_value_t = 0.3)]
    min_location_score: f64,

    /// Print the full pipeline result as JSON instead of the itinerary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let quality = match cli.quality.as_str() {
        "any" => ObservationQuality::Any,
        "valid" => ObservationQuality::Valid,
        "reviewed" => ObservationQuality::Reviewed,
        other => {
            return Err(format!("Unknown quality {other:?}; expected any, valid, or reviewed").into())
        }
    };

    let start_location = match (cli.lat, cli.lng) {
        (Some(lat), Some(lng)) => Some(StartLocation { lat, lng }),
        _ => None,
    };
    let date_range = match (cli.start_date, cli.end_date) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        _ => None,
    };

    let input = PipelineInput {
        species_list: cli.species,
        constraints: Constraints {
            start_location,
            region_code: cli.region,
            days_back: cli.days_back,
            max_daily_distance_km: cli.max_daily_distance_km,
            max_travel_radius_km: cli.max_travel_radius_km,
            date_range,
            min_observation_quality: quality,
            max_locations_per_day: cli.max_locations_per_day,
            min_location_score: cli.min_location_score,
            trip_duration_days: 1,
        },
    };

    let settings = Settings::from_env()?;
    let runner = PipelineRunner::from_settings(&settings);
    let result = runner.run(input).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.itinerary_markdown);
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
    }

    if result.success {
        Ok(())
    } else {
        Err(result
            .error
            .unwrap_or_else(|| "pipeline failed".to_string())
            .into())
    }
}
