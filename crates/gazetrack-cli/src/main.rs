//! CLI for gazetrack: remote gaze capture and attention heatmaps.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use commands::parse_duration;

#[derive(Parser)]
#[command(name = "gazetrack")]
#[command(about = "gazetrack: remote gaze capture, fixations and attention heatmaps")]
#[command(version = gazetrack_core::VERSION)]
struct Cli {
    /// Server root used by the remote subcommands
    #[arg(
        long,
        global = true,
        env = "GAZETRACK_API_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Server {
        /// Bind address
        #[arg(long, env = "GAZETRACK_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, env = "GAZETRACK_PORT", default_value = "8000")]
        port: u16,

        /// Directory for uploaded artifacts
        #[arg(long, env = "GAZETRACK_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Bearer token for /api/admin/*; admin routes are closed when unset
        #[arg(long, env = "GAZETRACK_ADMIN_TOKEN")]
        admin_token: Option<String>,
    },

    /// Run the capture client for one test until Ctrl-C
    Client {
        /// Token of the test to follow
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,

        /// Command poll interval (e.g. "2s", "500ms")
        #[arg(long, env = "GAZETRACK_POLL_INTERVAL", default_value = "2s", value_parser = parse_duration)]
        poll_interval: Duration,

        /// Gaze sampling interval
        #[arg(long, env = "GAZETRACK_SAMPLE_INTERVAL", default_value = "100ms", value_parser = parse_duration)]
        sample_interval: Duration,

        /// Status report interval
        #[arg(long, env = "GAZETRACK_STATUS_INTERVAL", default_value = "1s", value_parser = parse_duration)]
        status_interval: Duration,

        /// Fixation profile
        #[arg(long, env = "GAZETRACK_PROFILE", default_value = "synthetic", value_parser = ["synthetic", "hardware"])]
        profile: String,

        /// Persist processed stops here so a restart does not re-upload
        #[arg(long, env = "GAZETRACK_STATE_FILE")]
        state_file: Option<PathBuf>,

        /// Stop on its own after this long (e.g. "5m")
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// Create a test and print its token
    Test {
        /// Test name
        name: String,
    },

    /// Start a new stage
    Start {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,

        #[arg(long)]
        test_number: Option<u32>,

        /// Calibration point 1-4
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        calibration_point: Option<u8>,
    },

    /// Stop a started stage
    Stop {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,

        #[arg(long)]
        stage_id: u64,
    },

    /// Stop every started stage of a test
    Deactivate {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,
    },

    /// Print the current command snapshot
    Commands {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,
    },

    /// List uploaded artifacts
    Files {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,

        /// Artifact type
        #[arg(long = "type", value_parser = ["heatmap", "heatmap_first", "heatmap_long"])]
        kind: Option<String>,

        #[arg(long)]
        stage_id: Option<u64>,
    },

    /// Statistics for one uploaded artifact
    Stats {
        #[arg(long, env = "GAZETRACK_TOKEN")]
        token: String,

        #[arg(long)]
        stage_id: u64,

        /// Artifact type
        #[arg(long = "type", default_value = "heatmap_long", value_parser = ["heatmap", "heatmap_first", "heatmap_long"])]
        kind: String,
    },

    /// Build a density grid from a raw heatmap CSV
    Heatmap {
        /// Raw `x,y,T,Tn` table
        input: PathBuf,

        /// Calibration reference files (up to four)
        #[arg(long = "calibration")]
        calibration: Vec<PathBuf>,

        /// Sample weighting
        #[arg(long, default_value = "uniform", value_parser = ["uniform", "early_attention", "dwell"])]
        weighting: String,

        /// Grid points per axis
        #[arg(long, default_value = "100")]
        resolution: usize,

        /// Write the density matrix as CSV
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let api_url = cli.api_url;

    let result = match cli.command {
        Commands::Server {
            host,
            port,
            data_dir,
            admin_token,
        } => commands::server::run(gazetrack_server::ServerConfig {
            host,
            port,
            data_dir,
            admin_token,
        }),
        Commands::Client {
            token,
            poll_interval,
            sample_interval,
            status_interval,
            profile,
            state_file,
            duration,
        } => commands::client::run(
            commands::client::ClientCommandConfig {
                api_url: &api_url,
                token: &token,
                poll_interval,
                sample_interval,
                status_interval,
                profile: &profile,
                state_file,
            },
            duration,
        ),
        Commands::Test { name } => commands::tracking::create(&api_url, &name),
        Commands::Start {
            token,
            test_number,
            calibration_point,
        } => commands::tracking::start(&api_url, &token, test_number, calibration_point),
        Commands::Stop { token, stage_id } => commands::tracking::stop(&api_url, &token, stage_id),
        Commands::Deactivate { token } => commands::tracking::deactivate(&api_url, &token),
        Commands::Commands { token } => commands::tracking::commands(&api_url, &token),
        Commands::Files {
            token,
            kind,
            stage_id,
        } => commands::data::files(&api_url, &token, kind.as_deref(), stage_id),
        Commands::Stats {
            token,
            stage_id,
            kind,
        } => commands::data::stats(&api_url, &token, stage_id, &kind),
        Commands::Heatmap {
            input,
            calibration,
            weighting,
            resolution,
            output,
        } => commands::heatmap::run(
            &input,
            &calibration,
            &weighting,
            resolution,
            output.as_deref(),
        ),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
