use std::path::PathBuf;
use std::time::Duration;

use gazetrack_client::{CaptureRuntime, ClientConfig, HttpChannel};
use gazetrack_core::{Error, FixationProfile, Result, SyntheticGazeSource};

pub struct ClientCommandConfig<'a> {
    pub api_url: &'a str,
    pub token: &'a str,
    pub poll_interval: Duration,
    pub sample_interval: Duration,
    pub status_interval: Duration,
    pub profile: &'a str,
    pub state_file: Option<PathBuf>,
}

pub fn run(cmd: ClientCommandConfig<'_>, duration: Option<Duration>) -> Result<()> {
    let profile = FixationProfile::by_name(cmd.profile)
        .ok_or_else(|| Error::bad_request(format!("unknown profile: {}", cmd.profile)))?;
    let config = ClientConfig {
        api_base_url: cmd.api_url.to_string(),
        token: cmd.token.to_string(),
        poll_interval: cmd.poll_interval,
        sample_interval: cmd.sample_interval,
        status_interval: cmd.status_interval,
        profile,
        state_file: cmd.state_file,
        ..ClientConfig::default()
    };
    let source = SyntheticGazeSource::new(config.profile.frame_width, config.profile.frame_height);

    println!("👁  gazetrack client v{}", gazetrack_core::VERSION);
    println!("   server   {}", config.api_base_url);
    println!(
        "   test     {}…",
        gazetrack_core::lifecycle::token_prefix(&config.token)
    );
    println!("   profile  {}", cmd.profile);
    println!(
        "   polling every {:?}, sampling every {:?}",
        config.poll_interval, config.sample_interval
    );
    if let Some(path) = &config.state_file {
        println!("   ledger   {}", path.display());
    }
    println!("   Ctrl-C to stop; active stages are uploaded and stopped first.");
    println!();

    let channel = HttpChannel::new(&config.api_base_url, config.request_timeout)?;
    let runtime = CaptureRuntime::new(channel, config)?;

    let rt = super::runtime()?;
    let status = rt.block_on(runtime.run(source, async move {
        match duration {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(limit) => log::info!("capture window of {limit:?} elapsed"),
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }));

    println!();
    println!(
        "{} stop(s) processed, {} upload(s) left parked",
        status.processed_stops, status.parked_uploads
    );
    Ok(())
}
