//! Experimenter-side lifecycle commands.

use gazetrack_client::ControlChannel;
use gazetrack_core::{CalibrationPoint, Result};

pub fn create(api_url: &str, name: &str) -> Result<()> {
    super::remote(api_url, |channel| async move { channel.create_test(name).await })
}

pub fn start(
    api_url: &str,
    token: &str,
    test_number: Option<u32>,
    calibration_point: Option<u8>,
) -> Result<()> {
    let calibration_point = calibration_point.map(CalibrationPoint::new).transpose()?;
    super::remote(api_url, |channel| async move {
        channel
            .start_stage(token, test_number, calibration_point)
            .await
    })
}

pub fn stop(api_url: &str, token: &str, stage_id: u64) -> Result<()> {
    super::remote(api_url, |channel| async move {
        channel.stop_stage(token, stage_id).await
    })
}

pub fn deactivate(api_url: &str, token: &str) -> Result<()> {
    super::remote(api_url, |channel| async move {
        channel.deactivate_test(token).await
    })
}

pub fn commands(api_url: &str, token: &str) -> Result<()> {
    super::remote(api_url, |channel| async move {
        channel.poll_commands(token).await
    })
}
