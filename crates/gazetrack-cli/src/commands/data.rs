//! Artifact listing and statistics.

use gazetrack_core::Result;

pub fn files(api_url: &str, token: &str, kind: Option<&str>, stage_id: Option<u64>) -> Result<()> {
    let kind = kind.map(super::parse_kind).transpose()?;
    let channel = super::channel(api_url)?;
    let list = super::runtime()?.block_on(channel.list_artifacts(token, kind, stage_id))?;

    if list.files.is_empty() {
        println!("No artifacts.");
        return Ok(());
    }
    println!(
        "{:<24} {:>6} {:>10}  {}",
        "FILE", "STAGE", "BYTES", "UPLOADED"
    );
    for f in &list.files {
        println!(
            "{:<24} {:>6} {:>10}  {}",
            f.filename, f.stage_id, f.size, f.upload_time
        );
    }
    println!("{} file(s)", list.total_count);
    Ok(())
}

pub fn stats(api_url: &str, token: &str, stage_id: u64, kind: &str) -> Result<()> {
    let kind = super::parse_kind(kind)?;
    super::remote(api_url, |channel| async move {
        channel.stats(token, stage_id, kind).await
    })
}
