use gazetrack_core::Result;
use gazetrack_server::ServerConfig;

pub fn run(config: ServerConfig) -> Result<()> {
    let base = format!("http://{}:{}", config.host, config.port);

    println!("👁  gazetrack server v{}", gazetrack_core::VERSION);
    println!("   {base}");
    println!("   artifacts in {}", config.data_dir.display());
    println!(
        "   admin routes {}",
        if config.admin_token.is_some() {
            "enabled"
        } else {
            "disabled (set --admin-token)"
        }
    );
    println!();
    println!("   Endpoints:");
    println!("     GET  /                                API index (try: curl {base})");
    println!("     POST /api/tracking/tests              Create a test");
    println!("     POST /api/tracking/{{token}}/start      Start a stage");
    println!("     POST /api/tracking/{{token}}/stop       Stop a stage");
    println!("     GET  /api/tracking/{{token}}/commands   Command snapshot");
    println!("     POST /api/data/{{token}}/upload         Upload an artifact");
    println!("     GET  /api/data/{{token}}/files          List artifacts");
    println!("     GET  /api/data/{{token}}/stats          Artifact statistics");
    println!();
    println!("   Examples:");
    println!("     curl -X POST {base}/api/tracking/tests -H 'content-type: application/json' -d '{{\"name\":\"T1\"}}'");
    println!("     curl {base}/api/tracking/<token>/commands");
    println!();

    let rt = super::runtime()?;
    rt.block_on(gazetrack_server::run_server(config))?;
    Ok(())
}
