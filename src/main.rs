mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rand::RngCore;

use cf_av::{CommandTemplate, FfmpegTemplate, SupervisorOptions, ToolRegistry};
use cf_core::config::Config;
use cf_core::{Ladder, Rendition};
use cf_server::store::SegmentStore;
use cf_server::vod::VodPackager;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting castforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    cf_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforge=trace,cf_server=trace,cf_av=trace,cf_core=debug,tower_http=debug".to_string()
        } else {
            "castforge=debug,cf_server=debug,cf_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Package {
            input,
            renditions,
            out,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(package_file(
                &input,
                renditions,
                out.as_deref(),
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("castforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::GenerateSecret => generate_secret(),
    }
}

/// Strict load when a path is given, defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(Config::default()),
    }
}

async fn package_file(
    input: &Path,
    renditions: Vec<Rendition>,
    out: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;

    if !input.is_file() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let ladder = if renditions.is_empty() {
        config.vod.ladder.clone()
    } else {
        Ladder::new(renditions)?
    };

    let root = out.unwrap_or(&config.storage.root);
    let store = Arc::new(SegmentStore::open(root)?);
    let tools = ToolRegistry::discover(&config.tools);
    tools.require("ffmpeg")?;
    let template: Arc<dyn CommandTemplate> = Arc::new(FfmpegTemplate::from_config(&config, &tools));

    let packager = VodPackager::new(
        store,
        template,
        SupervisorOptions::from_live(&config.live),
        Duration::from_secs(config.vod.timeout_secs),
    );

    println!(
        "Packaging {} ({} rendition{})...",
        input.display(),
        ladder.len(),
        if ladder.is_multi() { "s" } else { "" }
    );
    for rendition in &ladder {
        println!("  {rendition}");
    }

    let outcome = packager.package(input, &ladder).await?;

    println!("\nPackaging complete!");
    println!("Asset: {}", outcome.asset_id);
    println!("Manifest: {}", outcome.manifest.display());
    println!("Playlist URL: {}", outcome.playlist_url);
    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all().await {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable encoding.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Storage root: {}", config.storage.root.display());
    println!(
        "  Live window: {} x {}s segments, max {} sessions",
        config.live.list_size, config.live.segment_duration_secs, config.live.max_sessions
    );
    println!("  VOD ladder: {} rendition(s)", config.vod.ladder.len());
    println!(
        "  Signed URLs: {}",
        if config.signing.secret.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {warning}");
    }

    Ok(())
}

fn generate_secret() -> Result<()> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    println!("{}", hex::encode(bytes));
    Ok(())
}
