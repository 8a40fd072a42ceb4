//! imagegate - An HTTP image transformation gateway.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagegate::{
    config::{Cli, Command, ServeConfig, SignConfig, SignOutputFormat},
    engine::{load_font, ImageEngine, RasterEngine},
    operations::OperationContext,
    server::{create_router, AppState, UrlSigner},
    source::{SourceRegistry, USER_AGENT},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sign(config) => run_sign(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Cannot load font: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let placeholder = match config.load_placeholder(engine.as_ref()) {
        Ok(placeholder) => placeholder,
        Err(e) => {
            error!("Cannot load placeholder: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let http = match reqwest::Client::builder().user_agent(USER_AGENT).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Cannot create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let source_config = Arc::new(config.source_config());
    let sources = SourceRegistry::with_defaults().load_all(source_config.clone());

    let mut router_config = config.router_config();
    if let Some(placeholder) = placeholder {
        router_config = router_config.with_placeholder(placeholder, config.placeholder_status_code());
    }

    log_configuration(&config, &router_config, engine.name());

    let state = AppState::new(OperationContext::new(engine, http), sources, router_config);
    let router = create_router(state);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("imagegate {} listening on http://{}", env!("CARGO_PKG_VERSION"), addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

fn build_engine(config: &ServeConfig) -> Result<Arc<dyn ImageEngine>, String> {
    let engine = match config.font {
        Some(ref path) => RasterEngine::with_font(load_font(path).map_err(|e| e.to_string())?),
        None => RasterEngine::new(),
    };
    Ok(Arc::new(engine))
}

fn log_configuration(
    config: &ServeConfig,
    router: &imagegate::server::RouterConfig,
    engine: &str,
) {
    info!("Configuration:");
    info!("  Engine: {}", engine);
    info!("  Path prefix: {}", config.path_prefix);

    if let Some(ref mount) = config.mount {
        info!("  Mount: {}", mount.display());
    }
    if config.enable_url_source {
        if config.allowed_origins.is_empty() {
            warn!("  URL source: enabled for every origin");
        } else {
            info!("  URL source: {}", config.allowed_origins.join(", "));
        }
    }
    if config.enable_s3_source {
        info!("  S3 source: region {}", config.s3_region);
        if let Some(ref endpoint) = config.s3_endpoint {
            info!("  S3 endpoint: {}", endpoint);
        }
    }
    if config.enable_azure_source {
        info!(
            "  Azure source: account {}",
            config.azure_account_name.as_deref().unwrap_or("")
        );
    }

    if router.api_key.is_some() {
        info!("  API key: required");
    }
    if router.url_signature_key.is_some() {
        info!("  URL signature: enabled");
    }
    if config.enable_auth_forwarding && !config.enable_url_source {
        warn!("  Auth forwarding has no effect without --enable-url-source");
    }
    if router.concurrency > 0 {
        info!("  Throttle: {} req/s per method, burst {}", router.concurrency, router.burst);
    }
    match router.http_cache_ttl {
        Some(0) => info!("  Cache headers: no-cache"),
        Some(ttl) => info!("  Cache headers: {}s", ttl),
        None => {}
    }
    if !router.disabled_endpoints.is_empty() {
        info!("  Disabled endpoints: {}", router.disabled_endpoints.join(", "));
    }
    if router.placeholder.is_some() {
        info!("  Placeholder: enabled");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "imagegate=debug,tower_http=debug"
    } else {
        "imagegate=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let signer = UrlSigner::new(&config.key);
    let query = config.query();

    match config.format {
        SignOutputFormat::Raw => {
            println!("{}", signer.sign(&config.path, query));
        }
        SignOutputFormat::Query => {
            println!("{}", signer.signed_query(&config.path, query));
        }
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "path": config.path,
                "query": signer.signed_query(&config.path, query),
                "signature": signer.sign(&config.path, query),
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
