use std::net::SocketAddr;

use anyhow::anyhow;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use callbridge_gateway::{routes, ServerConfig};
use callbridge_gateway::config::{env_opt, OPTIONAL_ENV, REQUIRED_ENV};
use callbridge_gateway::state::AppState;

/// Callbridge Gateway - carrier-to-realtime-model voice bridge
#[derive(Parser, Debug)]
#[command(name = "callbridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen host override
    #[arg(long)]
    host: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the environment-variable presence matrix and exit
    EnvCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,callbridge_gateway=debug".parse().expect("static filter")),
        )
        .init();

    // Crypto provider for outbound TLS (model socket, credential endpoint).
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::EnvCheck) = cli.command {
        for key in REQUIRED_ENV {
            println!("{key}=set:{} (required)", env_opt(key).is_some());
        }
        for key in OPTIONAL_ENV {
            println!("{key}=set:{}", env_opt(key).is_some());
        }
        return Ok(());
    }

    let mut config = ServerConfig::from_env().map_err(|e| anyhow!(e))?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; credential minting and bridging will fail");
    }
    if config.public_base_url.is_none() {
        tracing::warn!("PUBLIC_BASE_URL is not set; control documents cannot reference this host");
    }

    let address = config.address();
    let tls_config = config.tls.clone();
    let cors_origins = config.cors_allowed_origins.clone();

    let app_state = AppState::new(config).await;

    // CORS: explicit origins, wildcard, or same-origin only.
    let cors_layer = match cors_origins.as_deref() {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
    };

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app: Router = routes::create_api_router()
        .merge(routes::create_stream_router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    if let Some(tls) = tls_config {
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        info!("listening on https://{socket_addr}");
        axum_server::bind_rustls(socket_addr, rustls_config)
            .serve(app.into_make_service())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        info!("listening on http://{socket_addr}");
        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
