use tokio::net::TcpListener;
use tracing::{info, warn};

use tubeproxy::{
    config::AppConfig,
    error::StartupError,
    extract::YtDlp,
    routes::{self, AppState},
    transcode::Ffmpeg,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubeproxy=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;

    if !config.static_dir.is_dir() {
        warn!(
            "static directory {} does not exist, the form page will not be served",
            config.static_dir.display()
        );
    }

    let state = AppState::new(
        YtDlp::new(&config.yt_dlp_path, config.metadata_timeout),
        Ffmpeg::new(&config.ffmpeg_path),
    );

    let mut app = routes::router(state, &config.static_dir);
    if config.allowed_origins.is_empty() {
        info!("ALLOWED_ORIGINS is not set, cross-origin requests are disabled");
    } else {
        app = app.layer(routes::cors_layer(&config.allowed_origins));
    }

    let addr = config.bind_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(
        yt_dlp = %config.yt_dlp_path.display(),
        ffmpeg = %config.ffmpeg_path.display(),
        "server ready on http://{addr}"
    );

    axum::serve(listener, app)
        .await
        .map_err(StartupError::Serve)
}
