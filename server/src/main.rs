use std::net::SocketAddr;
use std::sync::Arc;

use narration_core::{AudioOutput, AutoplayPolicy, Narrator, NullOutput, RodioOutput};
use speech_client::{SpeechClient, SpeechConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use server::config::{AudioOutputMode, ServerConfig};
use server::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting narration server...");

    let config = ServerConfig::from_env();
    let speech_config = SpeechConfig::from_env()?;
    info!("Speech provider: {}", speech_config.provider.as_str());

    let client = SpeechClient::new(&speech_config)?;
    if let Err(e) = client.check_key().await {
        warn!("Speech service rejected the configured key: {}", e);
    }

    // The device stream is not Send, so it lives here on the main thread
    // for as long as the server runs; only the handle is shared.
    let mut _device_stream = None;
    let output: Arc<dyn AudioOutput> = match config.audio_output {
        AudioOutputMode::Off => {
            info!("Audio output disabled by configuration");
            Arc::new(NullOutput)
        }
        AudioOutputMode::Auto => match RodioOutput::open() {
            Ok((output, stream)) => {
                _device_stream = Some(stream);
                Arc::new(output)
            }
            Err(e) => {
                warn!("No audio device available ({}), narration will be silent", e);
                Arc::new(NullOutput)
            }
        },
    };

    let policy = AutoplayPolicy::new(config.autoplay_enabled, config.mute_markers.clone());
    let narrator = Arc::new(Narrator::new(Arc::new(client), output, policy));

    let state = AppState::new(narrator, config.clone());
    info!(
        "Server configuration loaded: host={}, port={}, autoplay={}, timeout={}s",
        config.host, config.port, config.autoplay_enabled, config.request_timeout_secs
    );

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
