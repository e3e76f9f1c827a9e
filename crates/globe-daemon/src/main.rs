mod core;
mod http;
mod mpv;

use anyhow::Context;
use globe_core::config::Config;
use globe_core::directory::DirectoryClient;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// Shared state changed; receivers re-read it from StateManager.
    StateUpdated,
    /// A WARN/ERROR log line, already formatted.
    Log(String),
}

/// Forwards WARN and ERROR events to the broadcast channel so the front-end
/// can show them.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // No subscribers is fine.
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = globe_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {:?}", data_dir))?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,globe_daemon=debug,globe_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // All external inputs funnel into GlobeCore.
    let (event_tx, event_rx) = mpsc::channel::<core::CoreEvent>(256);

    let mut driver = mpv::MpvDriver::new();
    let media = match driver
        .spawn_and_connect(config.playback.default_volume, event_tx.clone())
        .await
    {
        Ok(media) => {
            match media.version().await {
                Ok(v) => info!("mpv ready: {}", v),
                Err(e) => warn!("mpv did not answer version query: {}", e),
            }
            media
        }
        Err(e) => {
            warn!("mpv unavailable, playback disabled: {:#}", e);
            mpv::MpvMedia::unavailable()
        }
    };

    let directory = DirectoryClient::new(config.directory.clone())
        .context("building directory client")?;

    let globe_core = core::GlobeCore::new(
        &config,
        directory,
        media,
        broadcast_tx.clone(),
        event_tx.clone(),
    );

    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::HttpState {
            state_manager: globe_core.state_manager(),
            event_tx: event_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            globe: config.globe.clone(),
        },
    );

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(core::CoreEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    globe_core.run(event_rx).await?;

    driver.kill().await;
    info!("Daemon stopped");
    Ok(())
}
