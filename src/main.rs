mod common;
mod config;
mod network;
mod storage;
mod store;
mod ui;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use network::backend::Backend;
use network::{EngineOptions, RetryPolicy, SupabaseBackend, SyncClient};
use tokio::sync::mpsc;
use ui::{AppState, ChatApp};

#[derive(Parser)]
#[command(
    name = "tokumei_chat",
    version,
    about = "Anonymous realtime room chat client"
)]
struct Cli {
    /// Room name, or a pasted share-link path segment (percent-encoded)
    room: String,
    /// Send messages as the room host
    #[arg(long)]
    host: bool,
    /// Display name to use while hosting
    #[arg(long, value_name = "NAME")]
    host_name: Option<String>,
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), eframe::Error> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let room_id = decode_room(&cli.room);
    let app_config = config::load_config(&cli.config);

    let user_id = storage::load_or_create_identity();
    log::info!("Participant handle: {user_id}");
    log::info!("Share link path: /room/{}", urlencoding::encode(&room_id));

    let backend: Option<Arc<dyn Backend>> = match app_config.backend() {
        Some(backend_config) => Some(Arc::new(SupabaseBackend::new(backend_config))),
        None => {
            log::warn!("No backend credentials found; starting in demo mode");
            None
        }
    };

    // 1. Tạo các kênh giao tiếp (Channels)
    // UI -> Engine
    let (command_tx, command_rx) = mpsc::channel(100);
    // Engine -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    let options = EngineOptions {
        room_id: room_id.clone(),
        user_id: user_id.clone(),
        is_host: cli.host,
        host_name: cli.host_name.clone(),
        retry: RetryPolicy::default(),
    };

    // 2. Khởi chạy Engine (Chạy ngầm)
    tokio::spawn(SyncClient::new(options, backend, event_tx, command_rx).run());

    // 3. Khởi chạy UI (Chạy trên Main Thread)
    let native_options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);

    eframe::run_native(
        "Tokumei Chat",
        native_options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .expect("ChatApp should only be initialized once");

            let state = AppState::new(room_id.clone(), user_id.clone());
            Ok(Box::new(ChatApp::new(
                cc,
                state,
                command_tx.clone(),
                event_receiver,
            )))
        }),
    )
}

/// Accept either a plain room name or a pasted share-link path segment;
/// rooms are identified by the decoded name.
fn decode_room(raw: &str) -> String {
    let segment = raw.rsplit('/').next().unwrap_or(raw);
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            log::warn!("Room name is not valid percent-encoding ({err}); using it verbatim");
            segment.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::decode_room;

    #[test]
    fn decodes_share_link_segments() {
        assert_eq!(decode_room("my%20room"), "my room");
        assert_eq!(decode_room("https://example.com/room/caf%C3%A9"), "café");
        assert_eq!(decode_room("plain"), "plain");
    }
}
