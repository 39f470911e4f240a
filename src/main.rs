mod app;
mod bubbles;
mod confetti;
mod config;
mod countdown;
mod error;
mod events;
mod placement;
mod pool;
mod presence;
mod protocol;
mod remote;
mod scheduler;
mod submission;
mod timers;
mod workers;

use std::{fs, path::PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    app::BlessingApp,
    config::{AppConfig, LaunchOverrides, RemoteCredentials},
    events::IncomingMessage,
    presence::session_presence_key,
    remote::SupabaseClient,
    workers::{spawn_remote_workers, RemoteLink, RemoteWorkerConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = AppConfig::load_or_create()?;
    info!(path = %config_path.display(), room = %config.room_id, "loaded config");
    let overrides = LaunchOverrides::from_env();
    let (tx, rx) = crossbeam_channel::unbounded::<IncomingMessage>();

    let remote = connect_remote(&config, &overrides, tx);

    let width = config.window.width.clamp(480.0, 4096.0);
    let height = config.window.height.clamp(360.0, 4096.0);
    let viewport = egui::ViewportBuilder::default()
        .with_resizable(true)
        .with_inner_size([width, height])
        .with_min_inner_size([480.0, 360.0])
        .with_title("Happy New Year 2026");

    let native_options = eframe::NativeOptions {
        viewport,
        renderer: eframe::Renderer::Glow,
        ..Default::default()
    };

    eframe::run_native(
        "Blessing Countdown",
        native_options,
        Box::new(move |cc| {
            configure_egui_fonts(&cc.egui_ctx);
            Ok(Box::new(BlessingApp::new(rx, remote, config, overrides)))
        }),
    )
    .map_err(|err| anyhow::anyhow!("failed starting countdown window: {err}"))?;

    Ok(())
}

/// `None` leaves the page in countdown-only mode.
fn connect_remote(
    config: &AppConfig,
    overrides: &LaunchOverrides,
    tx: crossbeam_channel::Sender<IncomingMessage>,
) -> Option<RemoteLink> {
    let Some(credentials) = RemoteCredentials::discover() else {
        warn!("SUPABASE_URL / SUPABASE_ANON_KEY missing; remote features disabled");
        return None;
    };
    let client = match SupabaseClient::new(credentials) {
        Ok(client) => client,
        Err(err) => {
            warn!(?err, "failed building remote client; remote features disabled");
            return None;
        }
    };
    let presence_key = overrides.presence_enabled.then(session_presence_key);
    Some(spawn_remote_workers(
        client,
        RemoteWorkerConfig {
            room: config.room_id.clone(),
            fetch_limit: config.fetch_limit,
            blessings_channel: config.blessings_channel.clone(),
            presence_channel: config.presence_channel.clone(),
            presence_key,
        },
        tx,
    ))
}

fn configure_egui_fonts(ctx: &egui::Context) {
    // Korean blessings need a CJK-capable fallback next to the default fonts.
    let Some(bytes) = load_font_file("NotoSansKR-Regular.ttf") else {
        info!("NotoSansKR-Regular.ttf not found; using default fonts");
        return;
    };

    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("noto_sans_kr".to_owned(), egui::FontData::from_owned(bytes));
    for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
        fonts
            .families
            .entry(family)
            .or_default()
            .push("noto_sans_kr".to_owned());
    }
    ctx.set_fonts(fonts);
    info!("loaded fallback UI font: NotoSansKR-Regular.ttf");
}

fn load_font_file(filename: &str) -> Option<Vec<u8>> {
    for path in font_candidate_paths(filename) {
        if !path.is_file() {
            continue;
        }
        match fs::read(&path) {
            Ok(bytes) => return Some(bytes),
            Err(err) => warn!(?err, path = %path.display(), "failed reading font file"),
        }
    }
    None
}

fn font_candidate_paths(filename: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("assets").join(filename));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            paths.push(exe_dir.join("assets").join(filename));
            paths.push(exe_dir.join("..").join("assets").join(filename));
        }
    }
    if let Some(data_dir) = dirs::data_dir() {
        paths.push(data_dir.join("blessing-countdown").join(filename));
    }
    paths
}
