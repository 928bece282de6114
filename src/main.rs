use env_logger::Env;
use failure::{bail, Error};
use log::{debug, error, info, warn};
use std::env;
use violation_monitor::analytics::{self, Filters};
use violation_monitor::backend::BackendClient;
use violation_monitor::config::Settings;
use violation_monitor::db::TokenStore;
use violation_monitor::session::{Access, SessionGuard, View};
use violation_monitor::sync::StateSynchronizer;
use violation_monitor::websocket::SocketIoChannel;
use violation_monitor::zones::ZoneConfigStore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting violation-monitor");
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), Error> {
    let settings = Settings::from_env()?;
    let guard = SessionGuard::new(TokenStore::open(&settings.session_db)?);
    let backend = BackendClient::new(settings.backend_url.clone())?;

    match env::args().nth(1).as_deref() {
        None => {}
        Some("logout") => {
            guard.logout();
            return Ok(());
        }
        Some("login") => {
            let username = env::var("MONITOR_USER").map_err(|_| unset("MONITOR_USER"))?;
            let password = env::var("MONITOR_PASSWORD").map_err(|_| unset("MONITOR_PASSWORD"))?;
            if !guard.login(&backend, &username, &password).await {
                bail!("Login rejected for {}", username);
            }
        }
        Some(other) => bail!("Unknown command {:?}; expected login or logout", other),
    }

    if let Access::Redirect(to) = guard.check(View::Dashboard) {
        bail!("Not logged in (redirect to {}); run `violation-monitor login` first", to);
    }
    let backend = backend.with_token(guard.token());

    let zones = ZoneConfigStore::new(backend.clone());
    let missing = zones.load().await;
    if !missing.is_empty() {
        warn!("Detection zones partially loaded, missing {:?}", missing);
    }
    let config = zones.config();
    info!(
        "Detection line {:?}, polygon {:?}, speed limit {:?}",
        config.line.local(),
        config.polygon.local(),
        config.speed_limit.local()
    );

    let mut sync = StateSynchronizer::default();
    sync.start_polling(backend, settings.live_poll);
    sync.subscribe_frames_with(
        SocketIoChannel::new(settings.stream_url.clone(), settings.reconnect_delay),
        |frame| debug!("Frame of {} bytes", frame.payload().len()),
    );

    let mut report = tokio::time::interval(settings.browse_poll);
    loop {
        tokio::select! {
            _ = report.tick() => log_report(&sync, &settings.report_filters),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for ctrl-c: {}", e);
                }
                break;
            }
        }
    }
    sync.stop_polling();
    sync.unsubscribe_frames();
    Ok(())
}

fn unset(key: &str) -> Error {
    failure::format_err!("{} environment variable unset", key)
}

fn log_report(sync: &StateSynchronizer, filters: &Filters) {
    let records = sync.records();
    let report = analytics::analyze(&records, filters);
    info!("{} records, {} matching violations", records.len(), report.events);
    for (kind, count) in report.by_type.entries() {
        info!("  {}: {}", kind, count);
    }
    for (bucket, count) in report.by_bucket.entries() {
        info!("  {}: {}", bucket, count);
    }
    match sync.frame() {
        Some(frame) => match frame.dimensions() {
            Ok((width, height)) => info!("Latest frame {}x{}", width, height),
            Err(e) => warn!("Latest frame is not a readable image: {}", e),
        },
        None => info!("No frame received yet"),
    }
}
