use crate::backend::BackendClient;
use crate::types::{DetectionLine, DetectionPolygon, SpeedLimit};
use failure::{Error, Fail};
use log::{error, info};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Line,
    Polygon,
    SpeedLimit,
}

impl Zone {
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Zone::Line => &DetectionLine::FIELDS,
            Zone::Polygon => &DetectionPolygon::FIELDS,
            Zone::SpeedLimit => &["speed_limit"],
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Zone::Line => "line",
            Zone::Polygon => "polygon",
            Zone::SpeedLimit => "speed limit",
        })
    }
}

#[derive(Debug, Fail)]
pub enum ZoneError {
    #[fail(display = "The {} has no field named {:?}", zone, field)]
    UnknownField { zone: Zone, field: String },
    #[fail(display = "The {} has no value to apply", _0)]
    NothingToApply(Zone),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Unloaded,
    /// Loading, edited, or being applied; the local value is not known to
    /// match the backend.
    Pending,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tracked<T> {
    local: Option<T>,
    confirmed: Option<T>,
    status: SyncStatus,
    /// Status to return to if a load is abandoned before it resolves.
    before_load: Option<SyncStatus>,
}

impl<T: Clone + PartialEq + Default> Tracked<T> {
    pub fn local(&self) -> Option<&T> {
        self.local.as_ref()
    }

    pub fn confirmed(&self) -> Option<&T> {
        self.confirmed.as_ref()
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn is_diverged(&self) -> bool {
        self.local != self.confirmed
    }

    fn set_status(&mut self, status: SyncStatus) {
        self.before_load = None;
        self.status = status;
    }

    fn loading(&mut self) {
        if self.before_load.is_none() {
            self.before_load = Some(self.status.clone());
        }
        self.status = SyncStatus::Pending;
    }

    fn abandon_load(&mut self) {
        if let Some(status) = self.before_load.take() {
            self.status = status;
        }
    }

    fn begin(&mut self) {
        self.set_status(SyncStatus::Pending);
    }

    fn loaded(&mut self, value: T) {
        self.local = Some(value.clone());
        self.confirmed = Some(value);
        self.set_status(SyncStatus::Confirmed);
    }

    fn edit(&mut self) -> &mut T {
        self.set_status(SyncStatus::Pending);
        self.local.get_or_insert_with(T::default)
    }

    fn applied(&mut self, sent: T) {
        let status = if self.local.as_ref() == Some(&sent) {
            SyncStatus::Confirmed
        } else {
            // Edited again while the write was in flight.
            SyncStatus::Pending
        };
        self.set_status(status);
        self.confirmed = Some(sent);
    }

    fn failed(&mut self, reason: String) {
        self.set_status(SyncStatus::Failed(reason));
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneConfig {
    pub line: Tracked<DetectionLine>,
    pub polygon: Tracked<DetectionPolygon>,
    pub speed_limit: Tracked<SpeedLimit>,
}

trait Entity: Clone + PartialEq + Default {
    const ZONE: Zone;

    fn slot(config: &mut ZoneConfig) -> &mut Tracked<Self>;
}

impl Entity for DetectionLine {
    const ZONE: Zone = Zone::Line;

    fn slot(config: &mut ZoneConfig) -> &mut Tracked<Self> {
        &mut config.line
    }
}

impl Entity for DetectionPolygon {
    const ZONE: Zone = Zone::Polygon;

    fn slot(config: &mut ZoneConfig) -> &mut Tracked<Self> {
        &mut config.polygon
    }
}

impl Entity for SpeedLimit {
    const ZONE: Zone = Zone::SpeedLimit;

    fn slot(config: &mut ZoneConfig) -> &mut Tracked<Self> {
        &mut config.speed_limit
    }
}

/// Parses operator input the way a lenient number field does: optional
/// leading whitespace and sign, then as many digits as are present.
/// Anything without leading digits becomes 0.
pub fn parse_int(raw: &str) -> i64 {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));
    if negative {
        -value
    } else {
        value
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

pub struct ZoneConfigStore {
    backend: BackendClient,
    state: watch::Sender<ZoneConfig>,
    activation: AtomicU64,
}

impl ZoneConfigStore {
    pub fn new(backend: BackendClient) -> Self {
        let (state, _) = watch::channel(ZoneConfig::default());
        ZoneConfigStore {
            backend,
            state,
            activation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> ZoneConfig {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ZoneConfig> {
        self.state.subscribe()
    }

    /// Fetches all three entities concurrently. Each is stored as soon as it
    /// arrives; one failing leaves the others intact. Returns the entities
    /// that could not be loaded.
    pub async fn load(&self) -> Vec<Zone> {
        let activation = self.activation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|config| {
            config.line.loading();
            config.polygon.loading();
            config.speed_limit.loading();
        });
        let (line, polygon, speed_limit) = futures::join!(
            async { self.store_loaded(activation, self.backend.line().await) },
            async { self.store_loaded(activation, self.backend.polygon().await) },
            async { self.store_loaded(activation, self.backend.speed_limit().await) }
        );
        [line, polygon, speed_limit].iter().flatten().copied().collect()
    }

    /// Ignores results of loads still in flight. Entities they had not
    /// resolved yet go back to the status they had before the load.
    pub fn deactivate(&self) {
        self.activation.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|config| {
            config.line.abandon_load();
            config.polygon.abandon_load();
            config.speed_limit.abandon_load();
        });
    }

    fn store_loaded<T: Entity>(&self, activation: u64, result: Result<T, Error>) -> Option<Zone> {
        if self.activation.load(Ordering::SeqCst) != activation {
            return None;
        }
        match result {
            Ok(value) => {
                self.state.send_modify(|config| T::slot(config).loaded(value));
                None
            }
            Err(e) => {
                error!("Error loading {}: {}", T::ZONE, e);
                self.state.send_modify(|config| T::slot(config).failed(e.to_string()));
                Some(T::ZONE)
            }
        }
    }

    pub fn edit_field(&self, zone: Zone, field: &str, raw: &str) -> Result<(), Error> {
        if !zone.fields().iter().any(|f| *f == field) {
            return Err(ZoneError::UnknownField {
                zone,
                field: field.to_string(),
            }
            .into());
        }
        let value = parse_int(raw);
        self.state.send_modify(|config| match zone {
            Zone::Line => {
                if let Some(slot) = config.line.edit().field_mut(field) {
                    *slot = clamp_i32(value);
                }
            }
            Zone::Polygon => {
                if let Some(slot) = config.polygon.edit().field_mut(field) {
                    *slot = clamp_i32(value);
                }
            }
            Zone::SpeedLimit => {
                config.speed_limit.edit().speed_limit = value.clamp(0, i64::from(u32::MAX)) as u32;
            }
        });
        Ok(())
    }

    pub async fn apply(&self, zone: Zone) -> Result<(), Error> {
        match zone {
            Zone::Line => {
                let sent = self.begin_apply::<DetectionLine>()?;
                let result = self.backend.set_line(&sent).await;
                self.finish_apply(sent, result)
            }
            Zone::Polygon => {
                let sent = self.begin_apply::<DetectionPolygon>()?;
                let result = self.backend.set_polygon(&sent).await;
                self.finish_apply(sent, result)
            }
            Zone::SpeedLimit => {
                let sent = self.begin_apply::<SpeedLimit>()?;
                let result = self.backend.set_speed_limit(&sent).await;
                self.finish_apply(sent, result)
            }
        }
    }

    fn begin_apply<T: Entity>(&self) -> Result<T, Error> {
        let mut sent = None;
        self.state.send_modify(|config| {
            let tracked = T::slot(config);
            sent = tracked.local().cloned();
            if sent.is_some() {
                tracked.begin();
            }
        });
        sent.ok_or_else(|| ZoneError::NothingToApply(T::ZONE).into())
    }

    fn finish_apply<T: Entity>(&self, sent: T, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => {
                info!("Applied {}", T::ZONE);
                self.state.send_modify(|config| T::slot(config).applied(sent));
                Ok(())
            }
            Err(e) => {
                error!("Error applying {}: {}", T::ZONE, e);
                self.state.send_modify(|config| T::slot(config).failed(e.to_string()));
                Err(e)
            }
        }
    }
}
