use crate::error::{Error, Result};
use crate::storage::{self, keys, KvStore};
use serde::{Deserialize, Serialize};
use std::env;

/// Privacy-zone and scanning settings
///
/// The settings surface consumed by the proximity aggregator and the
/// transport layer. Persisted as an opaque JSON blob under
/// [`crate::storage::keys::PRIVACY_ZONE_SETTINGS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Master switch for the privacy-zone feature
    pub enabled: bool,
    /// Whether leaving the active zone arms the auto-lock timer
    pub auto_lock_enabled: bool,
    /// Delay between leaving the active zone and the lock firing
    pub auto_lock_delay_ms: u64,
    /// Trusted devices that must be in the nearest zone for the zone to count as active
    pub require_min_devices: usize,
    /// Whether zone enter/exit events are surfaced to the host application
    pub notify_on_zone_change: bool,
    /// Whether scanning continues while the host application is backgrounded
    pub background_scan_enabled: bool,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_lock_enabled: true,
            auto_lock_delay_ms: 30_000,
            require_min_devices: 1,
            notify_on_zone_change: true,
            background_scan_enabled: false,
        }
    }
}

impl MeshSettings {
    /// Load settings from environment variables, falling back to defaults
    ///
    /// Recognized variables: `MESH_ENABLED`, `MESH_AUTO_LOCK_ENABLED`,
    /// `MESH_AUTO_LOCK_DELAY_MS`, `MESH_REQUIRE_MIN_DEVICES`,
    /// `MESH_NOTIFY_ON_ZONE_CHANGE`, `MESH_BACKGROUND_SCAN_ENABLED`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        Ok(Self {
            enabled: read_bool("MESH_ENABLED", defaults.enabled)?,
            auto_lock_enabled: read_bool("MESH_AUTO_LOCK_ENABLED", defaults.auto_lock_enabled)?,
            auto_lock_delay_ms: read_parsed("MESH_AUTO_LOCK_DELAY_MS", defaults.auto_lock_delay_ms)?,
            require_min_devices: read_parsed("MESH_REQUIRE_MIN_DEVICES", defaults.require_min_devices)?,
            notify_on_zone_change: read_bool("MESH_NOTIFY_ON_ZONE_CHANGE", defaults.notify_on_zone_change)?,
            background_scan_enabled: read_bool(
                "MESH_BACKGROUND_SCAN_ENABLED",
                defaults.background_scan_enabled,
            )?,
        })
    }

    /// Load persisted settings, falling back to defaults when none exist
    pub async fn load(store: &dyn KvStore) -> Result<Self> {
        Ok(storage::get_json(store, keys::PRIVACY_ZONE_SETTINGS)
            .await?
            .unwrap_or_default())
    }

    /// Persist the settings blob
    pub async fn save(&self, store: &dyn KvStore) -> Result<()> {
        storage::put_json(store, keys::PRIVACY_ZONE_SETTINGS, self).await
    }
}

fn read_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("{}: invalid boolean '{}'", key, other))),
        },
        Err(_) => Ok(default),
    }
}

fn read_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{}: invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
