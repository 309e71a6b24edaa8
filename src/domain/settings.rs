use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Update intervals offered to users, in seconds.
pub const UPDATE_INTERVAL_CHOICES: [u64; 5] = [60, 120, 300, 600, 900];

/// Five minutes between polls.
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

pub const MIN_UPDATE_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "visionair".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Timeouts applied to every session, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTimeouts {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    /// Bound on a single request/reply exchange
    #[serde(default = "default_response_timeout_ms")]
    pub response_ms: u64,
    /// Bound on a whole poll or command, connect and disconnect included
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_ms: u64,
}

impl LinkTimeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout_ms(),
            response_ms: default_response_timeout_ms(),
            operation_ms: default_operation_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}
fn default_response_timeout_ms() -> u64 {
    5_000
}
fn default_operation_timeout_ms() -> u64 {
    45_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address of the configured unit, e.g. "00:1A:7D:DA:71:13"
    #[serde(default)]
    pub device_address: Option<String>,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    #[serde(default)]
    pub timeouts: LinkTimeouts,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Advanced BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_write_uuid")]
    pub ble_write_char_uuid: String,
    #[serde(default = "default_notify_uuid")]
    pub ble_notify_char_uuid: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_address: None,
            update_interval_secs: default_update_interval_secs(),
            timeouts: LinkTimeouts::default(),
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_write_char_uuid: default_write_uuid(),
            ble_notify_char_uuid: default_notify_uuid(),
        }
    }
}

impl Settings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(MIN_UPDATE_INTERVAL_SECS))
    }
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}
fn default_service_uuid() -> String {
    "0003cbbb-0000-1000-8000-00805f9b0131".to_string()
}
fn default_write_uuid() -> String {
    "0003cbb1-0000-1000-8000-00805f9b0131".to_string()
}
fn default_notify_uuid() -> String {
    "0003caa2-0000-1000-8000-00805f9b0131".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::default_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load from an explicit path, falling back to defaults if it is missing or unreadable.
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(path = %settings_path.display(), error = %e, "using default settings");
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn default_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("VisionAir");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Re-read the file, picking up edits made by another process. On error
    /// the current settings are kept.
    pub fn reload(&mut self) -> anyhow::Result<()> {
        self.settings = Self::load_from_file(&self.settings_path)?;
        Ok(())
    }

    pub fn set_update_interval(&mut self, secs: u64) -> anyhow::Result<()> {
        if secs < MIN_UPDATE_INTERVAL_SECS {
            anyhow::bail!(
                "update interval must be at least {} seconds",
                MIN_UPDATE_INTERVAL_SECS
            );
        }
        self.settings.update_interval_secs = secs;
        self.save()
    }

    pub fn set_device_address(&mut self, address: &str) -> anyhow::Result<()> {
        self.settings.device_address = Some(address.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("visionair-settings-{}-{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "device_address": "00:1A:7D:DA:71:13" }"#).unwrap();
        assert_eq!(settings.update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);
        assert_eq!(settings.timeouts, LinkTimeouts::default());
        assert_eq!(settings.log_settings.file_name_prefix, "visionair");
        assert_eq!(settings.device_address.as_deref(), Some("00:1A:7D:DA:71:13"));
    }

    #[test]
    fn test_update_interval_has_floor() {
        let settings = Settings {
            update_interval_secs: 1,
            ..Default::default()
        };
        assert_eq!(
            settings.update_interval(),
            Duration::from_secs(MIN_UPDATE_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_settings_path("reload");
        let mut service = SettingsService::open(path.clone());
        service.set_update_interval(600).unwrap();
        service.set_device_address("00:1A:7D:DA:71:13").unwrap();

        let reloaded = SettingsService::open(path.clone());
        assert_eq!(reloaded.get().update_interval_secs, 600);
        assert_eq!(
            reloaded.get().device_address.as_deref(),
            Some("00:1A:7D:DA:71:13")
        );

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_reload_sees_changes_from_other_writer() {
        let path = temp_settings_path("external");
        let mut watcher = SettingsService::open(path.clone());
        assert!(watcher.reload().is_err());
        assert_eq!(watcher.get().update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);

        let mut writer = SettingsService::open(path.clone());
        writer.set_update_interval(120).unwrap();

        watcher.reload().unwrap();
        assert_eq!(watcher.get().update_interval(), Duration::from_secs(120));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_rejects_tiny_interval() {
        let path = temp_settings_path("tiny");
        let mut service = SettingsService::open(path);
        assert!(service.set_update_interval(2).is_err());
        assert_eq!(service.get().update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);
    }
}
