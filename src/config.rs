//! Configuration loading for workbridge.
//!
//! Settings come from three layers, lowest precedence first:
//! 1. Programmed defaults (`defaults`)
//! 2. User config (`$XDG_CONFIG_HOME/workbridge/workbridge.toml`)
//! 3. An explicit file passed on the command line
//!
//! Layers are deep-merged as raw TOML tables and deserialized once, so a
//! layer only needs to mention the keys it overrides.

pub mod defaults;
pub mod settings;
pub mod user;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use settings::{
    BridgeSettings, QueueSettings, ReconcileSettings, WorkbridgeSettings, WorkerSettings,
};
pub use user::{load_user_config, user_config_path};

/// Errors raised while reading a single configuration layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }

    /// Forward the event to the `log` facade.
    pub fn log(&self) {
        match self.kind {
            SettingsEventKind::Info => log::info!(target: "workbridge::config", "{}", self.message),
            SettingsEventKind::Warning => {
                log::warn!(target: "workbridge::config", "{}", self.message)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SettingsLoadOutcome {
    pub settings: WorkbridgeSettings,
    pub events: Vec<SettingsEvent>,
}

/// Load settings from every layer.
///
/// Unreadable or invalid layers are skipped with a warning event; the
/// remaining layers still apply.
pub fn load_settings(explicit_path: Option<&Path>) -> SettingsLoadOutcome {
    let mut events = Vec::new();
    let mut layers: Vec<(String, toml::Table)> = Vec::new();

    match load_user_config() {
        Ok(Some(table)) => {
            events.push(SettingsEvent::info("Loaded user config from XDG_CONFIG_HOME"));
            layers.push(("user config".to_string(), table));
        }
        Ok(None) => {}
        Err(err) => events.push(SettingsEvent::warning(format!(
            "Failed to load user config: {}",
            err
        ))),
    }

    if let Some(path) = explicit_path {
        match user::read_toml_table(path) {
            Ok(table) => {
                events.push(SettingsEvent::info(format!(
                    "Loaded config file {}",
                    path.display()
                )));
                layers.push((path.display().to_string(), table));
            }
            Err(err) => events.push(SettingsEvent::warning(format!(
                "Failed to load config file: {}",
                err
            ))),
        }
    }

    let settings = merge_layers(layers, &mut events);
    SettingsLoadOutcome { settings, events }
}

/// Merge raw layers over the programmed defaults.
///
/// Each layer is merged tentatively; a layer whose result no longer
/// deserializes is dropped as a whole.
pub fn merge_layers(
    layers: Vec<(String, toml::Table)>,
    events: &mut Vec<SettingsEvent>,
) -> WorkbridgeSettings {
    let mut merged = toml::Table::new();
    let mut settings = defaults::default_settings();

    for (label, layer) in layers {
        let mut candidate = merged.clone();
        merge_tables(&mut candidate, layer);
        match toml::Value::Table(candidate.clone()).try_into::<WorkbridgeSettings>() {
            Ok(parsed) => {
                merged = candidate;
                settings = parsed;
            }
            Err(err) => events.push(SettingsEvent::warning(format!(
                "Ignoring {}: {}",
                label, err
            ))),
        }
    }

    normalize(settings, events)
}

/// Deep-merge `overlay` into `base`; scalars and arrays in `overlay` win.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(overlay_table) = value {
            if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                merge_tables(base_table, overlay_table);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay_table));
        } else {
            base.insert(key, value);
        }
    }
}

fn normalize(
    mut settings: WorkbridgeSettings,
    events: &mut Vec<SettingsEvent>,
) -> WorkbridgeSettings {
    let requested = settings.queue.max_concurrency;
    let clamped = requested.clamp(defaults::MIN_CONCURRENCY, defaults::MAX_CONCURRENCY);
    if clamped != requested {
        events.push(SettingsEvent::warning(format!(
            "queue.maxConcurrency {} clamped to {}",
            requested, clamped
        )));
        settings.queue.max_concurrency = clamped;
    }
    if settings.reconcile.max_concurrent_checks == 0 {
        events.push(SettingsEvent::warning(
            "reconcile.maxConcurrentChecks 0 raised to 1",
        ));
        settings.reconcile.max_concurrent_checks = 1;
    }
    settings
}
