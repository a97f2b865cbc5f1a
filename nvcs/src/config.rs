// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use ini::Ini;
use log::{debug, info, warn};
use nvcs_common::settings::{DebugFlags, Settings};
use nvcs_common::types::ClassGen;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "nvcs.ini";

/// Locate `nvcs.ini` under the user's config directory.
pub fn find_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("nvcs").join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home).join(".config").join("nvcs").join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Settings from the environment, overlaid with the config file if there is
/// one. A missing or unreadable file leaves the defaults.
pub fn load_config(path: Option<&PathBuf>) -> Settings {
    let mut settings = Settings::from_env();

    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return settings;
            }
            p.clone()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No config found, using defaults");
                return settings;
            }
        },
    };

    info!("Loading config from: {}", config_path.display());
    match Ini::load_from_file(&config_path) {
        Ok(conf) => apply(&conf, &mut settings),
        Err(e) => warn!("Failed to parse config: {}", e),
    }
    settings
}

fn apply(conf: &Ini, settings: &mut Settings) {
    // [Debug]
    if let Some(section) = conf.section(Some("Debug")) {
        if let Some(flags) = section.get("flags") {
            settings.debug_flags |= DebugFlags::from_str_or_default(flags);
            debug!("Debug flags: {:?}", settings.debug_flags);
        }
        if let Some(count) = section.get("max_push_count") {
            match count.trim().parse::<u32>() {
                Ok(n) if n >= 4 => settings.max_push_count = n.min(0x1FFF),
                _ => warn!("Ignoring max_push_count '{}'", count),
            }
        }
    }

    // [Device]
    if let Some(section) = conf.section(Some("Device")) {
        if let Some(gen) = section.get("generation") {
            settings.generation = ClassGen::from_str_or_default(gen);
            debug!("Generation: {:?}", settings.generation);
        }
    }
}

/// Read a raw push stream: little-endian words.
pub fn read_words(path: &Path) -> std::io::Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        warn!("{}: {} trailing bytes ignored", path.display(), bytes.len() % 4);
    }
    Ok(nvcs_cmd::heap::bytes_to_words(&bytes))
}
