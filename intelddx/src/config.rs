// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use ini::{Ini, Properties};
use intelddx_common::settings::{parse_bool, Generation, Settings};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::str::FromStr;

const CONFIG_FILE: &str = "intelddx.ini";

/// Locate intelddx.ini under the user's configuration directory.
pub fn find_config_path() -> Option<PathBuf> {
    // XDG_CONFIG_HOME/intelddx/intelddx.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("intelddx").join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/intelddx/intelddx.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join("intelddx")
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from the config file, or defaults if there is none.
pub fn load_config(path: Option<&PathBuf>) -> Settings {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return Settings::default();
            }
            p.clone()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No intelddx config found, using defaults");
                return Settings::default();
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => settings_from_ini(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            Settings::default()
        }
    }
}

fn read_bool(section: &Properties, key: &str, value: &mut bool) {
    if let Some(raw) = section.get(key) {
        match parse_bool(raw) {
            Some(b) => *value = b,
            None => warn!("{}: '{}' is not a boolean, keeping {}", key, raw, value),
        }
    }
}

fn read_number<T: FromStr + std::fmt::Display>(section: &Properties, key: &str, value: &mut T) {
    if let Some(raw) = section.get(key) {
        match raw.trim().parse() {
            Ok(n) => *value = n,
            Err(_) => warn!("{}: '{}' is not a number, keeping {}", key, raw, value),
        }
    }
}

/// Apply the [Driver], [Memory] and [Debugging] sections over the defaults.
pub fn settings_from_ini(conf: &Ini) -> Settings {
    let mut settings = Settings::default();

    // [Driver]
    if let Some(section) = conf.section(Some("Driver")) {
        if let Some(raw) = section.get("Generation") {
            match Generation::parse(raw) {
                Some(generation) => settings.generation = generation,
                None => warn!("Generation: unknown chipset '{}', using {}", raw, settings.generation),
            }
            debug!("Generation: {}", settings.generation);
        }
        read_bool(section, "Tiling", &mut settings.tiling);
        read_bool(section, "KernelExecFencing", &mut settings.kernel_exec_fencing);
        read_bool(section, "SwapbuffersWait", &mut settings.swapbuffers_wait);
        read_bool(section, "UseSwapBuffers", &mut settings.use_swap_buffers);
        read_bool(section, "Shadow", &mut settings.shadow);
        read_number(section, "DRI2Version", &mut settings.dri2_version);
    }

    // [Memory]
    if let Some(section) = conf.section(Some("Memory")) {
        let mut aperture_mib = settings.aperture_size >> 20;
        read_number(section, "ApertureSizeMiB", &mut aperture_mib);
        settings.aperture_size = aperture_mib << 20;
        read_number(section, "BatchCapacityWords", &mut settings.batch_capacity_words);
        read_number(section, "MaxPendingVblanks", &mut settings.max_pending_vblanks);
    }

    // [Debugging]
    if let Some(section) = conf.section(Some("Debugging")) {
        read_bool(section, "AlwaysSync", &mut settings.always_sync);
    }

    settings
}
