use crate::workspace::WorkspacePaths;
use magpie_core::{MagpieError, MagpieResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_HOST_URL: &str = "https://x.com";
pub const DEFAULT_PAGE_SIZE: u32 = 40;
pub const DEFAULT_FULL_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub version: u32,
    pub active_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub host: String,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub full_page_size: Option<u32>,
    #[serde(default)]
    pub reauth_command: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub active: bool,
    pub host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProfile {
    pub name: String,
    pub host: String,
    pub page_size: u32,
    pub full_page_size: u32,
    pub reauth_command: Option<String>,
}

impl ProfileConfig {
    fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            page_size: None,
            full_page_size: None,
            reauth_command: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn with_default_host(host: impl Into<String>) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), ProfileConfig::with_host(host));

        Self {
            version: CONFIG_VERSION,
            active_profile: DEFAULT_PROFILE.to_string(),
            profiles,
        }
    }

    pub fn ensure_defaults(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }

        if self.profiles.is_empty() {
            self.profiles.insert(
                DEFAULT_PROFILE.to_string(),
                ProfileConfig::with_host(DEFAULT_HOST_URL),
            );
        }

        if self.active_profile.is_empty() {
            self.active_profile = DEFAULT_PROFILE.to_string();
        }

        if !self.profiles.contains_key(&self.active_profile) {
            if let Some(first_profile) = self.profiles.keys().next() {
                self.active_profile = first_profile.clone();
            } else {
                self.active_profile = DEFAULT_PROFILE.to_string();
                self.profiles.insert(
                    DEFAULT_PROFILE.to_string(),
                    ProfileConfig::with_host(DEFAULT_HOST_URL),
                );
            }
        }
    }
}

pub fn load_config(paths: &WorkspacePaths) -> MagpieResult<WorkspaceConfig> {
    let contents = fs::read_to_string(&paths.config_path).map_err(|err| {
        MagpieError::io(format!(
            "failed to read workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;

    let mut config: WorkspaceConfig = toml::from_str(&contents).map_err(|err| {
        MagpieError::io(format!(
            "failed to parse workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;
    config.ensure_defaults();
    Ok(config)
}

pub fn save_config(paths: &WorkspacePaths, config: &WorkspaceConfig) -> MagpieResult<()> {
    let serialized = toml::to_string_pretty(config)
        .map_err(|err| MagpieError::io(format!("failed to encode config.toml: {err}")))?;

    fs::write(&paths.config_path, serialized).map_err(|err| {
        MagpieError::io(format!(
            "failed to write workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })
}

pub fn list_profiles(config: &WorkspaceConfig) -> Vec<ProfileView> {
    let mut profiles = Vec::with_capacity(config.profiles.len());

    for (name, profile) in &config.profiles {
        profiles.push(ProfileView {
            name: name.clone(),
            active: name == &config.active_profile,
            host: profile.host.clone(),
        });
    }

    profiles
}

pub fn set_active_profile(config: &mut WorkspaceConfig, name: &str) -> MagpieResult<()> {
    if !config.profiles.contains_key(name) {
        return Err(MagpieError::usage(format!(
            "profile '{name}' not found in workspace config"
        )));
    }

    config.active_profile = name.to_string();
    Ok(())
}

pub fn set_profile_host(config: &mut WorkspaceConfig, name: &str, host: &str) {
    match config.profiles.get_mut(name) {
        Some(profile) => profile.host = host.to_string(),
        None => {
            config
                .profiles
                .insert(name.to_string(), ProfileConfig::with_host(host));
        }
    }

    if config.active_profile.is_empty() {
        config.active_profile = name.to_string();
    }
}

pub fn resolve_profile(
    config: &WorkspaceConfig,
    profile_override: Option<&str>,
    host_override: Option<&str>,
) -> MagpieResult<ResolvedProfile> {
    let requested_profile = profile_override.unwrap_or(&config.active_profile);
    let profile = config.profiles.get(requested_profile).ok_or_else(|| {
        MagpieError::usage(format!(
            "profile '{requested_profile}' not found in workspace config"
        ))
    })?;

    let host = host_override.unwrap_or(profile.host.as_str()).to_string();

    Ok(ResolvedProfile {
        name: requested_profile.to_string(),
        host,
        page_size: profile.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
        full_page_size: profile.full_page_size.unwrap_or(DEFAULT_FULL_PAGE_SIZE).max(1),
        reauth_command: profile.reauth_command.clone(),
    })
}
