use crate::config::{load_config, resolve_profile};
use crate::workspace::WorkspacePaths;
use magpie_core::MagpieResult;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub workspace: String,
    pub healthy: bool,
    pub checks: Vec<DoctorCheck>,
    pub active_profile: Option<String>,
    pub host: Option<String>,
}

pub fn run_doctor(
    paths: &WorkspacePaths,
    profile_override: Option<&str>,
    host_override: Option<&str>,
) -> MagpieResult<DoctorReport> {
    let mut checks = vec![
        DoctorCheck {
            name: "workspace_root".to_string(),
            ok: paths.root.is_dir(),
            details: paths.root.display().to_string(),
        },
        DoctorCheck {
            name: "magpie_directory".to_string(),
            ok: paths.magpie_dir.is_dir(),
            details: paths.magpie_dir.display().to_string(),
        },
        DoctorCheck {
            name: "captures_directory".to_string(),
            ok: paths.captures_dir.is_dir(),
            details: paths.captures_dir.display().to_string(),
        },
        DoctorCheck {
            name: "logs_directory".to_string(),
            ok: paths.logs_dir.is_dir(),
            details: paths.logs_dir.display().to_string(),
        },
        DoctorCheck {
            name: "cache_directory".to_string(),
            ok: paths.cache_dir.is_dir(),
            details: paths.cache_dir.display().to_string(),
        },
        DoctorCheck {
            name: "state_database".to_string(),
            ok: paths.state_db_path.is_file(),
            details: paths.state_db_path.display().to_string(),
        },
        DoctorCheck {
            name: "config_file".to_string(),
            ok: paths.config_path.is_file(),
            details: paths.config_path.display().to_string(),
        },
    ];

    let mut active_profile = None;
    let mut host = None;

    match load_config(paths) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_parses".to_string(),
                ok: true,
                details: format!("{} profiles", config.profiles.len()),
            });

            match resolve_profile(&config, profile_override, host_override) {
                Ok(resolved) => {
                    checks.push(DoctorCheck {
                        name: "profile_resolves".to_string(),
                        ok: true,
                        details: resolved.name.clone(),
                    });
                    active_profile = Some(resolved.name);
                    host = Some(resolved.host);
                }
                Err(err) => checks.push(DoctorCheck {
                    name: "profile_resolves".to_string(),
                    ok: false,
                    details: err.message,
                }),
            }
        }
        Err(err) => checks.push(DoctorCheck {
            name: "config_parses".to_string(),
            ok: false,
            details: err.message,
        }),
    }

    let healthy = checks.iter().all(|check| check.ok);

    Ok(DoctorReport {
        workspace: paths.root.display().to_string(),
        healthy,
        checks,
        active_profile,
        host,
    })
}
