use crate::config::{DEFAULT_HOST_URL, WorkspaceConfig, load_config, save_config};
use magpie_core::{MagpieError, MagpieResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub captures_dir: PathBuf,
    pub magpie_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkspaceInitResult {
    pub paths: WorkspacePaths,
    pub created: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
}

impl WorkspacePaths {
    pub fn from_root(root: PathBuf) -> Self {
        let magpie_dir = root.join(".magpie");

        Self {
            captures_dir: root.join("captures"),
            config_path: magpie_dir.join("config.toml"),
            state_db_path: magpie_dir.join("state.db"),
            logs_dir: magpie_dir.join("logs"),
            cache_dir: magpie_dir.join("cache"),
            lock_path: magpie_dir.join("lock"),
            root,
            magpie_dir,
        }
    }
}

pub fn init_workspace(target: Option<&Path>, host: Option<&str>) -> MagpieResult<WorkspaceInitResult> {
    let root = match target {
        Some(path) => absolutize(path)?,
        None => std::env::current_dir().map_err(|err| {
            MagpieError::io(format!(
                "failed to resolve current directory for init: {err}"
            ))
        })?,
    };

    let paths = WorkspacePaths::from_root(root);
    let mut created = Vec::new();
    let updated = Vec::new();

    ensure_dir(&paths.root, &mut created)?;
    ensure_dir(&paths.captures_dir, &mut created)?;
    ensure_dir(&paths.magpie_dir, &mut created)?;
    ensure_dir(&paths.logs_dir, &mut created)?;
    ensure_dir(&paths.cache_dir, &mut created)?;

    ensure_file(&paths.state_db_path, &mut created)?;
    ensure_file(&paths.lock_path, &mut created)?;

    if paths.config_path.exists() {
        let _ = load_config(&paths)?;
    } else {
        let default_host = host.unwrap_or(DEFAULT_HOST_URL);
        let config = WorkspaceConfig::with_default_host(default_host);
        save_config(&paths, &config)?;
        created.push(paths.config_path.clone());
    }

    Ok(WorkspaceInitResult {
        paths,
        created,
        updated,
    })
}

pub fn resolve_workspace(explicit: Option<&Path>) -> MagpieResult<WorkspacePaths> {
    let root = match explicit {
        Some(path) => absolutize(path)?,
        None => std::env::current_dir().map_err(|err| {
            MagpieError::io(format!(
                "failed to resolve current directory for workspace lookup: {err}"
            ))
        })?,
    };

    let paths = WorkspacePaths::from_root(root);
    if !paths.magpie_dir.is_dir() {
        let root_display = paths.root.display();
        return Err(MagpieError::usage(format!(
            "workspace is not initialized at '{root_display}'; run `magpie init --workspace {root_display}` first"
        )));
    }

    Ok(paths)
}

fn absolutize(path: &Path) -> MagpieResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().map_err(|err| {
        MagpieError::io(format!(
            "failed to resolve current directory for path: {err}"
        ))
    })?;

    Ok(cwd.join(path))
}

fn ensure_dir(path: &Path, created: &mut Vec<PathBuf>) -> MagpieResult<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(MagpieError::io(format!(
                "expected '{}' to be a directory",
                path.display()
            )));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|err| {
        MagpieError::io(format!(
            "failed to create directory '{}': {}",
            path.display(),
            err
        ))
    })?;
    created.push(path.to_path_buf());
    Ok(())
}

fn ensure_file(path: &Path, created: &mut Vec<PathBuf>) -> MagpieResult<()> {
    if path.exists() {
        if !path.is_file() {
            return Err(MagpieError::io(format!(
                "expected '{}' to be a file",
                path.display()
            )));
        }
        return Ok(());
    }

    fs::write(path, []).map_err(|err| {
        MagpieError::io(format!(
            "failed to create file '{}': {}",
            path.display(),
            err
        ))
    })?;
    created.push(path.to_path_buf());
    Ok(())
}
