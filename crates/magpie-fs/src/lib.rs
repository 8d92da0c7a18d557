mod config;
mod doctor;
mod workspace;

pub use config::{
    DEFAULT_FULL_PAGE_SIZE, DEFAULT_HOST_URL, DEFAULT_PAGE_SIZE, DEFAULT_PROFILE, ProfileConfig,
    ProfileView, ResolvedProfile, WorkspaceConfig, list_profiles, load_config, resolve_profile,
    save_config, set_active_profile, set_profile_host,
};
pub use doctor::{DoctorCheck, DoctorReport, run_doctor};
pub use workspace::{WorkspaceInitResult, WorkspacePaths, init_workspace, resolve_workspace};
