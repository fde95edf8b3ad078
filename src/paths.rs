use crate::install::Install;
use anyhow::{Context, Result};
use directories::BaseDirs;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const APP_DIR_NAME: &str = "YMU";
pub const UPDATER_FILE_NAME: &str = "ymu_self_updater.exe";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
const SCRIPTS_DIR_NAME: &str = "scripts";
const DISABLED_DIR_NAME: &str = "disabled";

/// Directories owned by the utility itself (not by an installation).
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub updater_path: PathBuf,
}

impl AppPaths {
    pub fn resolve() -> Result<AppPaths> {
        Ok(AppPaths::with_root(&appdata_root()?))
    }

    pub fn with_root(root: &Path) -> AppPaths {
        let data_dir = root.join(APP_DIR_NAME);
        let updater_path = data_dir.join(UPDATER_FILE_NAME);
        AppPaths {
            data_dir,
            updater_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("create application data dir {}", self.data_dir.display())
        })?;
        Ok(())
    }
}

/// Directories and files belonging to one YimMenu installation.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    pub install: Install,
    pub data_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub disabled_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl InstallPaths {
    pub fn resolve(install: Install) -> Result<InstallPaths> {
        Ok(InstallPaths::with_root(&appdata_root()?, install))
    }

    pub fn with_root(root: &Path, install: Install) -> InstallPaths {
        let data_dir = root.join(install.data_dir_name());
        let scripts_dir = data_dir.join(SCRIPTS_DIR_NAME);
        let disabled_dir = scripts_dir.join(DISABLED_DIR_NAME);
        let settings_file = data_dir.join(SETTINGS_FILE_NAME);
        InstallPaths {
            install,
            data_dir,
            scripts_dir,
            disabled_dir,
            settings_file,
        }
    }

    /// Idempotent; creates the data dir and both script dirs.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.scripts_dir).with_context(|| {
            format!(
                "create {} scripts dir {}",
                self.install.display_name(),
                self.scripts_dir.display()
            )
        })?;
        fs::create_dir_all(&self.disabled_dir).with_context(|| {
            format!(
                "create {} disabled scripts dir {}",
                self.install.display_name(),
                self.disabled_dir.display()
            )
        })?;
        Ok(())
    }
}

/// Roaming application-data root. `APPDATA` wins when set so the layout
/// matches a native Windows install; elsewhere the platform config dir
/// stands in for it.
pub fn appdata_root() -> Result<PathBuf> {
    if let Some(raw) = env::var_os("APPDATA") {
        if !raw.is_empty() {
            return Ok(PathBuf::from(raw));
        }
    }

    let base = BaseDirs::new().context("resolve application data root")?;
    Ok(base.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn install_paths_follow_the_expected_layout() {
        let root = Path::new("/data");
        let paths = InstallPaths::with_root(root, Install::Legacy);
        assert_eq!(paths.data_dir, root.join("YimMenu"));
        assert_eq!(paths.scripts_dir, root.join("YimMenu").join("scripts"));
        assert_eq!(
            paths.disabled_dir,
            root.join("YimMenu").join("scripts").join("disabled")
        );
        assert_eq!(
            paths.settings_file,
            root.join("YimMenu").join("settings.json")
        );

        let enhanced = InstallPaths::with_root(root, Install::Enhanced);
        assert_eq!(enhanced.data_dir, root.join("YimMenuV2"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let paths = InstallPaths::with_root(dir.path(), Install::Enhanced);

        paths.ensure_dirs().expect("first ensure");
        paths.ensure_dirs().expect("second ensure");

        assert!(paths.scripts_dir.is_dir());
        assert!(paths.disabled_dir.is_dir());
    }

    #[test]
    fn app_paths_point_at_the_updater() {
        let paths = AppPaths::with_root(Path::new("/data"));
        assert_eq!(paths.data_dir, Path::new("/data/YMU"));
        assert_eq!(
            paths.updater_path,
            Path::new("/data/YMU/ymu_self_updater.exe")
        );
    }
}
