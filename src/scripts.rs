use crate::paths::InstallPaths;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, path::Path};
use tracing::{error, info};

pub const SCRIPT_EXTENSION: &str = ".lua";

/// Base names of the scripts found in each of an installation's directories.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptLists {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

/// Lists the scripts of one installation, creating its directories when they
/// are missing. Names come back sorted with the extension stripped.
pub fn list(paths: &InstallPaths) -> Result<ScriptLists> {
    paths.ensure_dirs().with_context(|| {
        format!(
            "prepare {} script directories",
            paths.install.display_name()
        )
    })?;
    Ok(ScriptLists {
        enabled: script_names(&paths.scripts_dir),
        disabled: script_names(&paths.disabled_dir),
    })
}

/// Moves a script out of the disabled directory into the active one.
pub fn enable(paths: &InstallPaths, name: &str) -> bool {
    move_script(paths, &paths.disabled_dir, &paths.scripts_dir, name, "enable")
}

/// Moves a script out of the active directory into the disabled one.
pub fn disable(paths: &InstallPaths, name: &str) -> bool {
    move_script(paths, &paths.scripts_dir, &paths.disabled_dir, name, "disable")
}

/// Duplicates a script from one installation into the other, leaving the
/// original in place. `enabled` selects the active directory pair; otherwise
/// the disabled pair is used on both sides.
pub fn copy_between(from: &InstallPaths, to: &InstallPaths, name: &str, enabled: bool) -> bool {
    let file_name = script_file_name(name);
    let source_dir = if enabled {
        &from.scripts_dir
    } else {
        &from.disabled_dir
    };
    let dest_dir = if enabled {
        &to.scripts_dir
    } else {
        &to.disabled_dir
    };

    let source = source_dir.join(&file_name);
    if !source.is_file() {
        error!(
            script = %file_name,
            install = from.install.as_str(),
            dir = %source_dir.display(),
            "cannot copy script: source not found"
        );
        return false;
    }

    if let Err(err) = fs::create_dir_all(dest_dir) {
        error!(
            dir = %dest_dir.display(),
            error = %err,
            "cannot copy script: destination dir not created"
        );
        return false;
    }

    let dest = dest_dir.join(&file_name);
    match fs::copy(&source, &dest) {
        Ok(_) => {
            info!(
                script = %file_name,
                from = from.install.as_str(),
                to = to.install.as_str(),
                "copied script between installations"
            );
            true
        }
        Err(err) => {
            error!(
                script = %file_name,
                error = %err,
                "failed to copy script between installations"
            );
            false
        }
    }
}

fn move_script(
    paths: &InstallPaths,
    source_dir: &Path,
    dest_dir: &Path,
    name: &str,
    action: &str,
) -> bool {
    let file_name = script_file_name(name);
    let source = source_dir.join(&file_name);
    if !source.is_file() {
        error!(
            script = %file_name,
            install = paths.install.as_str(),
            dir = %source_dir.display(),
            action,
            "cannot move script: source not found"
        );
        return false;
    }

    if let Err(err) = fs::create_dir_all(dest_dir) {
        error!(dir = %dest_dir.display(), error = %err, "cannot create script dir");
        return false;
    }

    let dest = dest_dir.join(&file_name);
    match rename_or_copy(&source, &dest) {
        Ok(()) => {
            info!(
                script = %file_name,
                install = paths.install.as_str(),
                action,
                "moved script"
            );
            true
        }
        Err(err) => {
            error!(
                script = %file_name,
                install = paths.install.as_str(),
                error = %err,
                action,
                "failed to move script"
            );
            false
        }
    }
}

fn rename_or_copy(source: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
    }
}

fn script_file_name(name: &str) -> String {
    if name.ends_with(SCRIPT_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{SCRIPT_EXTENSION}")
    }
}

/// Sorted file names first, then the extension comes off; scripts whose base
/// names contain dots keep the original relative order of the full names.
fn script_names(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(SCRIPT_EXTENSION))
        .collect();
    names.sort();

    names
        .into_iter()
        .map(|name| match name.strip_suffix(SCRIPT_EXTENSION) {
            Some(stem) => stem.to_string(),
            None => name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Install;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn installs_in(root: &Path) -> (InstallPaths, InstallPaths) {
        let legacy = InstallPaths::with_root(root, Install::Legacy);
        let enhanced = InstallPaths::with_root(root, Install::Enhanced);
        legacy.ensure_dirs().expect("legacy dirs");
        enhanced.ensure_dirs().expect("enhanced dirs");
        (legacy, enhanced)
    }

    fn touch(dir: &Path, file_name: &str) {
        fs::write(dir.join(file_name), "-- script").expect("write script");
    }

    #[test]
    fn listing_is_sorted_and_extension_stripped() {
        let dir = tempdir().expect("tempdir");
        let (legacy, _) = installs_in(dir.path());

        touch(&legacy.scripts_dir, "zeta.lua");
        touch(&legacy.scripts_dir, "alpha.lua");
        touch(&legacy.scripts_dir, "readme.txt");
        touch(&legacy.disabled_dir, "parked.lua");
        fs::create_dir(legacy.scripts_dir.join("nested.lua")).expect("decoy dir");

        let lists = list(&legacy).expect("list scripts");
        assert_eq!(lists.enabled, vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(lists.disabled, vec!["parked".to_string()]);
    }

    #[test]
    fn listing_creates_missing_directories() {
        let dir = tempdir().expect("tempdir");
        let legacy = InstallPaths::with_root(dir.path(), Install::Legacy);

        assert!(!legacy.scripts_dir.exists());
        let lists = list(&legacy).expect("list scripts");
        assert!(lists.enabled.is_empty());
        assert!(lists.disabled.is_empty());
        assert!(legacy.scripts_dir.is_dir());
        assert!(legacy.disabled_dir.is_dir());
    }

    #[test]
    fn enable_moves_the_file_out_of_disabled() {
        let dir = tempdir().expect("tempdir");
        let (legacy, _) = installs_in(dir.path());

        touch(&legacy.disabled_dir, "speedo.lua");
        assert!(enable(&legacy, "speedo"));

        assert!(legacy.scripts_dir.join("speedo.lua").is_file());
        assert!(!legacy.disabled_dir.join("speedo.lua").exists());
    }

    #[test]
    fn disable_moves_the_file_into_disabled() {
        let dir = tempdir().expect("tempdir");
        let (legacy, _) = installs_in(dir.path());

        touch(&legacy.scripts_dir, "speedo.lua");
        assert!(disable(&legacy, "speedo.lua"));

        assert!(legacy.disabled_dir.join("speedo.lua").is_file());
        assert!(!legacy.scripts_dir.join("speedo.lua").exists());
    }

    #[test]
    fn moving_a_missing_script_fails_without_side_effects() {
        let dir = tempdir().expect("tempdir");
        let (legacy, _) = installs_in(dir.path());

        assert!(!enable(&legacy, "ghost"));
        assert!(!disable(&legacy, "ghost"));
        let lists = list(&legacy).expect("list scripts");
        assert_eq!(lists, ScriptLists::default());
    }

    #[test]
    fn copy_between_keeps_the_original() {
        let dir = tempdir().expect("tempdir");
        let (legacy, enhanced) = installs_in(dir.path());

        touch(&legacy.scripts_dir, "shared.lua");
        assert!(copy_between(&legacy, &enhanced, "shared", true));

        assert!(legacy.scripts_dir.join("shared.lua").is_file());
        assert!(enhanced.scripts_dir.join("shared.lua").is_file());
    }

    #[test]
    fn copy_between_respects_the_disabled_pair() {
        let dir = tempdir().expect("tempdir");
        let (legacy, enhanced) = installs_in(dir.path());

        touch(&legacy.disabled_dir, "parked.lua");
        assert!(copy_between(&legacy, &enhanced, "parked", false));

        assert!(enhanced.disabled_dir.join("parked.lua").is_file());
        assert!(!enhanced.scripts_dir.join("parked.lua").exists());

        // The active pair does not see the disabled copy.
        assert!(!copy_between(&legacy, &enhanced, "parked", true));
    }
}
