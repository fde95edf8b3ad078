use crate::paths::{AppPaths, UPDATER_FILE_NAME};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    cmp::Ordering,
    collections::HashMap,
    env,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    process::Command,
    time::{Duration, Instant},
};
use tracing::{debug, info};

const APP_RELEASES_URL: &str = "https://api.github.com/repos/tommylam120/YMU/releases/latest";
const UPDATER_RELEASES_URL: &str =
    "https://api.github.com/repos/tommylam120/YMU-Updater/releases/latest";
const CHECKSUMS_ASSET: &str = "SHA256SUMS.txt";
const USER_AGENT: &str = concat!("YMU/", env!("CARGO_PKG_VERSION"));
const CHECK_CACHE_TTL: Duration = Duration::from_secs(300);
const MIN_UPDATER_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    UpdateAvailable,
    UpToDate,
    Ahead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub status: UpdateStatus,
    pub latest_version: String,
}

/// Asks the release host for the latest version, remembering the last answer
/// for a few minutes so repeated checks stay off the network. Failed checks
/// are never cached.
pub struct UpdateChecker {
    cached: Option<(UpdateCheck, Instant)>,
    ttl: Duration,
}

impl UpdateChecker {
    pub fn new() -> UpdateChecker {
        UpdateChecker::with_ttl(CHECK_CACHE_TTL)
    }

    fn with_ttl(ttl: Duration) -> UpdateChecker {
        UpdateChecker { cached: None, ttl }
    }

    pub fn check(&mut self, current_version: &str) -> Result<UpdateCheck> {
        if let Some(check) = self.fresh_cached() {
            debug!("serving cached update check");
            return Ok(check);
        }

        let release = fetch_latest_release(APP_RELEASES_URL)?;
        let latest_version = normalize_version(&release.tag_name);
        let check = UpdateCheck {
            status: status_for(&latest_version, current_version),
            latest_version,
        };
        self.cached = Some((check.clone(), Instant::now()));
        Ok(check)
    }

    fn fresh_cached(&self) -> Option<UpdateCheck> {
        let (check, fetched_at) = self.cached.as_ref()?;
        (fetched_at.elapsed() < self.ttl).then(|| check.clone())
    }
}

impl Default for UpdateChecker {
    fn default() -> Self {
        UpdateChecker::new()
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
    size: Option<u64>,
}

/// Downloads the external updater into the application data dir and returns
/// its path. The binary is staged next to the target, verified, and only then
/// renamed into place.
pub fn download_updater(paths: &AppPaths) -> Result<PathBuf> {
    paths.ensure_dirs()?;

    let release = fetch_latest_release(UPDATER_RELEASES_URL)?;
    let asset =
        select_updater_asset(&release.assets).context("latest updater release has no assets")?;

    let target = paths.updater_path.clone();
    let staged = staged_path(&target);
    download_asset(&asset, &staged)?;

    if let Err(err) = verify_staged_updater(&staged, &asset, &release.assets) {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }

    fs::rename(&staged, &target)
        .or_else(|_| fs::copy(&staged, &target).and_then(|_| fs::remove_file(&staged)))
        .context("move updater into place")?;

    info!(
        path = %target.display(),
        version = %normalize_version(&release.tag_name),
        "updater downloaded"
    );
    Ok(target)
}

/// Hands control to the updater, passing the running executable's path so it
/// knows what to replace.
pub fn launch_updater(updater: &Path) -> Result<()> {
    let current_exe = env::current_exe().context("resolve current executable")?;
    spawn_detached(updater, &current_exe)?;
    info!(updater = %updater.display(), "updater launched");
    Ok(())
}

#[cfg(windows)]
fn spawn_detached(updater: &Path, current_exe: &Path) -> Result<()> {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    for flags in [DETACHED_PROCESS, CREATE_NO_WINDOW] {
        match Command::new(updater)
            .arg(current_exe)
            .creation_flags(flags)
            .spawn()
        {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "updater spawn with creation flags {flags:#x} failed"
                );
            }
        }
    }

    Command::new(updater)
        .arg(current_exe)
        .spawn()
        .map(|_| ())
        .context("launch updater")
}

#[cfg(not(windows))]
fn spawn_detached(updater: &Path, current_exe: &Path) -> Result<()> {
    Command::new(updater)
        .arg(current_exe)
        .spawn()
        .map(|_| ())
        .context("launch updater")
}

fn fetch_latest_release(url: &str) -> Result<Release> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(10))
        .timeout_write(Duration::from_secs(10))
        .build();
    let response = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .set("Accept", "application/vnd.github.v3+json")
        .call()
        .context("fetch latest release")?;
    let release: Release = response.into_json().context("decode release")?;
    Ok(release)
}

fn status_for(latest: &str, current: &str) -> UpdateStatus {
    match compare_versions(latest, current) {
        Some(Ordering::Greater) => UpdateStatus::UpdateAvailable,
        Some(Ordering::Less) => UpdateStatus::Ahead,
        _ => UpdateStatus::UpToDate,
    }
}

fn compare_versions(latest: &str, current: &str) -> Option<Ordering> {
    Some(parse_version(latest)?.cmp(&parse_version(current)?))
}

fn normalize_version(tag: &str) -> String {
    tag.trim_start_matches('v').to_string()
}

fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let raw = raw
        .trim_start_matches('v')
        .split('-')
        .next()?
        .split('+')
        .next()?;
    let mut parts = raw.split('.').map(|part| part.parse::<u64>().ok());
    let major = parts.next().flatten()?;
    let minor = parts.next().flatten()?;
    let patch = parts.next().flatten()?;
    Some((major, minor, patch))
}

/// The release usually carries a single executable; an exact name match wins
/// over whatever happens to be listed first.
fn select_updater_asset(assets: &[Asset]) -> Option<Asset> {
    assets
        .iter()
        .find(|asset| asset.name == UPDATER_FILE_NAME)
        .or_else(|| assets.first())
        .cloned()
}

fn download_asset(asset: &Asset, path: &Path) -> Result<()> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(60))
        .timeout_write(Duration::from_secs(60))
        .build();
    let response = agent
        .get(&asset.browser_download_url)
        .set("User-Agent", USER_AGENT)
        .call()
        .context("download updater asset")?;
    let mut reader = response.into_reader();
    let mut file = File::create(path).context("create staged updater file")?;
    io::copy(&mut reader, &mut file).context("write staged updater file")?;
    Ok(())
}

fn verify_staged_updater(staged: &Path, asset: &Asset, assets: &[Asset]) -> Result<()> {
    let checksums = fetch_checksums(assets).unwrap_or_default();
    if let Some(expected) = checksums.get(&asset.name) {
        verify_sha256(staged, expected)?;
    }
    validate_updater_binary(staged, asset.size)
}

fn validate_updater_binary(path: &Path, expected_size: Option<u64>) -> Result<()> {
    let metadata = fs::metadata(path).context("inspect downloaded updater")?;
    if metadata.len() < MIN_UPDATER_SIZE {
        bail!(
            "downloaded updater is suspiciously small ({} bytes)",
            metadata.len()
        );
    }
    if let Some(expected) = expected_size {
        if metadata.len() != expected {
            bail!(
                "downloaded updater is {} bytes but the release lists {}",
                metadata.len(),
                expected
            );
        }
    }

    let mut magic = [0u8; 2];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .context("read updater header")?;
    if &magic != b"MZ" {
        bail!("downloaded updater is not a Windows executable");
    }
    Ok(())
}

fn fetch_checksums(assets: &[Asset]) -> Result<HashMap<String, String>> {
    let checksum_asset = assets
        .iter()
        .find(|asset| asset.name == CHECKSUMS_ASSET)
        .cloned()
        .context("missing SHA256SUMS")?;
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(10))
        .timeout_write(Duration::from_secs(10))
        .build();
    let response = agent
        .get(&checksum_asset.browser_download_url)
        .set("User-Agent", USER_AGENT)
        .call()
        .context("download SHA256SUMS")?;
    let body = response.into_string().context("read SHA256SUMS")?;
    Ok(parse_checksums(&body))
}

fn parse_checksums(body: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in body.lines() {
        let mut parts = line.split_whitespace();
        let hash = match parts.next() {
            Some(value) => value.trim(),
            None => continue,
        };
        let name = match parts.next() {
            Some(value) => value.trim(),
            None => continue,
        };
        map.insert(name.to_string(), hash.to_lowercase());
    }
    map
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path).context("open updater for checksum")?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        bail!("checksum mismatch for {}", path.display());
    }
    Ok(())
}

fn staged_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".tmp");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/{name}"),
            size: None,
        }
    }

    #[test]
    fn version_parsing_copes_with_tag_noise() {
        assert_eq!(parse_version("v1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_version("1.2.3-beta.1"), Some((1, 2, 3)));
        assert_eq!(parse_version("1.2.3+build5"), Some((1, 2, 3)));
        assert_eq!(parse_version("2.0"), None);
        assert_eq!(parse_version("release"), None);
    }

    #[test]
    fn normalization_strips_the_tag_prefix() {
        assert_eq!(normalize_version("v1.1.8"), "1.1.8");
        assert_eq!(normalize_version("1.1.8"), "1.1.8");
    }

    #[test]
    fn status_reflects_the_version_ordering() {
        assert_eq!(status_for("1.2.0", "1.1.7"), UpdateStatus::UpdateAvailable);
        assert_eq!(status_for("1.1.7", "1.1.7"), UpdateStatus::UpToDate);
        assert_eq!(status_for("1.1.7", "1.2.0"), UpdateStatus::Ahead);
        assert_eq!(status_for("nightly", "1.1.7"), UpdateStatus::UpToDate);
    }

    #[test]
    fn updater_asset_prefers_the_exact_name() {
        let assets = vec![asset("notes.txt"), asset(UPDATER_FILE_NAME)];
        let chosen = select_updater_asset(&assets).expect("asset");
        assert_eq!(chosen.name, UPDATER_FILE_NAME);

        let fallback = vec![asset("other.exe")];
        let chosen = select_updater_asset(&fallback).expect("asset");
        assert_eq!(chosen.name, "other.exe");

        assert!(select_updater_asset(&[]).is_none());
    }

    #[test]
    fn checksum_lines_parse_into_a_map() {
        let body = "0A1B2C  ymu_self_updater.exe\n\ndeadbeef  notes.txt\nmalformed\n";
        let map = parse_checksums(body);
        assert_eq!(
            map.get("ymu_self_updater.exe"),
            Some(&"0a1b2c".to_string())
        );
        assert_eq!(map.get("notes.txt"), Some(&"deadbeef".to_string()));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn binary_validation_checks_size_and_magic() {
        let dir = tempdir().expect("tempdir");

        let good = dir.path().join("good.exe");
        let mut payload = b"MZ".to_vec();
        payload.resize(2048, 0);
        fs::write(&good, &payload).expect("write good");
        assert!(validate_updater_binary(&good, None).is_ok());
        assert!(validate_updater_binary(&good, Some(2048)).is_ok());
        assert!(validate_updater_binary(&good, Some(4096)).is_err());

        let tiny = dir.path().join("tiny.exe");
        fs::write(&tiny, b"MZ").expect("write tiny");
        assert!(validate_updater_binary(&tiny, None).is_err());

        let wrong = dir.path().join("wrong.exe");
        let mut payload = b"PK".to_vec();
        payload.resize(2048, 0);
        fs::write(&wrong, &payload).expect("write wrong");
        assert!(validate_updater_binary(&wrong, None).is_err());
    }

    #[test]
    fn sha256_verification_accepts_matching_case_insensitive_digests() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("asset.bin");
        fs::write(&path, b"ymu").expect("write asset");

        // sha256("ymu")
        let digest = "627361922b5c2e4811d4d09aba3475c37c4a57d53699976d28d7b0e854a64a4f";
        assert!(verify_sha256(&path, digest).is_ok());
        assert!(verify_sha256(&path, &digest.to_uppercase()).is_ok());
        assert!(verify_sha256(&path, "00").is_err());
    }

    #[test]
    fn cached_check_is_served_within_the_ttl() {
        let mut checker = UpdateChecker::with_ttl(Duration::from_secs(3600));
        let check = UpdateCheck {
            status: UpdateStatus::UpToDate,
            latest_version: "1.1.7".to_string(),
        };
        checker.cached = Some((check.clone(), Instant::now()));
        assert_eq!(checker.fresh_cached(), Some(check));
    }

    #[test]
    fn zero_ttl_cache_never_serves() {
        let mut checker = UpdateChecker::with_ttl(Duration::ZERO);
        let check = UpdateCheck {
            status: UpdateStatus::Ahead,
            latest_version: "1.0.0".to_string(),
        };
        checker.cached = Some((check, Instant::now()));
        assert_eq!(checker.fresh_cached(), None);
    }
}
