use crate::{
    install::{managed_installs, Install},
    paths::{AppPaths, InstallPaths},
    scripts,
    settings::SettingsStore,
    update::{self, UpdateChecker, UpdateStatus},
};
use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    install: Option<String>,
}

enum CliCommand {
    ScriptsList,
    ScriptsEnable(String),
    ScriptsDisable(String),
    ScriptsCopy(CopyOptions),
    SettingsGet(GetOptions),
    SettingsSet { key: String, value: String },
    SettingsInit,
    SettingsSync { source: Install, target: Install },
    AutoReloadStatus,
    AutoReloadSet(bool),
    Paths,
    UpdateCheck,
    UpdateApply { force: bool },
    Help,
    Version,
}

struct CopyOptions {
    name: String,
    source: Install,
    target: Install,
    disabled: bool,
}

struct GetOptions {
    key: String,
    default: Option<String>,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, global) = parse_args(&args)?;
    run_command(command, global)
}

fn parse_args(args: &[String]) -> Result<(CliCommand, GlobalOptions)> {
    if args.is_empty() {
        return Ok((
            CliCommand::Help,
            GlobalOptions {
                format: OutputFormat::Text,
                install: None,
            },
        ));
    }

    if matches!(args.first().map(|s| s.as_str()), Some("--help" | "-h" | "help")) {
        return Ok((
            CliCommand::Help,
            GlobalOptions {
                format: OutputFormat::Text,
                install: None,
            },
        ));
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok((
            CliCommand::Version,
            GlobalOptions {
                format: OutputFormat::Text,
                install: None,
            },
        ));
    }

    let (global, tokens) = parse_global_options(args);
    if let Some(command) = parse_subcommand(&tokens)? {
        return Ok((command, global));
    }

    Ok((CliCommand::Help, global))
}

fn parse_global_options(args: &[String]) -> (GlobalOptions, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut install = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--install=") {
            install = Some(value.to_string());
            continue;
        }
        if arg == "--install" {
            if let Some(value) = iter.next() {
                install = Some(value.to_string());
            }
            continue;
        }
        tokens.push(arg.to_string());
    }

    (GlobalOptions { format, install }, tokens)
}

fn parse_subcommand(tokens: &[String]) -> Result<Option<CliCommand>> {
    let Some(head) = tokens.first() else {
        return Ok(None);
    };
    match head.as_str() {
        "scripts" => {
            let sub = tokens.get(1).map(|value| value.as_str()).unwrap_or("list");
            let command = match sub {
                "list" => CliCommand::ScriptsList,
                "enable" => {
                    let name = tokens.get(2).ok_or_else(|| {
                        anyhow::anyhow!("scripts enable requires a script name")
                    })?;
                    CliCommand::ScriptsEnable(name.to_string())
                }
                "disable" => {
                    let name = tokens.get(2).ok_or_else(|| {
                        anyhow::anyhow!("scripts disable requires a script name")
                    })?;
                    CliCommand::ScriptsDisable(name.to_string())
                }
                "copy" => {
                    CliCommand::ScriptsCopy(parse_scripts_copy(tokens.get(2..).unwrap_or(&[]))?)
                }
                _ => {
                    bail!("Unknown scripts command: {sub} (use 'list', 'enable', 'disable', or 'copy')");
                }
            };
            Ok(Some(command))
        }
        "settings" => {
            let Some(sub) = tokens.get(1) else {
                bail!("settings requires a command (use 'get', 'set', 'init', or 'sync')");
            };
            let command = match sub.as_str() {
                "get" => {
                    CliCommand::SettingsGet(parse_settings_get(tokens.get(2..).unwrap_or(&[]))?)
                }
                "set" => {
                    let key = tokens
                        .get(2)
                        .ok_or_else(|| anyhow::anyhow!("settings set requires a key"))?;
                    let value = tokens
                        .get(3)
                        .ok_or_else(|| anyhow::anyhow!("settings set requires a value"))?;
                    CliCommand::SettingsSet {
                        key: key.to_string(),
                        value: value.to_string(),
                    }
                }
                "init" => CliCommand::SettingsInit,
                "sync" => parse_settings_sync(tokens.get(2..).unwrap_or(&[]))?,
                _ => {
                    bail!("Unknown settings command: {sub} (use 'get', 'set', 'init', or 'sync')");
                }
            };
            Ok(Some(command))
        }
        "autoreload" => {
            let sub = tokens
                .get(1)
                .map(|value| value.as_str())
                .unwrap_or("status");
            let command = match sub {
                "status" => CliCommand::AutoReloadStatus,
                "on" => CliCommand::AutoReloadSet(true),
                "off" => CliCommand::AutoReloadSet(false),
                _ => {
                    bail!("Unknown autoreload command: {sub} (use 'status', 'on', or 'off')");
                }
            };
            Ok(Some(command))
        }
        "paths" => Ok(Some(CliCommand::Paths)),
        "update" => {
            let sub = tokens.get(1).map(|value| value.as_str()).unwrap_or("check");
            let command = match sub {
                "check" => CliCommand::UpdateCheck,
                "apply" => {
                    let force = tokens
                        .get(2..)
                        .unwrap_or(&[])
                        .iter()
                        .any(|arg| arg == "--force");
                    CliCommand::UpdateApply { force }
                }
                _ => {
                    bail!("Unknown update command: {sub} (use 'check' or 'apply')");
                }
            };
            Ok(Some(command))
        }
        _ => Ok(None),
    }
}

fn parse_scripts_copy(args: &[String]) -> Result<CopyOptions> {
    let mut name = None;
    let mut source = None;
    let mut target = None;
    let mut disabled = false;
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--from" => {
                if let Some(value) = iter.next() {
                    source = Some(parse_install(value)?);
                } else {
                    bail!("--from requires an installation");
                }
            }
            value if value.starts_with("--from=") => {
                source = Some(parse_install(value.trim_start_matches("--from="))?);
            }
            "--to" => {
                if let Some(value) = iter.next() {
                    target = Some(parse_install(value)?);
                } else {
                    bail!("--to requires an installation");
                }
            }
            value if value.starts_with("--to=") => {
                target = Some(parse_install(value.trim_start_matches("--to="))?);
            }
            "--disabled" => disabled = true,
            value if value.starts_with("--") => {
                bail!("Unknown scripts copy option: {value}");
            }
            value => {
                if name.is_none() {
                    name = Some(value.to_string());
                }
            }
        }
    }

    let Some(name) = name else {
        bail!("scripts copy requires a script name");
    };
    let Some(source) = source else {
        bail!("scripts copy requires --from <v1|v2>");
    };
    let Some(target) = target else {
        bail!("scripts copy requires --to <v1|v2>");
    };

    Ok(CopyOptions {
        name,
        source,
        target,
        disabled,
    })
}

fn parse_settings_get(args: &[String]) -> Result<GetOptions> {
    let mut key = None;
    let mut default = None;
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--default" => {
                if let Some(value) = iter.next() {
                    default = Some(value.to_string());
                } else {
                    bail!("--default requires a value");
                }
            }
            value if value.starts_with("--default=") => {
                default = Some(value.trim_start_matches("--default=").to_string());
            }
            value if value.starts_with("--") => {
                bail!("Unknown settings get option: {value}");
            }
            value => {
                if key.is_none() {
                    key = Some(value.to_string());
                }
            }
        }
    }

    let Some(key) = key else {
        bail!("settings get requires a key (for example 'lua.auto_reload_scripts')");
    };

    Ok(GetOptions { key, default })
}

fn parse_settings_sync(args: &[String]) -> Result<CliCommand> {
    let mut source = Install::Legacy;
    let mut target = Install::Enhanced;
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--from" => {
                if let Some(value) = iter.next() {
                    source = parse_install(value)?;
                } else {
                    bail!("--from requires an installation");
                }
            }
            value if value.starts_with("--from=") => {
                source = parse_install(value.trim_start_matches("--from="))?;
            }
            "--to" => {
                if let Some(value) = iter.next() {
                    target = parse_install(value)?;
                } else {
                    bail!("--to requires an installation");
                }
            }
            value if value.starts_with("--to=") => {
                target = parse_install(value.trim_start_matches("--to="))?;
            }
            _ => {
                bail!("Unknown settings sync option: {arg}");
            }
        }
    }

    Ok(CliCommand::SettingsSync { source, target })
}

fn parse_install(value: &str) -> Result<Install> {
    Install::parse(value)
        .ok_or_else(|| anyhow::anyhow!("Unknown installation: {value} (use 'v1' or 'v2')"))
}

fn resolve_install(raw: Option<&str>) -> Result<Install> {
    match raw {
        Some(value) => parse_install(value),
        None => Ok(Install::default()),
    }
}

fn run_command(command: CliCommand, global: GlobalOptions) -> Result<()> {
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("YMU v{CURRENT_VERSION}");
            Ok(())
        }
        CliCommand::ScriptsList => {
            let install = resolve_install(global.install.as_deref())?;
            list_scripts(install, global.format)
        }
        CliCommand::ScriptsEnable(name) => {
            let install = resolve_install(global.install.as_deref())?;
            enable_script(install, &name)
        }
        CliCommand::ScriptsDisable(name) => {
            let install = resolve_install(global.install.as_deref())?;
            disable_script(install, &name)
        }
        CliCommand::ScriptsCopy(options) => copy_script(options),
        CliCommand::SettingsGet(options) => {
            let install = resolve_install(global.install.as_deref())?;
            get_setting(options, install, global.format)
        }
        CliCommand::SettingsSet { key, value } => {
            let install = resolve_install(global.install.as_deref())?;
            set_setting(&key, &value, install)
        }
        CliCommand::SettingsInit => {
            let install = resolve_install(global.install.as_deref())?;
            init_settings(install)
        }
        CliCommand::SettingsSync { source, target } => sync_settings(source, target),
        CliCommand::AutoReloadStatus => autoreload_status(global.format),
        CliCommand::AutoReloadSet(value) => {
            let install = resolve_install(global.install.as_deref())?;
            set_autoreload(value, install)
        }
        CliCommand::Paths => list_paths(global.format),
        CliCommand::UpdateCheck => check_updates(global.format),
        CliCommand::UpdateApply { force } => apply_update(force),
    }
}

fn list_scripts(install: Install, format: OutputFormat) -> Result<()> {
    let paths = InstallPaths::resolve(install)?;
    let lists = scripts::list(&paths)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&lists)?);
        }
        OutputFormat::Text => {
            println!("{} scripts", install.display_name());
            println!("Enabled:");
            if lists.enabled.is_empty() {
                println!("  (none)");
            }
            for name in &lists.enabled {
                println!("  {name}");
            }
            println!("Disabled:");
            if lists.disabled.is_empty() {
                println!("  (none)");
            }
            for name in &lists.disabled {
                println!("  {name}");
            }
        }
    }

    Ok(())
}

fn enable_script(install: Install, name: &str) -> Result<()> {
    let paths = InstallPaths::resolve(install)?;
    if !scripts::enable(&paths, name) {
        bail!("Could not enable '{name}' for {}", install.display_name());
    }
    println!("Enabled {name} for {}", install.display_name());
    Ok(())
}

fn disable_script(install: Install, name: &str) -> Result<()> {
    let paths = InstallPaths::resolve(install)?;
    if !scripts::disable(&paths, name) {
        bail!("Could not disable '{name}' for {}", install.display_name());
    }
    println!("Disabled {name} for {}", install.display_name());
    Ok(())
}

fn copy_script(options: CopyOptions) -> Result<()> {
    if options.source == options.target {
        bail!("scripts copy requires two different installations");
    }
    let from = InstallPaths::resolve(options.source)?;
    let to = InstallPaths::resolve(options.target)?;
    if !scripts::copy_between(&from, &to, &options.name, !options.disabled) {
        bail!(
            "Could not copy '{}' from {} to {}",
            options.name,
            options.source.display_name(),
            options.target.display_name()
        );
    }
    println!(
        "Copied {} from {} to {}",
        options.name,
        options.source.display_name(),
        options.target.display_name()
    );
    Ok(())
}

fn get_setting(options: GetOptions, install: Install, format: OutputFormat) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    let value = match &options.default {
        Some(raw) => Some(store.get_or(&options.key, parse_value(raw), install)),
        None => store.get(&options.key, install),
    };

    match format {
        OutputFormat::Json => {
            let value = value.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => match value {
            Some(Value::String(text)) => println!("{text}"),
            Some(value) => println!("{value}"),
            None => println!("null"),
        },
    }

    Ok(())
}

fn set_setting(key: &str, raw: &str, install: Install) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    if !store.set(key, parse_value(raw), install) {
        bail!("Could not write {key} for {}", install.display_name());
    }
    println!("Set {key} for {}", install.display_name());
    Ok(())
}

/// Values are parsed as JSON first so `true`, `3`, and `{"a": 1}` arrive
/// typed; anything that fails to parse is stored as a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn init_settings(install: Install) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    if !store.ensure_exists(install) {
        bail!("Could not create settings for {}", install.display_name());
    }
    println!("Settings ready for {}", install.display_name());
    Ok(())
}

fn sync_settings(source: Install, target: Install) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    if !store.sync_auto_reload(source, target) {
        bail!(
            "Could not sync auto-reload from {} to {}",
            source.display_name(),
            target.display_name()
        );
    }
    println!(
        "Synced auto-reload from {} to {}",
        source.display_name(),
        target.display_name()
    );
    Ok(())
}

#[derive(Serialize)]
struct AutoReloadItem {
    install: &'static str,
    name: &'static str,
    auto_reload_scripts: bool,
    auto_reload_changed_scripts: bool,
}

fn autoreload_status(format: OutputFormat) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    let (legacy_changed, enhanced_changed) = store.both_auto_reload_changed();
    let changed = [legacy_changed, enhanced_changed];

    let mut items = Vec::new();
    for install in managed_installs() {
        items.push(AutoReloadItem {
            install: install.as_str(),
            name: install.display_name(),
            auto_reload_scripts: store.auto_reload_scripts(install),
            auto_reload_changed_scripts: changed[install.index()],
        });
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for item in items {
                println!("{} ({})", item.name, item.install);
                println!("  auto_reload_scripts: {}", item.auto_reload_scripts);
                println!(
                    "  auto_reload_changed_scripts: {}",
                    item.auto_reload_changed_scripts
                );
            }
        }
    }

    Ok(())
}

fn set_autoreload(value: bool, install: Install) -> Result<()> {
    let mut store = SettingsStore::from_registry()?;
    if !store.set_auto_reload(value, install) {
        bail!("Could not update auto-reload for {}", install.display_name());
    }
    let state = if value { "on" } else { "off" };
    println!("Auto-reload {state} for {}", install.display_name());
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    app_dir: String,
    updater_path: String,
    installs: Vec<InstallPathsItem>,
}

#[derive(Serialize)]
struct InstallPathsItem {
    install: &'static str,
    name: &'static str,
    data_dir: String,
    scripts_dir: String,
    disabled_dir: String,
    settings_file: String,
}

fn list_paths(format: OutputFormat) -> Result<()> {
    let app = AppPaths::resolve()?;
    let mut installs = Vec::new();
    for install in managed_installs() {
        let paths = InstallPaths::resolve(install)?;
        installs.push(InstallPathsItem {
            install: install.as_str(),
            name: install.display_name(),
            data_dir: paths.data_dir.display().to_string(),
            scripts_dir: paths.scripts_dir.display().to_string(),
            disabled_dir: paths.disabled_dir.display().to_string(),
            settings_file: paths.settings_file.display().to_string(),
        });
    }
    let output = PathsOutput {
        app_dir: app.data_dir.display().to_string(),
        updater_path: app.updater_path.display().to_string(),
        installs,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("App dir: {}", output.app_dir);
            println!("Updater: {}", output.updater_path);
            for item in output.installs {
                println!("{} ({})", item.name, item.install);
                println!("  Data dir: {}", item.data_dir);
                println!("  Scripts: {}", item.scripts_dir);
                println!("  Disabled: {}", item.disabled_dir);
                println!("  Settings: {}", item.settings_file);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct UpdateCheckOutput {
    status: UpdateStatus,
    current_version: String,
    latest_version: String,
}

fn check_updates(format: OutputFormat) -> Result<()> {
    let mut checker = UpdateChecker::new();
    let check = checker.check(CURRENT_VERSION)?;
    let output = UpdateCheckOutput {
        status: check.status,
        current_version: CURRENT_VERSION.to_string(),
        latest_version: check.latest_version,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match output.status {
            UpdateStatus::UpdateAvailable => {
                println!(
                    "Update available: v{} (running v{})",
                    output.latest_version, output.current_version
                );
            }
            UpdateStatus::UpToDate => {
                println!("YMU is up to date (v{})", output.current_version);
            }
            UpdateStatus::Ahead => {
                println!(
                    "Running v{}, ahead of the latest release v{}",
                    output.current_version, output.latest_version
                );
            }
        },
    }

    Ok(())
}

fn apply_update(force: bool) -> Result<()> {
    let mut checker = UpdateChecker::new();
    let check = checker.check(CURRENT_VERSION)?;
    if check.status != UpdateStatus::UpdateAvailable && !force {
        match check.status {
            UpdateStatus::Ahead => println!(
                "Running v{CURRENT_VERSION}, ahead of the latest release v{}; pass --force to reinstall",
                check.latest_version
            ),
            _ => println!(
                "YMU is already up to date (v{CURRENT_VERSION}); pass --force to reinstall"
            ),
        }
        return Ok(());
    }

    let paths = AppPaths::resolve()?;
    let updater = update::download_updater(&paths)?;
    update::launch_updater(&updater)?;
    println!("Updater launched; YMU will restart once it finishes.");
    Ok(())
}

fn print_help() {
    println!("YMU v{CURRENT_VERSION}");
    println!("Usage:");
    println!("  ymu scripts list                List enabled and disabled Lua scripts");
    println!("  ymu scripts enable <name>       Move a script out of the disabled folder");
    println!("  ymu scripts disable <name>      Park a script in the disabled folder");
    println!("  ymu scripts copy <name> --from <v1|v2> --to <v1|v2> [--disabled]");
    println!("                                  Copy a script between installations");
    println!("  ymu settings get <key> [--default <value>]");
    println!("                                  Read a setting by dotted key");
    println!("  ymu settings set <key> <value>  Write a setting (value parsed as JSON)");
    println!("  ymu settings init               Create the settings file with defaults");
    println!("  ymu settings sync [--from <v1|v2>] [--to <v1|v2>]");
    println!("                                  Copy the changed-scripts flag (default v1 -> v2)");
    println!("  ymu autoreload status           Show auto-reload flags for both installations");
    println!("  ymu autoreload on|off           Toggle auto-reload for one installation");
    println!("  ymu paths                       Show resolved directories");
    println!("  ymu update check                Check for a newer release");
    println!("  ymu update apply [--force]      Download and launch the self-updater");
    println!();
    println!("Global options:");
    println!("  --install <v1|v2>               Target installation (default v1)");
    println!("  --format <json|text>            Output format");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
}
