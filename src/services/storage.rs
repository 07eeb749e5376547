// 本地数据持久化服务

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{AppSettings, HostProfile, KnownHostsConfig};

/// 主机配置文件名（按顺序查找）
pub const PROFILE_FILE_NAMES: [&str; 2] = [".essh.yaml", "essh.yaml"];

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/essh
/// Linux: ~/.config/essh
/// Windows: C:\Users\<用户名>\AppData\Roaming\essh
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("cannot determine the system config directory")?
        .join("essh");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("cannot create the config directory")?;
    }
    Ok(config_dir)
}

// ======================== 主机配置 ========================

/// 主机配置文件候选路径：先主目录，再当前目录
pub fn profile_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.extend(PROFILE_FILE_NAMES.iter().map(|name| home.join(name)));
    }
    paths.extend(PROFILE_FILE_NAMES.iter().map(PathBuf::from));
    paths
}

/// 加载主机配置
///
/// 指定了 `explicit` 时只读取该文件，否则按 [`profile_search_paths`] 顺序取第一个可读文件
pub fn load_profiles(explicit: Option<&Path>) -> Result<Vec<HostProfile>> {
    let (path, content) = match explicit {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("cannot read host config {}", path.display()))?;
            (path.to_path_buf(), content)
        }
        None => read_first_existing(&profile_search_paths())?,
    };

    tracing::debug!("[Config] Loading hosts from {}", path.display());
    parse_profiles(&content).with_context(|| format!("cannot parse host config {}", path.display()))
}

fn read_first_existing(candidates: &[PathBuf]) -> Result<(PathBuf, String)> {
    for path in candidates {
        match fs::read_to_string(path) {
            Ok(content) => return Ok((path.clone(), content)),
            Err(e) => tracing::trace!("[Config] Skipping {}: {}", path.display(), e),
        }
    }
    let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    bail!("no host config found (searched: {})", searched.join(", "))
}

/// 解析 YAML 主机列表并规范化
pub fn parse_profiles(content: &str) -> Result<Vec<HostProfile>> {
    let mut profiles: Vec<HostProfile> = if content.trim().is_empty() {
        Vec::new()
    } else {
        serde_yaml::from_str(content).context("invalid YAML host list")?
    };
    if profiles.is_empty() {
        bail!("no hosts configured");
    }
    for profile in &mut profiles {
        profile.normalize_top_level();
        if profile.name.is_empty() {
            profile.name = profile.host.clone();
        }
    }
    Ok(profiles)
}

// ======================== Settings 配置持久化 ========================

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载应用设置，首次运行时写入默认设置文件
pub fn load_settings() -> Result<AppSettings> {
    let path = get_settings_file()?;
    if !path.exists() {
        let settings = AppSettings::default();
        if let Err(e) = save_settings_to(&path, &settings) {
            tracing::warn!("[Config] Cannot write default settings: {:#}", e);
        }
        return Ok(settings);
    }
    load_settings_from(&path)
}

pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = fs::read_to_string(path).context("cannot read settings file")?;
    let settings: AppSettings = serde_json::from_str(&content).context("cannot parse settings file")?;
    Ok(settings)
}

/// 保存应用设置
pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("cannot serialize settings")?;
    fs::write(path, content).context("cannot write settings file")?;
    Ok(())
}

// ======================== Known Hosts 持久化 ========================

/// 获取 known_hosts 文件路径
pub fn get_known_hosts_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("known_hosts.json"))
}

pub fn load_known_hosts_from(path: &Path) -> Result<KnownHostsConfig> {
    if !path.exists() {
        return Ok(KnownHostsConfig::default());
    }
    let content = fs::read_to_string(path).context("cannot read known hosts file")?;
    let config: KnownHostsConfig =
        serde_json::from_str(&content).context("cannot parse known hosts file")?;
    Ok(config)
}

pub fn save_known_hosts_to(path: &Path, config: &KnownHostsConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("cannot create known hosts directory")?;
    }
    let content = serde_json::to_string_pretty(config).context("cannot serialize known hosts")?;
    fs::write(path, content).context("cannot write known hosts file")?;
    Ok(())
}
