//! Flare Packet Hook 配置模块
//!
//! - 日志、结构特化、监听分发、拦截器四组开关
//! - 配置来源：显式路径、`FLARE_PACKET_HOOK_CONFIG` 环境变量、默认候选路径
//! - 目录来源以 `base.toml` 为基础，按文件名顺序合并其余 `*.toml` 片段

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

/// 指定配置路径的环境变量
pub const CONFIG_ENV: &str = "FLARE_PACKET_HOOK_CONFIG";

/// 全局配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<ProtocolConfig> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 后台结构特化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecializerConfig {
    /// 关闭后所有视图都走通用路径
    pub enabled: bool,
    /// 关闭时等待后台线程的最长时间（毫秒）
    pub shutdown_grace_ms: u64,
    /// 待编译队列容量，队列满时拒绝调度
    pub queue_capacity: usize,
    pub thread_name: String,
}

impl Default for SpecializerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shutdown_grace_ms: 2000,
            queue_capacity: 1024,
            thread_name: "packet-hook-specializer".to_string(),
        }
    }
}

/// 监听分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 执行 OFF_THREAD 监听器的工作线程数，0 表示在调用线程上执行
    pub async_workers: usize,
    /// 记录每个监听器的耗时
    pub timing: bool,
    pub async_thread_name: String,
    /// 关闭时等待在途异步监听器的最长时间（毫秒）
    pub shutdown_grace_ms: u64,
    /// 被监听器延迟的消息最长等待放行的时间（毫秒），超时后丢弃
    pub processing_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            async_workers: 2,
            timing: false,
            async_thread_name: "packet-hook-async".to_string(),
            shutdown_grace_ms: 2000,
            processing_timeout_ms: 60_000,
        }
    }
}

/// 拦截器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// 记录被跳过的未知/非法消息
    pub debug: bool,
}

/// 完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub logging: LoggingConfig,
    pub specializer: SpecializerConfig,
    pub dispatch: DispatchConfig,
    pub interceptor: InterceptorConfig,
}

impl ProtocolConfig {
    /// 从 TOML 文本解析
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid packet hook configuration")
    }

    /// 从文件或目录加载，不使用回退
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        load_config_from_source(path.as_ref())
    }
}

/// 加载配置（进程内只加载一次）
pub fn load_config(path: Option<&str>) -> &'static ProtocolConfig {
    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates(path)))
}

/// 获取已加载的配置，尚未加载时按默认候选路径加载
pub fn app_config() -> &'static ProtocolConfig {
    load_config(None)
}

/// 候选路径：显式路径 > 环境变量 > 默认路径
fn candidates(path: Option<&str>) -> Vec<PathBuf> {
    if let Some(p) = path {
        return vec![PathBuf::from(p)];
    }
    let mut candidates = Vec::new();
    if let Ok(p) = env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            candidates.push(PathBuf::from(p));
        }
    }
    candidates.push(PathBuf::from("config/packet-hook.toml"));
    candidates.push(PathBuf::from("packet-hook.toml"));
    candidates
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> ProtocolConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    ProtocolConfig::default()
}

fn load_config_from_source(path: &Path) -> Result<ProtocolConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

fn load_config_from_file(path: &Path) -> Result<ProtocolConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))
}

/// 目录来源：base.toml 加上其余片段
fn load_config_from_directory(path: &Path) -> Result<ProtocolConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;
    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, path, &base_file)?;

    merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))
}

fn merge_directory(root: &mut Value, dir: &Path, skip: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path != skip)
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort();

    for entry in entries {
        let value = load_toml_value(&entry)?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))
}

/// 表逐键递归合并，其它值直接覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("packet-hook-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let cfg = ProtocolConfig::from_toml(
            r#"
            [specializer]
            enabled = false

            [dispatch]
            timing = true
            "#,
        )
        .unwrap();
        assert!(!cfg.specializer.enabled);
        assert_eq!(cfg.specializer.queue_capacity, 1024);
        assert!(cfg.dispatch.timing);
        assert_eq!(cfg.dispatch.async_workers, 2);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_grace_periods_are_independent() {
        let cfg = ProtocolConfig::from_toml(
            r#"
            [specializer]
            shutdown_grace_ms = 100

            [dispatch]
            shutdown_grace_ms = 5000
            processing_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.specializer.shutdown_grace_ms, 100);
        assert_eq!(cfg.dispatch.shutdown_grace_ms, 5000);
        assert_eq!(cfg.dispatch.processing_timeout_ms, 250);

        let defaults = DispatchConfig::default();
        assert_eq!(defaults.shutdown_grace_ms, 2000);
        assert_eq!(defaults.processing_timeout_ms, 60_000);
    }

    #[test]
    fn test_directory_merge_order() {
        let dir = scratch_dir("merge");
        fs::write(dir.join("base.toml"), "[dispatch]\nasync_workers = 4\n").unwrap();
        fs::write(dir.join("10-timing.toml"), "[dispatch]\ntiming = true\n").unwrap();
        fs::write(dir.join("20-workers.toml"), "[dispatch]\nasync_workers = 8\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let cfg = ProtocolConfig::from_path(&dir).unwrap();
        assert_eq!(cfg.dispatch.async_workers, 8);
        assert!(cfg.dispatch.timing);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_sources_fall_back() {
        let cfg = load_with_fallback(&[PathBuf::from("/nonexistent/packet-hook.toml")]);
        assert!(cfg.specializer.enabled);
        assert!(!cfg.interceptor.debug);
    }
}
