//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数 (`SC_*`)
//! 2. simple-contacts.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::{Error, Result};

/// Default config file name looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "simple-contacts.toml";

/// Largest accepted batch size
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Largest accepted worker count
pub const MAX_CONCURRENCY: usize = 16;

/// Order of the delivered contact list across batches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrder {
    /// Batches are reassembled by sequence number (reproducible output)
    #[default]
    Enumeration,
    /// Batches appear in the order they finished merging
    Arrival,
}

impl FromStr for ResultOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "enumeration" | "source" | "sorted" => Ok(Self::Enumeration),
            "arrival" | "completion" => Ok(Self::Arrival),
            other => Err(Error::Config(format!("Unknown result order: {}", other))),
        }
    }
}

impl fmt::Display for ResultOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enumeration => write!(f, "enumeration"),
            Self::Arrival => write!(f, "arrival"),
        }
    }
}

/// What `get_contacts` returns when permission is not granted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeniedPolicy {
    /// Resolve with an empty list
    #[default]
    Empty,
    /// Fail with a typed permission error
    Error,
}

impl FromStr for DeniedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "empty" | "empty_list" => Ok(Self::Empty),
            "error" | "reject" => Ok(Self::Error),
            other => Err(Error::Config(format!("Unknown denied policy: {}", other))),
        }
    }
}

/// Batch pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Records per batch job
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batch jobs allowed inside the normalizer at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Capacity reserved for the result set before the first merge
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Cross-batch ordering of the delivered list
    #[serde(default)]
    pub result_order: ResultOrder,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            initial_capacity: default_initial_capacity(),
            result_order: ResultOrder::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the concurrency limit
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the cross-batch ordering
    pub fn with_result_order(mut self, result_order: ResultOrder) -> Self {
        self.result_order = result_order;
        self
    }
}

/// Permission handling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionConfig {
    /// Outcome of `get_contacts` without access
    #[serde(default)]
    pub denied_policy: DeniedPolicy,

    /// Probe the store to tell `limited` from `denied` on restricted/unknown status
    #[serde(default = "default_probe_restricted")]
    pub probe_restricted: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            denied_policy: DeniedPolicy::default(),
            probe_restricted: default_probe_restricted(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// vCard file served by the file-backed store
    pub vcard_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Default `tracing` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration for simple-contacts
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub permission: PermissionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_batch_size() -> usize {
    200
}

/// Conservative worker count: never more than four, never more than the cores
fn default_max_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_initial_capacity() -> usize {
    1000
}

fn default_probe_restricted() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後 `SC_*` 環境変数で上書きされます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)?;

        let mut cfg = Self::from_toml_str(&toml_content)?;

        // 既存の環境変数で上書き（環境変数が優先）
        cfg.apply_env_overrides()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// TOML 文字列から設定を構築する (環境変数の上書きは行わない)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded_content = Self::expand_env_vars(content);

        let config: TomlConfig = toml::from_str(&expanded_content)?;

        Self::from_toml_config(config)
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./simple-contacts.toml` があればそれを使い、
    /// 見つからない場合は環境変数のみから構築します。
    pub fn load() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from defaults and environment variables
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// TOML 構造から Config を構築
    fn from_toml_config(toml: TomlConfig) -> Result<Self> {
        let pipeline = toml.pipeline.unwrap_or_default();
        let result_order = match pipeline.result_order {
            Some(order) => order.parse()?,
            None => ResultOrder::default(),
        };
        let pipeline_config = PipelineConfig {
            batch_size: pipeline.batch_size.unwrap_or_else(default_batch_size),
            max_concurrency: pipeline
                .max_concurrency
                .unwrap_or_else(default_max_concurrency),
            initial_capacity: pipeline
                .initial_capacity
                .unwrap_or_else(default_initial_capacity),
            result_order,
        };

        let permission = toml.permission.unwrap_or_default();
        let denied_policy = match permission.denied_policy {
            Some(policy) => policy.parse()?,
            None => DeniedPolicy::default(),
        };
        let permission_config = PermissionConfig {
            denied_policy,
            probe_restricted: permission
                .probe_restricted
                .unwrap_or_else(default_probe_restricted),
        };

        let store = toml.store.unwrap_or_default();
        let log = toml.log.unwrap_or_default();

        Ok(Config {
            pipeline: pipeline_config,
            permission: permission_config,
            store: StoreConfig {
                vcard_path: store.vcard_path.filter(|p| !p.is_empty()),
            },
            log: LogConfig {
                level: log.level.unwrap_or_else(default_log_level),
            },
        })
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `SC_*` overrides from an arbitrary lookup
    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(size) = lookup("SC_BATCH_SIZE") {
            self.pipeline.batch_size = parse_usize("SC_BATCH_SIZE", &size)?;
        }
        if let Some(limit) = lookup("SC_MAX_CONCURRENCY") {
            self.pipeline.max_concurrency = parse_usize("SC_MAX_CONCURRENCY", &limit)?;
        }
        if let Some(capacity) = lookup("SC_INITIAL_CAPACITY") {
            self.pipeline.initial_capacity = parse_usize("SC_INITIAL_CAPACITY", &capacity)?;
        }
        if let Some(order) = lookup("SC_RESULT_ORDER") {
            self.pipeline.result_order = order.parse()?;
        }

        // 権限設定の上書き
        if let Some(policy) = lookup("SC_DENIED_POLICY") {
            self.permission.denied_policy = policy.parse()?;
        }
        if let Some(probe) = lookup("SC_PROBE_RESTRICTED") {
            self.permission.probe_restricted = probe.to_lowercase() != "false";
        }

        if let Some(path) = lookup("SC_VCARD_PATH") {
            self.store.vcard_path = Some(path);
        }
        if let Some(level) = lookup("SC_LOG_LEVEL") {
            self.log.level = level;
        }

        Ok(())
    }

    /// Reject zero-sized pipelines and clamp oversized ones
    pub fn validate(&mut self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(Error::Config(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.batch_size > MAX_BATCH_SIZE {
            warn!(
                "batch_size {} exceeds {}, clamping",
                self.pipeline.batch_size, MAX_BATCH_SIZE
            );
            self.pipeline.batch_size = MAX_BATCH_SIZE;
        }
        if self.pipeline.max_concurrency > MAX_CONCURRENCY {
            warn!(
                "max_concurrency {} exceeds {}, clamping",
                self.pipeline.max_concurrency, MAX_CONCURRENCY
            );
            self.pipeline.max_concurrency = MAX_CONCURRENCY;
        }

        Ok(())
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got {:?}", key, value)))
}

// ============================================================================
// TOML 構造体定義（ファイル解析用）
// ============================================================================

/// TOML ファイル用のトップレベル構造
#[derive(Debug, Deserialize)]
struct TomlConfig {
    /// パイプライン設定
    pipeline: Option<TomlPipelineConfig>,
    /// 権限設定
    permission: Option<TomlPermissionConfig>,
    /// ストア設定
    store: Option<TomlStoreConfig>,
    /// ログ設定
    log: Option<TomlLogConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlPipelineConfig {
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default)]
    max_concurrency: Option<usize>,
    #[serde(default)]
    initial_capacity: Option<usize>,
    /// "enumeration" または "arrival"
    #[serde(default)]
    result_order: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlPermissionConfig {
    /// "empty" または "error"
    #[serde(default)]
    denied_policy: Option<String>,
    #[serde(default)]
    probe_restricted: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlStoreConfig {
    #[serde(default)]
    vcard_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLogConfig {
    #[serde(default)]
    level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 200);
        assert!(config.max_concurrency >= 1 && config.max_concurrency <= 4);
        assert_eq!(config.initial_capacity, 1000);
        assert_eq!(config.result_order, ResultOrder::Enumeration);
    }

    #[test]
    fn test_permission_config_default() {
        let config = PermissionConfig::default();
        assert_eq!(config.denied_policy, DeniedPolicy::Empty);
        assert!(config.probe_restricted);
    }

    #[test]
    fn test_expand_env_vars() {
        // テスト用環境変数を設定
        unsafe {
            std::env::set_var("SC_CORE_TEST_EXPAND_VAR", "contacts.vcf");
        }

        let result = Config::expand_env_vars("data/${SC_CORE_TEST_EXPAND_VAR}");
        assert_eq!(result, "data/contacts.vcf");

        // 存在しない環境変数
        let result = Config::expand_env_vars("prefix_${SC_CORE_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("SC_CORE_TEST_EXPAND_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("$HOME/plain"), "$HOME/plain");
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[pipeline]
batch_size = 50
max_concurrency = 2
initial_capacity = 64
result_order = "arrival"

[permission]
denied_policy = "error"
probe_restricted = false

[store]
vcard_path = "/tmp/book.vcf"

[log]
level = "debug"
"#;

        let config = Config::from_toml_str(toml_content).unwrap();
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.pipeline.max_concurrency, 2);
        assert_eq!(config.pipeline.initial_capacity, 64);
        assert_eq!(config.pipeline.result_order, ResultOrder::Arrival);
        assert_eq!(config.permission.denied_policy, DeniedPolicy::Error);
        assert!(!config.permission.probe_restricted);
        assert_eq!(config.store.vcard_path.as_deref(), Some("/tmp/book.vcf"));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_toml_config_partial_uses_defaults() {
        let config = Config::from_toml_str("[pipeline]\nbatch_size = 10\n").unwrap();
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.initial_capacity, 1000);
        assert_eq!(config.permission, PermissionConfig::default());
        assert!(config.store.vcard_path.is_none());
    }

    #[test]
    fn test_toml_config_rejects_unknown_order() {
        let err = Config::from_toml_str("[pipeline]\nresult_order = \"random\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nbatch_size = 75\n\n[log]\nlevel = \"warn\"").unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.pipeline.batch_size, 75);
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = Config::from_toml_file("/nonexistent/simple-contacts.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("[pipeline\nbatch_size = 10\n").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
        assert!(err.to_string().starts_with("TOML parsing error"));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SC_BATCH_SIZE", "120"),
            ("SC_MAX_CONCURRENCY", "3"),
            ("SC_RESULT_ORDER", "arrival"),
            ("SC_DENIED_POLICY", "error"),
            ("SC_PROBE_RESTRICTED", "false"),
            ("SC_VCARD_PATH", "book.vcf"),
            ("SC_LOG_LEVEL", ""),
        ]);

        let mut config = Config::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pipeline.batch_size, 120);
        assert_eq!(config.pipeline.max_concurrency, 3);
        assert_eq!(config.pipeline.result_order, ResultOrder::Arrival);
        assert_eq!(config.permission.denied_policy, DeniedPolicy::Error);
        assert!(!config.permission.probe_restricted);
        assert_eq!(config.store.vcard_path.as_deref(), Some("book.vcf"));
        // 空文字列は無視される
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_overrides_from(|k| (k == "SC_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SC_BATCH_SIZE"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.pipeline.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.batch_size = MAX_BATCH_SIZE * 2;
        config.pipeline.max_concurrency = 64;
        config.validate().unwrap();
        assert_eq!(config.pipeline.batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.pipeline.max_concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Arrival".parse::<ResultOrder>().unwrap(), ResultOrder::Arrival);
        assert_eq!(ResultOrder::Enumeration.to_string(), "enumeration");
        assert_eq!("reject".parse::<DeniedPolicy>().unwrap(), DeniedPolicy::Error);
        assert!("maybe".parse::<DeniedPolicy>().is_err());
    }
}
