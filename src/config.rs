//! 程序配置
//!
//! 加载顺序：默认值 → TOML 文件（`LMS_GRADER_CONFIG` 指定，否则当前目录的 `config.toml`）→ 环境变量

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{GradeScale, ProviderKind};

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_VAR: &str = "LMS_GRADER_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 程序配置
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LMS 连接 ---
    pub lms_provider: ProviderKind,
    /// 网关地址
    pub gateway_url: String,
    /// LMS 实例地址
    pub lms_endpoint: String,
    pub lms_token: String,
    /// 保存凭据的文件，用于恢复会话
    pub session_file: String,
    pub request_timeout_secs: u64,

    // --- 目录与同步 ---
    /// 目录分页上限
    pub max_catalog_pages: usize,
    /// 同时下载的提交数量
    pub sync_concurrency: usize,

    // --- 轮询 ---
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub poll_max_retries: u32,
    pub poll_backoff_initial_ms: u64,
    pub poll_backoff_max_ms: u64,

    // --- 报告 ---
    pub grade_thresholds: GradeScale,
    pub report_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,

    // --- 无人值守运行的目标 ---
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub rubric_id: Option<String>,
    pub strictness: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lms_provider: ProviderKind::Canvas,
            gateway_url: "http://localhost:8080".to_string(),
            lms_endpoint: String::new(),
            lms_token: String::new(),
            session_file: ".lms_session.json".to_string(),
            request_timeout_secs: 30,
            max_catalog_pages: 50,
            sync_concurrency: 5,
            poll_interval_secs: 2,
            poll_timeout_secs: 30 * 60,
            poll_max_retries: 3,
            poll_backoff_initial_ms: 500,
            poll_backoff_max_ms: 10_000,
            grade_thresholds: GradeScale::default(),
            report_file: "grading_report.json".to_string(),
            verbose_logging: false,
            course_id: None,
            assignment_id: None,
            rubric_id: None,
            strictness: 0.5,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("lms_provider", &self.lms_provider)
            .field("gateway_url", &self.gateway_url)
            .field("lms_endpoint", &self.lms_endpoint)
            .field("lms_token", &if self.lms_token.is_empty() { "" } else { "***" })
            .field("session_file", &self.session_file)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_catalog_pages", &self.max_catalog_pages)
            .field("sync_concurrency", &self.sync_concurrency)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("poll_max_retries", &self.poll_max_retries)
            .field("grade_thresholds", &self.grade_thresholds)
            .field("report_file", &self.report_file)
            .field("course_id", &self.course_id)
            .field("assignment_id", &self.assignment_id)
            .field("rubric_id", &self.rubric_id)
            .field("strictness", &self.strictness)
            .finish()
    }
}

impl Config {
    /// 默认值叠加环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// 读取 TOML 文件，缺省字段取默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// 按 文件 → 环境变量 的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_toml_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖已有的值
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LMS_PROVIDER") {
            self.lms_provider = v.parse()?;
        }
        if let Some(v) = lookup("GATEWAY_URL") {
            self.gateway_url = v;
        }
        if let Some(v) = lookup("LMS_ENDPOINT") {
            self.lms_endpoint = v;
        }
        if let Some(v) = lookup("LMS_TOKEN") {
            self.lms_token = v;
        }
        if let Some(v) = lookup("SESSION_FILE") {
            self.session_file = v;
        }
        if let Some(v) = lookup("REPORT_FILE") {
            self.report_file = v;
        }
        if let Some(v) = lookup("COURSE_ID") {
            self.course_id = Some(v);
        }
        if let Some(v) = lookup("ASSIGNMENT_ID") {
            self.assignment_id = Some(v);
        }
        if let Some(v) = lookup("RUBRIC_ID") {
            self.rubric_id = Some(v);
        }

        set_parsed(&lookup, "REQUEST_TIMEOUT_SECS", "u64", &mut self.request_timeout_secs)?;
        set_parsed(&lookup, "MAX_CATALOG_PAGES", "usize", &mut self.max_catalog_pages)?;
        set_parsed(&lookup, "SYNC_CONCURRENCY", "usize", &mut self.sync_concurrency)?;
        set_parsed(&lookup, "POLL_INTERVAL_SECS", "u64", &mut self.poll_interval_secs)?;
        set_parsed(&lookup, "POLL_TIMEOUT_SECS", "u64", &mut self.poll_timeout_secs)?;
        set_parsed(&lookup, "POLL_MAX_RETRIES", "u32", &mut self.poll_max_retries)?;
        set_parsed(&lookup, "POLL_BACKOFF_INITIAL_MS", "u64", &mut self.poll_backoff_initial_ms)?;
        set_parsed(&lookup, "POLL_BACKOFF_MAX_MS", "u64", &mut self.poll_backoff_max_ms)?;
        set_parsed(&lookup, "GRADE_THRESHOLD_A", "f64", &mut self.grade_thresholds.a)?;
        set_parsed(&lookup, "GRADE_THRESHOLD_B", "f64", &mut self.grade_thresholds.b)?;
        set_parsed(&lookup, "GRADE_THRESHOLD_C", "f64", &mut self.grade_thresholds.c)?;
        set_parsed(&lookup, "GRADE_THRESHOLD_D", "f64", &mut self.grade_thresholds.d)?;
        set_parsed(&lookup, "STRICTNESS", "f64", &mut self.strictness)?;
        set_parsed(&lookup, "VERBOSE_LOGGING", "bool", &mut self.verbose_logging)?;
        Ok(())
    }

    /// 校验全部字段，一次性返回所有问题
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            problems.push(format!("gateway_url 必须以 http:// 或 https:// 开头: {}", self.gateway_url));
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs 必须大于 0".to_string());
        }
        if self.max_catalog_pages == 0 {
            problems.push("max_catalog_pages 必须大于 0".to_string());
        }
        if self.sync_concurrency == 0 {
            problems.push("sync_concurrency 必须大于 0".to_string());
        }
        if self.poll_interval_secs == 0 {
            problems.push("poll_interval_secs 必须大于 0".to_string());
        }
        if self.poll_timeout_secs < self.poll_interval_secs {
            problems.push(format!(
                "poll_timeout_secs ({}) 不能小于 poll_interval_secs ({})",
                self.poll_timeout_secs, self.poll_interval_secs
            ));
        }
        if self.poll_backoff_initial_ms > self.poll_backoff_max_ms {
            problems.push("poll_backoff_initial_ms 不能大于 poll_backoff_max_ms".to_string());
        }
        if !self.strictness.is_finite() || !(0.0..=1.0).contains(&self.strictness) {
            problems.push(format!("strictness 必须在 [0, 1] 内: {}", self.strictness));
        }
        problems.extend(self.grade_thresholds.problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn set_parsed<T, F>(lookup: &F, name: &str, expected_type: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value: raw.clone(),
                expected_type: expected_type.to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_ok!(config.validate());
        assert_eq!(config.sync_concurrency, 5);
        assert_eq!(config.poll_max_retries, 3);
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("LMS_PROVIDER", "Moodle"),
                ("SYNC_CONCURRENCY", "8"),
                ("STRICTNESS", "0.9"),
                ("COURSE_ID", "101"),
                ("VERBOSE_LOGGING", "true"),
            ]))
            .unwrap();

        assert_eq!(config.lms_provider, ProviderKind::Moodle);
        assert_eq!(config.sync_concurrency, 8);
        assert_eq!(config.strictness, 0.9);
        assert_eq!(config.course_id.as_deref(), Some("101"));
        assert!(config.verbose_logging);
    }

    #[test]
    fn test_env_parse_failure_names_the_variable() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("SYNC_CONCURRENCY", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarParseFailed { ref var_name, .. } if var_name == "SYNC_CONCURRENCY"
        ));

        let err = config.apply_env(env(&[("LMS_PROVIDER", "blackboard")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let config = Config {
            gateway_url: "localhost".into(),
            sync_concurrency: 0,
            strictness: 1.5,
            grade_thresholds: GradeScale {
                a: 50.0,
                b: 80.0,
                c: 70.0,
                d: 60.0,
            },
            ..Default::default()
        };
        match assert_err!(config.validate()) {
            ConfigError::Invalid { problems } => assert_eq!(problems.len(), 4),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_toml_file_with_partial_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
lms_provider = "moodle"
gateway_url = "https://gateway.example.edu"
poll_interval_secs = 5

[grade_thresholds]
a = 93.0
"#,
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.lms_provider, ProviderKind::Moodle);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.grade_thresholds.a, 93.0);
        assert_eq!(config.grade_thresholds.b, 80.0);
        assert_eq!(config.sync_concurrency, 5);
    }

    #[test]
    fn test_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::from_toml_file(dir.path().join("missing.toml")),
            Err(ConfigError::ReadFailed { .. })
        ));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "sync_concurrency = \"five\"").unwrap();
        assert!(matches!(
            Config::from_toml_file(&path),
            Err(ConfigError::TomlParseFailed { .. })
        ));
    }

    #[test]
    fn test_debug_hides_token() {
        let config = Config {
            lms_token: "secret-token".into(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("secret-token"));
    }
}
