// ============================================================================
// 扫描配置 - .java-perf.yaml
// ============================================================================

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// 默认跳过的目录 (构建产物 / 依赖缓存 / VCS 元数据)
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "target",
    "build",
    "out",
    "bin",
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    ".gradle",
    ".idea",
    ".mvn",
    ".vscode",
    "dist",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// 额外排除的目录名 (与默认列表合并)
    pub exclude_dirs: Vec<String>,
    /// 关闭的规则 ID
    pub disabled_rules: Vec<String>,
    /// 超过该大小的文件直接跳过
    pub max_file_bytes: u64,
    /// synchronized 块超过多少行视为大锁
    pub large_sync_block_lines: usize,
    /// "附近" 配置检查的行窗口 (静态集合容量、HTTP 超时)
    pub nearby_window: usize,
    /// rayon 线程数，None 使用全局线程池
    pub threads: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: Vec::new(),
            disabled_rules: Vec::new(),
            max_file_bytes: 2 * 1024 * 1024,
            large_sync_block_lines: 20,
            nearby_window: 8,
            threads: None,
        }
    }
}

impl ScanConfig {
    pub const FILE_NAME: &'static str = ".java-perf.yaml";

    /// 从指定 YAML 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_yaml(&content).map_err(|message| ScanError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// 扫描根目录下存在 .java-perf.yaml 时加载它，否则使用默认配置
    pub fn discover(root: &Path) -> Result<Self> {
        let candidate = root.join(Self::FILE_NAME);
        if candidate.is_file() {
            tracing::debug!("Loading scan config from {}", candidate.display());
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        DEFAULT_EXCLUDED_DIRS.contains(&name) || self.exclude_dirs.iter().any(|d| d == name)
    }

    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        !self.disabled_rules.iter().any(|r| r == rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScanConfig::from_yaml("disabled_rules: [SYNC_METHOD]\nexclude_dirs: [generated]\n").unwrap();
        assert_eq!(config.disabled_rules, vec!["SYNC_METHOD".to_string()]);
        assert!(config.is_excluded_dir("generated"));
        assert!(config.is_excluded_dir("target"));
        assert!(!config.is_rule_enabled("SYNC_METHOD"));
        assert!(config.is_rule_enabled("N_PLUS_ONE"));
        assert_eq!(config.large_sync_block_lines, 20);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(ScanConfig::from_yaml("  \n").unwrap(), ScanConfig::default());
    }

    #[test]
    fn test_invalid_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ScanConfig::FILE_NAME);
        fs::write(&path, "max_file_bytes: [not, a, number]").unwrap();

        let err = ScanConfig::discover(dir.path()).unwrap_err();
        assert!(matches!(err, ScanError::Config { .. }));
        assert!(err.to_string().contains(".java-perf.yaml"));
    }
}
