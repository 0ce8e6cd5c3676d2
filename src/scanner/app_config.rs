// ============================================================================
// 应用配置规则 - application*.yml / application*.properties
// ============================================================================
//
// 行级解析，不引入完整的 YAML 模型: YAML 按缩进还原点分 key，
// properties 按 `key=value`。每个条目保留行号。
// key 比较使用 Spring 宽松绑定 (忽略大小写、`-`、`_`)。
//
// ============================================================================

use std::path::Path;

use super::{Finding, RuleMeta, Severity};
use crate::config::ScanConfig;

pub static DB_POOL_SMALL: RuleMeta = RuleMeta {
    id: "DB_POOL_SMALL",
    title: "数据库连接池过小",
    severity: Severity::P1,
    fix: "根据并发量调整 maximum-pool-size (建议 >= 10)",
};

pub static TOMCAT_THREADS_LOW: RuleMeta = RuleMeta {
    id: "TOMCAT_THREADS_LOW",
    title: "Tomcat 最大线程数过低",
    severity: Severity::P1,
    fix: "默认 200，根据负载压测结果调整",
};

pub static JPA_OPEN_IN_VIEW: RuleMeta = RuleMeta {
    id: "JPA_OPEN_IN_VIEW",
    title: "JPA open-in-view 已启用",
    severity: Severity::P0,
    fix: "设置 spring.jpa.open-in-view=false，在事务内加载所需数据",
};

pub static JPA_SHOW_SQL: RuleMeta = RuleMeta {
    id: "JPA_SHOW_SQL",
    title: "JPA show-sql 已启用",
    severity: Severity::P1,
    fix: "生产环境设置 spring.jpa.show-sql=false，改用日志级别控制",
};

/// 配置文件中的一个标量条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// 点分完整 key
    pub key: String,
    pub value: String,
    pub line: usize,
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string()
}

/// 宽松绑定后的 key: `maximumPoolSize` 与 `maximum-pool-size` 等价
fn canonical(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn strip_yaml_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

pub fn parse_properties(text: &str) -> Vec<ConfigEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                return None;
            }
            let split = line.find(|c: char| c == '=' || c == ':')?;
            let key = line[..split].trim();
            (!key.is_empty()).then(|| ConfigEntry {
                key: key.to_string(),
                value: unquote(&line[split + 1..]),
                line: idx + 1,
            })
        })
        .collect()
}

pub fn parse_yaml(text: &str) -> Vec<ConfigEntry> {
    let mut entries = Vec::new();
    // (缩进, key 段)
    let mut path: Vec<(usize, String)> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = strip_yaml_comment(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "---" {
            path.clear();
            continue;
        }
        // 列表项不参与 key 路径
        if trimmed.starts_with('-') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };

        let indent = line.len() - line.trim_start().len();
        while path.last().is_some_and(|(depth, _)| *depth >= indent) {
            path.pop();
        }
        path.push((indent, unquote(key)));

        let value = value.trim();
        if !value.is_empty() {
            let full = path.iter().map(|(_, k)| k.as_str()).collect::<Vec<_>>().join(".");
            entries.push(ConfigEntry {
                key: full,
                value: unquote(value),
                line: idx + 1,
            });
        }
    }
    entries
}

fn below(limit: i64) -> impl Fn(&str) -> bool {
    move |value| value.parse::<i64>().is_ok_and(|n| n < limit)
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

struct ConfigRule {
    meta: &'static RuleMeta,
    keys: &'static [&'static str],
    violates: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl ConfigRule {
    fn matches_key(&self, key: &str) -> bool {
        let key = canonical(key);
        self.keys.iter().any(|k| canonical(k) == key)
    }
}

/// application 配置文件分析器
pub struct AppConfigAnalyzer {
    rules: Vec<ConfigRule>,
}

impl AppConfigAnalyzer {
    pub fn new() -> Self {
        Self {
            rules: vec![
                ConfigRule {
                    meta: &DB_POOL_SMALL,
                    keys: &["spring.datasource.hikari.maximum-pool-size"],
                    violates: Box::new(below(5)),
                },
                ConfigRule {
                    meta: &TOMCAT_THREADS_LOW,
                    keys: &["server.tomcat.max-threads", "server.tomcat.threads.max"],
                    violates: Box::new(below(200)),
                },
                ConfigRule {
                    meta: &JPA_OPEN_IN_VIEW,
                    keys: &["spring.jpa.open-in-view"],
                    violates: Box::new(is_true),
                },
                ConfigRule {
                    meta: &JPA_SHOW_SQL,
                    keys: &["spring.jpa.show-sql"],
                    violates: Box::new(is_true),
                },
            ],
        }
    }

    pub fn catalog(&self) -> Vec<&'static RuleMeta> {
        self.rules.iter().map(|r| r.meta).collect()
    }

    /// `application.yml`、`application-prod.properties`、`bootstrap.yaml` 等
    pub fn is_config_file(path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        let has_ext = path
            .extension()
            .is_some_and(|ext| ext == "yml" || ext == "yaml" || ext == "properties");
        has_ext && (name.starts_with("application") || name.starts_with("bootstrap"))
    }

    pub fn analyze(&self, rel_path: &str, text: &str, config: &ScanConfig) -> Vec<Finding> {
        let entries = if rel_path.ends_with(".properties") {
            parse_properties(text)
        } else {
            parse_yaml(text)
        };

        let mut findings = Vec::new();
        for entry in &entries {
            for rule in &self.rules {
                if !config.is_rule_enabled(rule.meta.id) || !rule.matches_key(&entry.key) {
                    continue;
                }
                if (rule.violates)(&entry.value) {
                    findings.push(
                        Finding::new(rule.meta, rel_path, entry.line)
                            .with_evidence(format!("{} = {}", entry.key, entry.value)),
                    );
                }
            }
        }
        findings
    }
}

impl Default for AppConfigAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
