use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub mod tree_sitter_java;
pub mod rule_handlers;
pub mod regex_rules;
pub mod pattern_handlers;
pub mod suppression;
pub mod app_config;

/// 严重级别 (P0 最严重，排序时排在前面)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    P0, // 严重
    P1, // 警告
    P2, // 提示
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
        }
    }
}

/// 检测置信度
///
/// High: 类型已解析到 FQN，或经过调用链验证
/// Low: 类型未解析，退化为名称启发式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    High,
    Low,
}

/// 规则元数据 (标题、默认级别、修复建议)
#[derive(Debug)]
pub struct RuleMeta {
    pub id: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    pub fix: &'static str,
}

/// 扫描发现的问题
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub file: String,
    pub line: usize,
    pub evidence: String,
    pub fix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// 有调用链佐证的根因问题，排序时优先
    #[serde(default)]
    pub root_cause: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_chain: Vec<String>,
}

impl Finding {
    pub fn new(meta: &RuleMeta, file: &str, line: usize) -> Self {
        Self {
            rule_id: meta.id.to_string(),
            title: meta.title.to_string(),
            severity: meta.severity,
            file: file.to_string(),
            line,
            evidence: String::new(),
            fix: meta.fix.to_string(),
            confidence: None,
            root_cause: false,
            call_chain: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl AsRef<str>) -> Self {
        self.evidence = snippet(evidence.as_ref());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_call_chain(mut self, chain: Vec<String>) -> Self {
        self.root_cause = !chain.is_empty();
        self.call_chain = chain;
        self
    }

    /// 排序键: 根因优先 → 严重级别 → 文件 → 行号 → 规则 → 证据
    fn sort_cmp(&self, other: &Self) -> Ordering {
        other
            .root_cause
            .cmp(&self.root_cause)
            .then(self.severity.cmp(&other.severity))
            .then_with(|| self.file.cmp(&other.file))
            .then(self.line.cmp(&other.line))
            .then_with(|| self.rule_id.cmp(&other.rule_id))
            .then_with(|| self.evidence.cmp(&other.evidence))
            .then(self.confidence.cmp(&other.confidence))
    }
}

/// 稳定排序并去重，保证多次扫描输出一致
pub fn sort_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(Finding::sort_cmp);
    findings.dedup();
}

/// 证据只保留首行，过长截断
fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 120;
    let first = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first.chars().count() > MAX_CHARS {
        let cut: String = first.chars().take(MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}
