//! 报告输出 - Markdown (默认) / JSON (`--json`)

use std::fmt::Write as _;

use serde_json::{json, Value};

use crate::ast_engine::ScanReport;
use crate::project_detector::{strategy_hint, DetectedStack};
use crate::scanner::{Confidence, Finding, RuleMeta, Severity};

fn severity_heading(severity: Severity) -> &'static str {
    match severity {
        Severity::P0 => "### 🔴 P0 严重嫌疑",
        Severity::P1 => "### 🟡 P1 警告",
        Severity::P2 => "### 🔵 P2 提示",
    }
}

fn finding_line(finding: &Finding) -> String {
    let mut line = format!(
        "- **{}** - `{}:{}` - {}",
        finding.rule_id, finding.file, finding.line, finding.title
    );
    if finding.confidence == Some(Confidence::Low) {
        line.push_str(" *(低置信度)*");
    }
    if !finding.evidence.is_empty() {
        let _ = write!(line, "\n  - 证据: `{}`", finding.evidence);
    }
    if !finding.call_chain.is_empty() {
        let _ = write!(line, "\n  - 调用链: {}", finding.call_chain.join(" → "));
    }
    let _ = write!(line, "\n  - 修复: {}", finding.fix);
    line
}

/// 扫描报告 Markdown；`full == false` 时只列出 P0
pub fn render_markdown(report: &ScanReport, full: bool) -> String {
    let p0 = report.count(Severity::P0);
    let p1 = report.count(Severity::P1);
    let p2 = report.count(Severity::P2);

    let mut out = format!(
        "## 🛰️ 雷达扫描结果\n\n\
        **扫描**: {} 个文件 (跳过 {})\n\
        **发现**: {} 个嫌疑点 (P0: {p0}, P1: {p1}, P2: {p2})\n\
        **技术栈**: {}\n\n",
        report.stats.files_scanned,
        report.stats.files_skipped,
        report.findings.len(),
        strategy_hint(&report.stack),
    );

    let severities: &[Severity] = if full {
        &[Severity::P0, Severity::P1, Severity::P2]
    } else {
        &[Severity::P0]
    };

    for &severity in severities {
        let group: Vec<&Finding> = report.findings.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(severity_heading(severity));
        out.push_str("\n\n");
        for finding in group {
            out.push_str(&finding_line(finding));
            out.push('\n');
        }
        out.push('\n');
    }

    if p0 == 0 {
        out.push_str("✅ 无 P0 问题\n");
    }
    if !full && p1 + p2 > 0 {
        let _ = writeln!(out, "\n*（{} 个 P1/P2 问题已省略，使用 --full 查看）*", p1 + p2);
    }

    if !report.skipped.is_empty() {
        out.push_str("\n### ⚠️ 跳过的文件\n\n");
        for skipped in &report.skipped {
            let _ = writeln!(out, "- `{}` - {}", skipped.path, skipped.reason);
        }
    }
    out
}

pub fn render_json(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn render_stack_markdown(stack: &DetectedStack) -> String {
    let flag = |b: bool| if b { "✅" } else { "❌" };
    let mut out = String::from("## 📋 技术栈检测\n\n");
    let _ = writeln!(
        out,
        "- **构建工具**: {}",
        stack.build_tool.map(|t| t.to_string()).unwrap_or_else(|| "未知".to_string())
    );
    let _ = writeln!(out, "- **JDK**: {}", stack.jdk_version.as_deref().unwrap_or("未知"));
    let _ = writeln!(out, "- **Spring Boot**: {}", flag(stack.is_spring_boot));
    let _ = writeln!(out, "- **Spring MVC**: {}", flag(stack.is_spring_mvc));
    let _ = writeln!(out, "- **WebFlux**: {}", flag(stack.is_webflux));
    let _ = writeln!(out, "- **Reactive**: {}", flag(stack.is_reactive));
    let _ = writeln!(out, "- **Lombok**: {}", flag(stack.has_lombok));
    let _ = writeln!(out, "\n{}", strategy_hint(stack));
    out
}

pub fn render_rules_markdown(rules: &[&RuleMeta]) -> String {
    let mut out = String::from("## ⚠️ 规则列表\n\n| 规则 | 级别 | 说明 |\n|---|---|---|\n");
    for rule in rules {
        let _ = writeln!(out, "| `{}` | {} | {} |", rule.id, rule.severity.label(), rule.title);
    }
    out
}

pub fn rules_json(rules: &[&RuleMeta]) -> Value {
    Value::Array(
        rules
            .iter()
            .map(|r| json!({ "id": r.id, "severity": r.severity, "title": r.title, "fix": r.fix }))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_engine::{ScanStats, SkippedFile};
    use crate::scanner::rule_handlers::{NESTED_LOOP, N_PLUS_ONE, SYNC_METHOD};
    use std::path::PathBuf;

    fn report() -> ScanReport {
        ScanReport {
            root: PathBuf::from("/project"),
            stack: DetectedStack::default(),
            stats: ScanStats {
                files_scanned: 3,
                files_skipped: 1,
                ..ScanStats::default()
            },
            skipped: vec![SkippedFile {
                path: "src/Broken.java".to_string(),
                reason: "syntax error at line 2".to_string(),
            }],
            findings: vec![
                Finding::new(&N_PLUS_ONE, "src/A.java", 10)
                    .with_confidence(Confidence::High)
                    .with_call_chain(vec!["A.run".to_string(), "ARepository.findById".to_string()]),
                Finding::new(&NESTED_LOOP, "src/B.java", 4),
                Finding::new(&SYNC_METHOD, "src/C.java", 7).with_severity(Severity::P1),
            ],
        }
    }

    #[test]
    fn test_compact_markdown_lists_only_p0() {
        let md = render_markdown(&report(), false);
        assert!(md.contains("`src/A.java:10`"));
        assert!(md.contains("调用链: A.run → ARepository.findById"));
        assert!(!md.contains("src/C.java"));
        assert!(md.contains("1 个 P1/P2 问题已省略"));
        assert!(md.contains("`src/Broken.java` - syntax error at line 2"));
    }

    #[test]
    fn test_full_markdown_groups_by_severity() {
        let md = render_markdown(&report(), true);
        let p0 = md.find("P0 严重嫌疑").unwrap();
        let p1 = md.find("P1 警告").unwrap();
        assert!(p0 < p1);
        assert!(md.contains("`src/C.java:7`"));
        assert!(!md.contains("P2 提示"));
    }

    #[test]
    fn test_json_round_trips_through_value() {
        let value: Value = serde_json::from_str(&render_json(&report()).unwrap()).unwrap();
        assert_eq!(value["stats"]["files_scanned"], 3);
        assert_eq!(value["findings"][0]["confidence"], "High");
        assert_eq!(value["findings"][1].get("call_chain"), None);
    }
}
