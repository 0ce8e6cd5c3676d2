//! 规则抑制
//!
//! 注释指令 (ID 省略时抑制全部规则):
//!
//! ```text
//! code(); // java-perf-ignore: N_PLUS_ONE, NESTED_LOOP     当前行
//! // java-perf-ignore-next-line: SYNC_METHOD               下一行
//! // java-perf-ignore-file                                 整个文件
//! ```
//!
//! 注解: `@SuppressWarnings("java-perf:ID")` 或 `@SuppressWarnings("java-perf")`
//! 作用于被注解声明的全部行。

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::tree_sitter_java::{descendants, line_of, ParsedFile};

static DIRECTIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"java-perf-ignore(-next-line|-file)?\b(?:\s*:\s*([A-Za-z0-9_,\s]*))?").unwrap()
});

const ANNOTATION_PREFIX: &str = "java-perf";

/// 被抑制的规则集合
#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleSet {
    All,
    Only(BTreeSet<String>),
}

impl RuleSet {
    fn from_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let ids: BTreeSet<String> = ids.into_iter().filter(|id| !id.is_empty()).collect();
        if ids.is_empty() {
            RuleSet::All
        } else {
            RuleSet::Only(ids)
        }
    }

    fn contains(&self, rule_id: &str) -> bool {
        match self {
            RuleSet::All => true,
            RuleSet::Only(ids) => ids.contains(rule_id),
        }
    }

    fn extend(&mut self, other: RuleSet) {
        match (&mut *self, other) {
            (RuleSet::All, _) => {}
            (_, RuleSet::All) => *self = RuleSet::All,
            (RuleSet::Only(ids), RuleSet::Only(more)) => ids.extend(more),
        }
    }
}

/// 单文件的抑制上下文
#[derive(Debug, Default)]
pub struct SuppressionContext {
    file: Option<RuleSet>,
    lines: BTreeMap<usize, RuleSet>,
    /// (起始行, 结束行, 规则)，闭区间
    ranges: Vec<(usize, usize, RuleSet)>,
}

impl SuppressionContext {
    pub fn from_file(file: &ParsedFile) -> Self {
        let mut ctx = Self::default();

        for comment in descendants(file.root(), &["line_comment", "block_comment"]) {
            let Some(caps) = DIRECTIVE_REGEX.captures(file.text(comment)) else {
                continue;
            };
            let rules = RuleSet::from_ids(
                caps.get(2)
                    .map(|m| m.as_str())
                    .unwrap_or("")
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .map(|s| s.trim().to_string()),
            );
            let line = line_of(comment);

            match caps.get(1).map(|m| m.as_str()) {
                Some("-file") => match &mut ctx.file {
                    Some(existing) => existing.extend(rules),
                    None => ctx.file = Some(rules),
                },
                Some("-next-line") => ctx.add_line(line + 1, rules),
                _ => ctx.add_line(line, rules),
            }
        }

        for annotation in descendants(file.root(), &["annotation"]) {
            let is_suppress = annotation
                .child_by_field_name("name")
                .is_some_and(|n| file.text(n) == "SuppressWarnings");
            if !is_suppress {
                continue;
            }
            let Some(rules) = annotation_rules(file, annotation) else {
                continue;
            };
            // annotation → modifiers → 声明
            let declaration = annotation
                .parent()
                .filter(|p| p.kind() == "modifiers")
                .and_then(|m| m.parent());
            if let Some(decl) = declaration {
                let end = decl.end_position().row + 1;
                ctx.ranges.push((line_of(decl), end, rules));
            }
        }

        ctx
    }

    fn add_line(&mut self, line: usize, rules: RuleSet) {
        match self.lines.get_mut(&line) {
            Some(existing) => existing.extend(rules),
            None => {
                self.lines.insert(line, rules);
            }
        }
    }

    pub fn is_suppressed(&self, rule_id: &str, line: usize) -> bool {
        if self.file.as_ref().is_some_and(|r| r.contains(rule_id)) {
            return true;
        }
        if self.lines.get(&line).is_some_and(|r| r.contains(rule_id)) {
            return true;
        }
        self.ranges
            .iter()
            .any(|(start, end, rules)| (*start..=*end).contains(&line) && rules.contains(rule_id))
    }
}

/// `@SuppressWarnings` 参数中属于本工具的规则，没有则返回 None
fn annotation_rules(file: &ParsedFile, annotation: tree_sitter::Node<'_>) -> Option<RuleSet> {
    let args = annotation.child_by_field_name("arguments")?;
    let mut rules: Option<RuleSet> = None;

    for literal in descendants(args, &["string_literal"]) {
        let value = file.text(literal).trim_matches('"');
        let parsed = if value == ANNOTATION_PREFIX {
            RuleSet::All
        } else if let Some(id) = value.strip_prefix("java-perf:") {
            RuleSet::from_ids([id.trim().to_string()])
        } else {
            continue;
        };
        match &mut rules {
            Some(existing) => existing.extend(parsed),
            None => rules = Some(parsed),
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(code: &str) -> SuppressionContext {
        let file = ParsedFile::from_source("Test.java", code).unwrap();
        SuppressionContext::from_file(&file)
    }

    #[test]
    fn test_same_line_and_next_line() {
        let ctx = context(
            r#"class A {
    public synchronized void a() {} // java-perf-ignore: SYNC_METHOD
    // java-perf-ignore-next-line: NESTED_LOOP, N_PLUS_ONE
    void b() {}
}"#,
        );
        assert!(ctx.is_suppressed("SYNC_METHOD", 2));
        assert!(!ctx.is_suppressed("N_PLUS_ONE", 2));
        assert!(ctx.is_suppressed("NESTED_LOOP", 4));
        assert!(ctx.is_suppressed("N_PLUS_ONE", 4));
        assert!(!ctx.is_suppressed("NESTED_LOOP", 3));
    }

    #[test]
    fn test_file_level_without_ids_suppresses_everything() {
        let ctx = context("// java-perf-ignore-file\nclass A {}\n");
        assert!(ctx.is_suppressed("ANYTHING", 99));
    }

    #[test]
    fn test_file_level_with_ids() {
        let ctx = context("/* java-perf-ignore-file: N_PLUS_ONE */\nclass A {}\n");
        assert!(ctx.is_suppressed("N_PLUS_ONE", 2));
        assert!(!ctx.is_suppressed("SYNC_METHOD", 2));
    }

    #[test]
    fn test_suppress_warnings_covers_declaration() {
        let ctx = context(
            r#"class A {
    @SuppressWarnings({"unchecked", "java-perf:N_PLUS_ONE"})
    void load() {
        repo.find();
    }

    @SuppressWarnings("java-perf")
    void other() {}

    @SuppressWarnings("unchecked")
    void third() {}
}"#,
        );
        assert!(ctx.is_suppressed("N_PLUS_ONE", 4));
        assert!(!ctx.is_suppressed("NESTED_LOOP", 4));
        assert!(!ctx.is_suppressed("N_PLUS_ONE", 6));
        assert!(ctx.is_suppressed("SYNC_METHOD", 8));
        assert!(!ctx.is_suppressed("SYNC_METHOD", 11));
    }

    #[test]
    fn test_plain_comment_is_not_directive() {
        let ctx = context("class A { // nothing to see\n}\n");
        assert!(!ctx.is_suppressed("N_PLUS_ONE", 1));
    }
}
