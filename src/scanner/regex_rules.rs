// ============================================================================
// 正则规则 - 匹配注释屏蔽后的源码
// ============================================================================
//
// 适用于 AST 难以表达的检测 (SQL 字符串内容、"附近是否配置了 xxx")。
// 注释字节替换为空格，换行保留，偏移与行号和原文一致。
// 需要结构信息的规则通过 guard 回到语法树确认。
//
// ============================================================================

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::rule_handlers::{RuleContext, RuleHandler};
use super::tree_sitter_java::{ancestor, descendants, ParsedFile};
use super::{Confidence, Finding, RuleMeta, Severity};

/// 注释替换为空格 (保留换行)
pub fn mask_comments(file: &ParsedFile) -> String {
    let mut bytes = file.source.clone().into_bytes();
    for comment in descendants(file.root(), &["line_comment", "block_comment"]) {
        let range = comment.start_byte()..comment.end_byte().min(bytes.len());
        for b in &mut bytes[range] {
            if *b != b'\n' && *b != b'\r' {
                *b = b' ';
            }
        }
    }
    // 注释节点覆盖完整字符，替换后仍是合法 UTF-8
    String::from_utf8(bytes).unwrap_or_else(|_| file.source.clone())
}

/// 偏移量所在行 (1-based)
pub fn line_at(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    memchr::memchr_iter(b'\n', &text.as_bytes()[..end]).count() + 1
}

/// 从 `line` 开始向下 `window` 行的文本
fn window(text: &str, line: usize, window: usize) -> String {
    text.lines()
        .skip(line.saturating_sub(1))
        .take(window + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// 正则
// ============================================================================

static RE_UNBOUNDED_POOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Executors\s*\.\s*(newCachedThreadPool|newFixedThreadPool|newSingleThreadExecutor|newScheduledThreadPool)\s*\(").unwrap()
});

static RE_STATIC_COLLECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bstatic\s+(?:final\s+)?[\w.]*(?:Map|List|Set|Queue|Deque|Collection)\s*(?:<[^;=]*>)?\s+\w+\s*=\s*new\s").unwrap()
});

static RE_SIZE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"maximumSize|maximumWeight|expireAfter|removeEldestEntry|softValues|weakKeys|weakValues").unwrap()
});

static RE_SELECT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["'][^"'\n]*\bSELECT\s+\*\s+FROM\b"#).unwrap()
});

static RE_LIKE_LEADING_WILDCARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bLIKE\s+(?:['"]%|CONCAT\s*\(\s*['"]%)"#).unwrap()
});

static RE_OBJECT_NEW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bnew\s+([A-Z][\w.]*)\s*(?:<[^>;]*>)?\s*\(").unwrap()
});

static RE_SYNC_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bsynchronized\s*\(").unwrap()
});

static RE_FUTURE_GET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.\s*get\s*\(\s*\)").unwrap()
});

static RE_JOIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.\s*join\s*\(\s*\)").unwrap()
});

static RE_AWAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.\s*(?:await|acquire)\s*\(\s*\)").unwrap()
});

static RE_SYNCHRONIZER_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:CountDownLatch|CyclicBarrier|Semaphore|Condition)\b").unwrap()
});

static RE_CACHE_BUILDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Caffeine|CacheBuilder)\s*\.\s*newBuilder\s*\(\s*\)").unwrap()
});

static RE_EXPIRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"expireAfter(?:Write|Access)?|refreshAfterWrite").unwrap()
});

static RE_FUTURE_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Completable)?Future\b").unwrap()
});

static RE_LOG_CONCAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:log|logger|LOG|LOGGER)\s*\.\s*(?:trace|debug|info|warn|error)\s*\(\s*"[^"\n]*"\s*\+"#).unwrap()
});

static RE_HTTP_CLIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"new\s+(?:RestTemplate|OkHttpClient)\s*\(|\bHttpClient\s*\.\s*new(?:Builder|HttpClient)\s*\(|\bWebClient\s*\.\s*(?:create|builder)\s*\(|\bHttpClients\s*\.\s*create(?:Default)?\s*\(").unwrap()
});

static RE_TIMEOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)timeout").unwrap());

// ============================================================================
// 规则元数据
// ============================================================================

pub static UNBOUNDED_POOL: RuleMeta = RuleMeta {
    id: "UNBOUNDED_POOL",
    title: "无界线程池 (Executors 工厂方法)",
    severity: Severity::P0,
    fix: "使用 ThreadPoolExecutor 显式指定有界队列和拒绝策略",
};

pub static STATIC_COLLECTION: RuleMeta = RuleMeta {
    id: "STATIC_COLLECTION",
    title: "static 集合无容量限制，可能内存泄漏",
    severity: Severity::P0,
    fix: "使用 Caffeine 等有界缓存并设置 maximumSize / expireAfterWrite",
};

pub static SELECT_STAR: RuleMeta = RuleMeta {
    id: "SELECT_STAR",
    title: "SELECT * 查询",
    severity: Severity::P0,
    fix: "明确指定需要的字段",
};

pub static LIKE_LEADING_WILDCARD: RuleMeta = RuleMeta {
    id: "LIKE_LEADING_WILDCARD",
    title: "LIKE '%xxx' 前导通配符导致全表扫描",
    severity: Severity::P0,
    fix: "改用全文索引，或重新设计查询",
};

pub static OBJECT_IN_LOOP: RuleMeta = RuleMeta {
    id: "OBJECT_IN_LOOP",
    title: "循环内创建对象",
    severity: Severity::P1,
    fix: "将不变对象提到循环外，或复用对象",
};

pub static SYNC_BLOCK: RuleMeta = RuleMeta {
    id: "SYNC_BLOCK",
    title: "synchronized 大代码块",
    severity: Severity::P1,
    fix: "缩小临界区，只保护共享状态的读写",
};

pub static FUTURE_GET_NO_TIMEOUT: RuleMeta = RuleMeta {
    id: "FUTURE_GET_NO_TIMEOUT",
    title: "Future.get() 无超时",
    severity: Severity::P1,
    fix: "使用 get(timeout, unit)",
};

pub static COMPLETABLE_JOIN: RuleMeta = RuleMeta {
    id: "COMPLETABLE_JOIN",
    title: "CompletableFuture.join() 无超时",
    severity: Severity::P1,
    fix: "先 orTimeout()/completeOnTimeout() 再 join()，或改为异步组合",
};

pub static AWAIT_NO_TIMEOUT: RuleMeta = RuleMeta {
    id: "AWAIT_NO_TIMEOUT",
    title: "await()/acquire() 无超时，可能永久阻塞",
    severity: Severity::P0,
    fix: "使用 await(timeout, unit) / tryAcquire(timeout, unit) 并处理超时",
};

pub static CACHE_NO_EXPIRE: RuleMeta = RuleMeta {
    id: "CACHE_NO_EXPIRE",
    title: "本地缓存未配置过期策略",
    severity: Severity::P1,
    fix: "配置 expireAfterWrite/expireAfterAccess 和 maximumSize",
};

pub static LOG_STRING_CONCAT: RuleMeta = RuleMeta {
    id: "LOG_STRING_CONCAT",
    title: "日志使用字符串拼接",
    severity: Severity::P1,
    fix: "使用占位符: log.info(\"x={}\", x)",
};

pub static HTTP_NO_TIMEOUT: RuleMeta = RuleMeta {
    id: "HTTP_NO_TIMEOUT",
    title: "HTTP 客户端未配置超时",
    severity: Severity::P1,
    fix: "显式设置 connect/read timeout",
};

// ============================================================================
// RegexRule
// ============================================================================

/// 一次正则命中
pub struct RegexHit<'c, 'a> {
    pub ctx: &'c RuleContext<'a>,
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl RegexHit<'_, '_> {
    pub fn text(&self) -> &str {
        &self.ctx.masked_source()[self.start..self.end]
    }

    fn node(&self) -> Option<tree_sitter::Node<'_>> {
        self.ctx.file.root().descendant_for_byte_range(self.start, self.end)
    }

    fn nearby(&self) -> String {
        window(self.ctx.masked_source(), self.line, self.ctx.config.nearby_window)
    }
}

/// guard 对一次命中的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Skip,
    Report,
    /// 接收者类型不明，按低置信度报告
    ReportLow,
}

impl From<bool> for Verdict {
    fn from(report: bool) -> Self {
        if report {
            Verdict::Report
        } else {
            Verdict::Skip
        }
    }
}

type Guard = fn(&RegexHit<'_, '_>) -> Verdict;

pub struct RegexRule {
    meta: &'static RuleMeta,
    pattern: &'static Lazy<Regex>,
    guard: Option<Guard>,
}

impl RegexRule {
    pub fn new(meta: &'static RuleMeta, pattern: &'static Lazy<Regex>) -> Self {
        Self { meta, pattern, guard: None }
    }

    pub fn guarded(meta: &'static RuleMeta, pattern: &'static Lazy<Regex>, guard: Guard) -> Self {
        Self {
            meta,
            pattern,
            guard: Some(guard),
        }
    }
}

impl RuleHandler for RegexRule {
    fn meta(&self) -> &'static RuleMeta {
        self.meta
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let masked = ctx.masked_source();
        let mut reported = BTreeSet::new();
        let mut findings = Vec::new();

        for m in self.pattern.find_iter(masked) {
            let line = line_at(masked, m.start());
            // 每行最多报告一次
            if reported.contains(&line) {
                continue;
            }
            let hit = RegexHit {
                ctx,
                start: m.start(),
                end: m.end(),
                line,
            };
            let verdict = self.guard.map_or(Verdict::Report, |guard| guard(&hit));
            if verdict == Verdict::Skip {
                continue;
            }
            reported.insert(line);
            let finding = Finding::new(self.meta, &ctx.file.rel_path, line).with_evidence(ctx.source_line(line));
            findings.push(match verdict {
                Verdict::ReportLow => finding.with_confidence(Confidence::Low),
                _ => finding,
            });
        }
        findings
    }
}

// ============================================================================
// Guards
// ============================================================================

fn no_size_limit_nearby(hit: &RegexHit<'_, '_>) -> Verdict {
    (!RE_SIZE_LIMIT.is_match(&hit.nearby())).into()
}

fn no_timeout_nearby(hit: &RegexHit<'_, '_>) -> Verdict {
    (!RE_TIMEOUT.is_match(&hit.nearby())).into()
}

fn no_expiry_nearby(hit: &RegexHit<'_, '_>) -> Verdict {
    (!RE_EXPIRY.is_match(&hit.nearby())).into()
}

/// 循环体内的 new，异常对象除外
fn allocation_in_loop(hit: &RegexHit<'_, '_>) -> Verdict {
    let class = RE_OBJECT_NEW
        .captures(hit.text())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("");
    if class.ends_with("Exception") || class.ends_with("Error") {
        return Verdict::Skip;
    }
    let Some(node) = hit.node() else {
        return Verdict::Skip;
    };
    // for/while 体内，lambda 迭代不算
    hit.ctx
        .file
        .enclosing_loop(node)
        .is_some_and(|l| l.kind() != "lambda_expression")
        .into()
}

fn large_sync_block(hit: &RegexHit<'_, '_>) -> Verdict {
    let Some(node) = hit.node() else {
        return Verdict::Skip;
    };
    let statement = if node.kind() == "synchronized_statement" {
        Some(node)
    } else {
        ancestor(node, &["synchronized_statement"])
    };
    statement
        .and_then(|s| s.child_by_field_name("body"))
        .map(|body| body.end_position().row - body.start_position().row + 1)
        .is_some_and(|lines| lines > hit.ctx.config.large_sync_block_lines)
        .into()
}

/// 命中点所在的方法调用
fn hit_call<'c>(hit: &'c RegexHit<'_, '_>) -> Option<tree_sitter::Node<'c>> {
    let node = hit.node()?;
    if node.kind() == "method_invocation" {
        Some(node)
    } else {
        ancestor(node, &["method_invocation"])
    }
}

/// 接收者类型已知时按类型名判断；不明时只要文件里出现过相关类型就低置信度报告
fn by_receiver_type(hit: &RegexHit<'_, '_>, file_mentions: &Regex, matches_type: fn(&str) -> bool) -> Verdict {
    if !file_mentions.is_match(hit.ctx.masked_source()) {
        return Verdict::Skip;
    }
    let Some(call) = hit_call(hit) else {
        return Verdict::Skip;
    };
    let receiver = hit.ctx.resolver().resolve(call);
    match receiver.type_simple_name() {
        Some(ty) => matches_type(ty).into(),
        None => Verdict::ReportLow,
    }
}

fn future_without_timeout(hit: &RegexHit<'_, '_>) -> Verdict {
    by_receiver_type(hit, &RE_FUTURE_TYPE, |ty| ty.contains("Future"))
}

fn completable_join(hit: &RegexHit<'_, '_>) -> Verdict {
    // CompletableFuture.allOf(...).join() 这类静态工厂链
    let from_factory = hit_call(hit)
        .and_then(|call| call.child_by_field_name("object"))
        .is_some_and(|object| hit.ctx.file.text(object).trim_start().starts_with("CompletableFuture."));
    if from_factory {
        return Verdict::Report;
    }
    by_receiver_type(hit, &RE_FUTURE_TYPE, |ty| ty == "CompletableFuture")
}

fn synchronizer_without_timeout(hit: &RegexHit<'_, '_>) -> Verdict {
    by_receiver_type(hit, &RE_SYNCHRONIZER_TYPE, |ty| RE_SYNCHRONIZER_TYPE.is_match(ty))
}

pub fn default_rules() -> Vec<RegexRule> {
    vec![
        RegexRule::new(&UNBOUNDED_POOL, &RE_UNBOUNDED_POOL),
        RegexRule::guarded(&STATIC_COLLECTION, &RE_STATIC_COLLECTION, no_size_limit_nearby),
        RegexRule::new(&SELECT_STAR, &RE_SELECT_STAR),
        RegexRule::new(&LIKE_LEADING_WILDCARD, &RE_LIKE_LEADING_WILDCARD),
        RegexRule::guarded(&OBJECT_IN_LOOP, &RE_OBJECT_NEW, allocation_in_loop),
        RegexRule::guarded(&SYNC_BLOCK, &RE_SYNC_BLOCK, large_sync_block),
        RegexRule::guarded(&FUTURE_GET_NO_TIMEOUT, &RE_FUTURE_GET, future_without_timeout),
        RegexRule::guarded(&COMPLETABLE_JOIN, &RE_JOIN, completable_join),
        RegexRule::guarded(&AWAIT_NO_TIMEOUT, &RE_AWAIT, synchronizer_without_timeout),
        RegexRule::guarded(&CACHE_NO_EXPIRE, &RE_CACHE_BUILDER, no_expiry_nearby),
        RegexRule::new(&LOG_STRING_CONCAT, &RE_LOG_CONCAT),
        RegexRule::guarded(&HTTP_NO_TIMEOUT, &RE_HTTP_CLIENT, no_timeout_nearby),
    ]
}
