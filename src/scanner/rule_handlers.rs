// ============================================================================
// RuleHandler Trait - 规则处理器抽象
// ============================================================================
//
// 每条规则一个 Handler，注册到 RuleEngine 的列表里。
// Handler 之间互不依赖，只读共享 RuleContext (单文件 + 冻结的全局上下文)。
//
// ============================================================================

use std::collections::BTreeSet;

use once_cell::unsync::OnceCell;
use tree_sitter::Node;

use super::{pattern_handlers, regex_rules};
use super::suppression::SuppressionContext;
use super::tree_sitter_java::{
    ancestor, contains, descendants, enclosing_method, line_of, JavaQueries, ParsedFile, LOOP_KINDS,
    METHOD_KINDS,
};
use super::{Confidence, Finding, RuleMeta, Severity};
use crate::call_graph::{CallGraph, MethodSig, Receiver, ReceiverResolver, ReceiverSource, ReceiverType};
use crate::config::ScanConfig;
use crate::import_index::ImportIndex;
use crate::project_detector::DetectedStack;
use crate::symbol_table::{LayerType, Resolution, SymbolTable};

/// 规则处理上下文
pub struct RuleContext<'a> {
    pub file: &'a ParsedFile,
    pub imports: &'a ImportIndex,
    pub symbols: &'a SymbolTable,
    pub call_graph: &'a CallGraph,
    pub stack: &'a DetectedStack,
    pub config: &'a ScanConfig,
    pub queries: &'a JavaQueries,
    masked: OnceCell<String>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        file: &'a ParsedFile,
        imports: &'a ImportIndex,
        symbols: &'a SymbolTable,
        call_graph: &'a CallGraph,
        stack: &'a DetectedStack,
        config: &'a ScanConfig,
        queries: &'a JavaQueries,
    ) -> Self {
        Self {
            file,
            imports,
            symbols,
            call_graph,
            stack,
            config,
            queries,
            masked: OnceCell::new(),
        }
    }

    /// 注释屏蔽后的源码，首次使用时计算
    pub fn masked_source(&self) -> &str {
        self.masked.get_or_init(|| regex_rules::mask_comments(self.file))
    }

    pub fn resolver(&self) -> ReceiverResolver<'a> {
        ReceiverResolver::new(self.file, self.imports, self.symbols)
    }

    pub fn source_line(&self, line: usize) -> &str {
        self.file
            .source
            .lines()
            .nth(line.saturating_sub(1))
            .unwrap_or("")
    }

    pub(crate) fn finding_at(&self, meta: &RuleMeta, node: Node<'_>) -> Finding {
        Finding::new(meta, &self.file.rel_path, line_of(node)).with_evidence(self.file.text(node))
    }

    /// 节点所在方法的签名
    fn method_sig(&self, node: Node<'_>) -> Option<MethodSig> {
        let method = enclosing_method(node)?;
        let class = self.file.enclosing_class_fqn(node, self.imports)?;
        Some(MethodSig::new(&class, &self.file.method_name(method)))
    }
}

/// 规则处理器 trait
pub trait RuleHandler: Send + Sync {
    fn meta(&self) -> &'static RuleMeta;

    fn rule_id(&self) -> &'static str {
        self.meta().id
    }

    /// 规则是否适用于当前技术栈
    fn applies_to(&self, _stack: &DetectedStack) -> bool {
        true
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding>;
}

// ============================================================================
// 规则元数据
// ============================================================================

pub static N_PLUS_ONE: RuleMeta = RuleMeta {
    id: "N_PLUS_ONE",
    title: "循环内数据库/远程调用 (N+1)",
    severity: Severity::P0,
    fix: "改为批量查询 (findAllById / IN 查询) 或 JOIN FETCH",
};

pub static NESTED_LOOP: RuleMeta = RuleMeta {
    id: "NESTED_LOOP",
    title: "嵌套循环 (可能导致 O(N^2) 复杂度)",
    severity: Severity::P0,
    fix: "用 Map 建索引替代内层循环",
};

pub static SYNC_METHOD: RuleMeta = RuleMeta {
    id: "SYNC_METHOD",
    title: "synchronized 方法级锁",
    severity: Severity::P0,
    fix: "改用细粒度锁或并发容器",
};

pub static THREADLOCAL_LEAK: RuleMeta = RuleMeta {
    id: "THREADLOCAL_LEAK",
    title: "ThreadLocal.set() 后未在 finally 中 remove()",
    severity: Severity::P0,
    fix: "try { tl.set(x); ... } finally { tl.remove(); }",
};

pub static SLEEP_IN_LOCK: RuleMeta = RuleMeta {
    id: "SLEEP_IN_LOCK",
    title: "持锁 sleep",
    severity: Severity::P0,
    fix: "sleep 移出临界区，或使用 Condition.await 释放锁",
};

pub static LOCK_METHOD_CALL: RuleMeta = RuleMeta {
    id: "LOCK_METHOD_CALL",
    title: "lock() 后未在 finally 中 unlock()",
    severity: Severity::P0,
    fix: "lock.lock(); try { ... } finally { lock.unlock(); }",
};

pub static FLUX_BLOCK: RuleMeta = RuleMeta {
    id: "FLUX_BLOCK",
    title: "响应式链中调用 block()",
    severity: Severity::P0,
    fix: "保持异步组合 (flatMap/zip)，不要在 Reactor 线程阻塞",
};

pub static AUTOWIRED_FIELD: RuleMeta = RuleMeta {
    id: "AUTOWIRED_FIELD",
    title: "@Autowired 字段注入",
    severity: Severity::P2,
    fix: "改用构造器注入 (final 字段)",
};

// ============================================================================
// N+1 检测处理器 - 带语义分析
// ============================================================================

/// 调用即产生 DB/RPC/缓存往返的常见库类型
const DATA_ACCESS_TYPES: &[&str] = &[
    "Connection",
    "ElasticsearchRestTemplate",
    "ElasticsearchTemplate",
    "EntityManager",
    "Jedis",
    "JdbcClient",
    "JdbcTemplate",
    "KafkaTemplate",
    "MongoTemplate",
    "NamedParameterJdbcTemplate",
    "PreparedStatement",
    "RedisTemplate",
    "RestHighLevelClient",
    "RestTemplate",
    "Session",
    "SqlSession",
    "SqlSessionTemplate",
    "Statement",
    "StringRedisTemplate",
    "WebClient",
];

const DAO_METHOD_PREFIXES: &[&str] = &[
    "findBy", "findAll", "findOne", "findById",
    "saveAll", "saveAndFlush",
    "deleteBy", "deleteAll", "deleteById",
    "selectBy", "selectAll", "selectOne", "selectList",
    "queryBy", "queryFor", "queryAll",
    "loadBy", "loadAll", "fetchBy", "fetchAll",
];

/// 名字像 mapper 但不访问数据库
const NON_DAO_MAPPERS: &[&str] = &["objectmapper", "modelmapper", "jsonmapper", "xmlmapper"];

pub struct NPlusOneHandler;

impl NPlusOneHandler {
    fn is_dao_method(method: &str) -> bool {
        DAO_METHOD_PREFIXES.iter().any(|p| method.starts_with(p))
    }

    fn is_dao_name(name: &str) -> bool {
        let lower = name.to_lowercase();
        if NON_DAO_MAPPERS.iter().any(|m| lower.ends_with(m)) {
            return false;
        }
        ["repository", "repo", "dao", "mapper"]
            .iter()
            .any(|s| lower.ends_with(s))
    }

    fn is_data_access_type(symbols: &SymbolTable, fqn: &str) -> bool {
        let simple = fqn.rsplit('.').next().unwrap_or(fqn);
        DATA_ACCESS_TYPES.contains(&simple)
            || symbols.lookup_by_fqn(fqn).is_some_and(|t| t.is_external_access())
    }

    /// 已解析类型: 直接的数据访问类型，或经调用图到达 Repository/Mapper
    fn classify_resolved(
        ctx: &RuleContext,
        caller: Option<MethodSig>,
        receiver: &Receiver,
        fqn: &str,
        method: &str,
    ) -> Option<Vec<String>> {
        let callee = MethodSig::new(fqn, method);
        let mut chain: Vec<String> = caller.iter().map(ToString::to_string).collect();

        if receiver.source == ReceiverSource::EnclosingClass {
            let path = Self::trace_self_call(ctx, &callee)?;
            chain.extend(path);
            return Some(chain);
        }

        if Self::is_data_access_type(ctx.symbols, fqn) {
            chain.push(callee.to_string());
            return Some(chain);
        }

        ctx.symbols.lookup_by_fqn(fqn)?;
        let path = [LayerType::Repository, LayerType::Mapper]
            .into_iter()
            .filter_map(|layer| ctx.call_graph.trace_to_layer(&callee, layer))
            .min_by_key(|p| p.len())?;
        chain.extend(path.to_strings());
        Some(chain)
    }

    /// 本类方法调用 (隐式 this)
    ///
    /// 所在类是数据访问层也不够: 要么被调方法是 DAO 命名，
    /// 要么沿调用图真正走到一次数据访问。
    fn trace_self_call(ctx: &RuleContext, callee: &MethodSig) -> Option<Vec<String>> {
        if Self::is_dao_method(&callee.name) && Self::is_data_access_type(ctx.symbols, &callee.class_fqn) {
            return Some(vec![callee.to_string()]);
        }
        let path = ctx
            .call_graph
            .trace(callee, |sig| Self::is_data_access_call(ctx, sig, &callee.class_fqn))?;
        Some(path.to_strings())
    }

    /// 调用图上的一跳是否落到数据访问 (同类内的非 DAO 方法不算)
    fn is_data_access_call(ctx: &RuleContext, sig: &MethodSig, own_class: &str) -> bool {
        if DATA_ACCESS_TYPES.contains(&sig.simple_class_name()) {
            return true;
        }
        if !sig.is_resolved() {
            return false;
        }
        let data_layer = matches!(ctx.call_graph.layer_of(sig), Some(LayerType::Repository | LayerType::Mapper))
            || Self::is_data_access_type(ctx.symbols, &sig.class_fqn);
        data_layer && (sig.class_fqn != own_class || Self::is_dao_method(&sig.name))
    }

    /// 未解析类型: 全局同名类 + 命名启发式 (低置信度)
    fn classify_unresolved(ctx: &RuleContext, receiver: &Receiver, method: &str) -> bool {
        if let ReceiverType::Unresolved(simple) = &receiver.ty {
            let simple = simple.rsplit('.').next().unwrap_or(simple);
            if DATA_ACCESS_TYPES.contains(&simple) {
                return true;
            }
            let candidates = match ctx.symbols.resolve_simple_name(simple, ctx.imports.package()) {
                Resolution::Unique(fqn) => vec![fqn],
                Resolution::Ambiguous(fqns) => fqns,
                Resolution::Unknown => Vec::new(),
            };
            if !candidates.is_empty() {
                return candidates
                    .iter()
                    .any(|fqn| Self::is_data_access_type(ctx.symbols, fqn));
            }
            if Self::is_dao_name(simple) {
                return true;
            }
        }

        let receiver_text = receiver.text.as_deref().unwrap_or("");
        Self::is_dao_name(receiver_text) || Self::is_dao_method(method)
    }
}

impl RuleHandler for NPlusOneHandler {
    fn meta(&self) -> &'static RuleMeta {
        &N_PLUS_ONE
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let resolver = ctx.resolver();
        let mut findings = Vec::new();

        for row in ctx.file.query(&ctx.queries.invocation, &["call", "name"]) {
            let (Some(call), Some(name)) = (row.get(0), row.get(1)) else {
                continue;
            };
            if ctx.file.enclosing_loop(call).is_none() {
                continue;
            }

            let method = ctx.file.text(name);
            let receiver = resolver.resolve(call);

            let finding = match &receiver.ty {
                ReceiverType::Resolved(fqn) => {
                    Self::classify_resolved(ctx, ctx.method_sig(call), &receiver, fqn, method).map(|chain| {
                        ctx.finding_at(&N_PLUS_ONE, call)
                            .with_confidence(Confidence::High)
                            .with_call_chain(chain)
                    })
                }
                _ => Self::classify_unresolved(ctx, &receiver, method)
                    .then(|| ctx.finding_at(&N_PLUS_ONE, call).with_confidence(Confidence::Low)),
            };
            findings.extend(finding);
        }
        findings
    }
}

// ============================================================================
// 结构类处理器
// ============================================================================

/// 循环体直接是循环，或循环体的直接语句中有循环；报告内层循环
pub struct NestedLoopHandler;

impl RuleHandler for NestedLoopHandler {
    fn meta(&self) -> &'static RuleMeta {
        &NESTED_LOOP
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for row in ctx.file.query(&ctx.queries.loops, &["loop"]) {
            let Some(body) = row.get(0).and_then(|l| l.child_by_field_name("body")) else {
                continue;
            };
            let inner: Vec<Node> = if is_loop(body) {
                vec![body]
            } else if body.kind() == "block" {
                let mut cursor = body.walk();
                let loops = body.named_children(&mut cursor).filter(|c| is_loop(*c)).collect();
                loops
            } else {
                Vec::new()
            };
            findings.extend(inner.into_iter().map(|l| ctx.finding_at(&NESTED_LOOP, l)));
        }
        findings
    }
}

fn is_loop(node: Node<'_>) -> bool {
    LOOP_KINDS.contains(&node.kind())
}

pub(crate) fn has_keyword(node: Node<'_>, keyword: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == keyword);
    found
}

pub struct SyncMethodHandler;

impl RuleHandler for SyncMethodHandler {
    fn meta(&self) -> &'static RuleMeta {
        &SYNC_METHOD
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for row in ctx.file.query(&ctx.queries.sync_method, &["mods", "name"]) {
            let (Some(mods), Some(name)) = (row.get(0), row.get(1)) else {
                continue;
            };
            let mut cursor = mods.walk();
            let keyword = mods.children(&mut cursor).find(|c| c.kind() == "synchronized");
            if let Some(keyword) = keyword {
                let line = line_of(keyword);
                findings.push(
                    Finding::new(&SYNC_METHOD, &ctx.file.rel_path, line)
                        .with_evidence(format!("synchronized {}()", ctx.file.text(name))),
                );
            }
        }
        findings
    }
}

// ============================================================================
// ThreadLocal
// ============================================================================

pub struct ThreadLocalLeakHandler;

/// `set()`/`remove()` 的接收者: `ctx`、`this.ctx` 或 `Holder.CTX`
struct ThreadLocalRef<'t> {
    /// 比较用的写法，`this.ctx` 与 `ctx` 相同
    key: String,
    field: String,
    /// `Holder.CTX` 中的 `Holder`
    owner: Option<Node<'t>>,
}

impl ThreadLocalLeakHandler {
    fn threadlocal_ref<'t>(ctx: &RuleContext, object: Node<'t>) -> Option<ThreadLocalRef<'t>> {
        match object.kind() {
            "identifier" => {
                let name = ctx.file.text(object).to_string();
                Some(ThreadLocalRef { key: name.clone(), field: name, owner: None })
            }
            "field_access" => {
                let owner = object.child_by_field_name("object")?;
                let field = ctx.file.text(object.child_by_field_name("field")?).to_string();
                if owner.kind() == "this" {
                    return Some(ThreadLocalRef { key: field.clone(), field, owner: None });
                }
                let key = format!("{}.{field}", ctx.file.text(owner).trim());
                Some(ThreadLocalRef { key, field, owner: Some(owner) })
            }
            _ => None,
        }
    }

    /// 接收者声明类型原文，找不到返回 None
    fn declared_type(ctx: &RuleContext, target: &ThreadLocalRef<'_>, call: Node<'_>) -> Option<String> {
        match target.owner {
            None => ctx.resolver().declared_type(&target.field, call).or_else(|| {
                let class = ctx.file.enclosing_class_fqn(call, ctx.imports)?;
                ctx.symbols.field(&class, &target.field).map(|b| b.type_name.clone())
            }),
            Some(owner) => {
                let owner_text = ctx.file.text(owner);
                if owner.kind() != "identifier" || !owner_text.starts_with(|c: char| c.is_ascii_uppercase()) {
                    return None;
                }
                match ctx.resolver().resolve_type_name(owner_text) {
                    ReceiverType::Resolved(fqn) => ctx.symbols.field(&fqn, &target.field).map(|b| b.type_name.clone()),
                    _ => None,
                }
            }
        }
    }

    /// 变量是否为 ThreadLocal: Some(High) 声明类型确认，Some(Low) 仅凭名字
    fn threadlocal_confidence(ctx: &RuleContext, target: &ThreadLocalRef<'_>, call: Node<'_>) -> Option<Confidence> {
        match Self::declared_type(ctx, target, call) {
            Some(ty) => ty.ends_with("ThreadLocal").then_some(Confidence::High),
            None => {
                let lower = target.field.to_lowercase();
                (lower.contains("threadlocal") || lower.ends_with("holder") || lower.ends_with("context"))
                    .then_some(Confidence::Low)
            }
        }
    }

    /// remove() 位于某个 try 的 finally 中，且该 try 包含 set() 或在其之后
    fn removed_in_finally(remove: Node<'_>, set_call: Node<'_>) -> bool {
        let mut current = ancestor(remove, &["finally_clause"]);
        while let Some(finally) = current {
            if let Some(try_stmt) = finally.parent() {
                if contains(try_stmt, set_call) || try_stmt.start_byte() >= set_call.end_byte() {
                    return true;
                }
            }
            current = ancestor(finally, &["finally_clause"]);
        }
        false
    }
}

impl RuleHandler for ThreadLocalLeakHandler {
    fn meta(&self) -> &'static RuleMeta {
        &THREADLOCAL_LEAK
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut seen = BTreeSet::new();
        let mut findings = Vec::new();

        for row in ctx.file.query(&ctx.queries.threadlocal_set, &["var", "set_call"]) {
            let (Some(var), Some(set_call)) = (row.get(0), row.get(1)) else {
                continue;
            };
            let Some(method) = enclosing_method(set_call) else {
                continue;
            };
            let Some(target) = Self::threadlocal_ref(ctx, var) else {
                continue;
            };
            if !seen.insert((method.id(), target.key.clone())) {
                continue;
            }
            let Some(confidence) = Self::threadlocal_confidence(ctx, &target, set_call) else {
                continue;
            };

            // 只认同一方法内的 remove()
            let removes_in_method: Vec<Node> = descendants(method, &["method_invocation"])
                .into_iter()
                .filter(|c| {
                    ctx.file.call_parts(*c).1 == "remove"
                        && c.child_by_field_name("object")
                            .and_then(|o| Self::threadlocal_ref(ctx, o))
                            .is_some_and(|r| r.key == target.key)
                })
                .collect();

            if removes_in_method
                .iter()
                .any(|r| Self::removed_in_finally(*r, set_call))
            {
                continue;
            }

            let severity = if removes_in_method.is_empty() { Severity::P0 } else { Severity::P1 };
            findings.push(
                ctx.finding_at(&THREADLOCAL_LEAK, set_call)
                    .with_severity(severity)
                    .with_confidence(confidence),
            );
        }
        findings
    }
}

// ============================================================================
// 锁
// ============================================================================

const TIME_UNITS: &[&str] = &[
    "NANOSECONDS", "MICROSECONDS", "MILLISECONDS", "SECONDS", "MINUTES", "HOURS", "DAYS",
];

pub struct SleepInLockHandler;

impl SleepInLockHandler {
    fn is_sleep_target(target: &str) -> bool {
        target == "Thread"
            || target == "java.lang.Thread"
            || target.starts_with("TimeUnit.")
            || TIME_UNITS.contains(&target)
    }
}

/// 向上找持锁范围，lambda 和类体是边界
pub(crate) fn in_lock(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "synchronized_statement" => return true,
            "lambda_expression" | "class_body" | "interface_body" | "enum_body" => return false,
            kind if METHOD_KINDS.contains(&kind) => {
                let mut cursor = n.walk();
                let mods = n.named_children(&mut cursor).find(|c| c.kind() == "modifiers");
                return mods.is_some_and(|m| has_keyword(m, "synchronized"));
            }
            _ => {}
        }
        current = n.parent();
    }
    false
}

impl RuleHandler for SleepInLockHandler {
    fn meta(&self) -> &'static RuleMeta {
        &SLEEP_IN_LOCK
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.sleep, &["target", "call"])
            .into_iter()
            .filter_map(|row| {
                let (target, call) = (row.get(0)?, row.get(1)?);
                (Self::is_sleep_target(ctx.file.text(target)) && in_lock(call))
                    .then(|| ctx.finding_at(&SLEEP_IN_LOCK, call))
            })
            .collect()
    }
}

pub struct LockMethodCallHandler;

impl RuleHandler for LockMethodCallHandler {
    fn meta(&self) -> &'static RuleMeta {
        &LOCK_METHOD_CALL
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for row in ctx.file.query(&ctx.queries.lock, &["lock_var", "args", "lock_call"]) {
            let (Some(lock_var), Some(args), Some(call)) = (row.get(0), row.get(1), row.get(2)) else {
                continue;
            };
            if args.named_child_count() > 0 {
                continue;
            }
            let Some(method) = enclosing_method(call) else {
                continue;
            };
            let var = ctx.file.text(lock_var);
            let unlocked = descendants(method, &["finally_clause"])
                .into_iter()
                .any(|finally| ctx.file.has_call_on(finally, var, "unlock"));
            if !unlocked {
                findings.push(ctx.finding_at(&LOCK_METHOD_CALL, call));
            }
        }
        findings
    }
}

// ============================================================================
// 技术栈相关
// ============================================================================

pub struct FluxBlockHandler;

impl RuleHandler for FluxBlockHandler {
    fn meta(&self) -> &'static RuleMeta {
        &FLUX_BLOCK
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_reactive
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.block, &["call"])
            .into_iter()
            .filter_map(|row| row.get(0))
            .map(|call| ctx.finding_at(&FLUX_BLOCK, call))
            .collect()
    }
}

pub struct AutowiredFieldHandler;

impl RuleHandler for AutowiredFieldHandler {
    fn meta(&self) -> &'static RuleMeta {
        &AUTOWIRED_FIELD
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_spring()
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.autowired_field, &["name", "field"])
            .into_iter()
            .filter_map(|row| {
                let (name, field) = (row.get(0)?, row.get(1)?);
                let ty = field.child_by_field_name("type").map(|t| ctx.file.text(t)).unwrap_or("");
                Some(
                    Finding::new(&AUTOWIRED_FIELD, &ctx.file.rel_path, line_of(name))
                        .with_evidence(format!("@Autowired {ty} {}", ctx.file.text(name))),
                )
            })
            .collect()
    }
}

// ============================================================================
// RuleEngine
// ============================================================================

pub struct RuleEngine {
    handlers: Vec<Box<dyn RuleHandler>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        let mut engine = Self::new();
        engine.register(Box::new(NPlusOneHandler));
        engine.register(Box::new(NestedLoopHandler));
        engine.register(Box::new(SyncMethodHandler));
        engine.register(Box::new(ThreadLocalLeakHandler));
        engine.register(Box::new(SleepInLockHandler));
        engine.register(Box::new(LockMethodCallHandler));
        engine.register(Box::new(FluxBlockHandler));
        engine.register(Box::new(AutowiredFieldHandler));
        for handler in pattern_handlers::default_handlers() {
            engine.register(handler);
        }
        for rule in regex_rules::default_rules() {
            engine.register(Box::new(rule));
        }
        engine
    }

    pub fn register(&mut self, handler: Box<dyn RuleHandler>) {
        self.handlers.push(handler);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.rule_id()).collect()
    }

    pub fn catalog(&self) -> Vec<&'static RuleMeta> {
        self.handlers.iter().map(|h| h.meta()).collect()
    }

    /// 对单个文件执行全部适用规则，去掉被抑制的结果 (未排序)
    pub fn run(&self, ctx: &RuleContext) -> Vec<Finding> {
        let suppression = SuppressionContext::from_file(ctx.file);
        self.handlers
            .iter()
            .filter(|h| ctx.config.is_rule_enabled(h.rule_id()) && h.applies_to(ctx.stack))
            .flat_map(|h| h.check(ctx))
            .filter(|f| !suppression.is_suppressed(&f.rule_id, f.line))
            .collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::call_graph::extract_call_graph;
    use crate::scanner::tree_sitter_java::index_file;

    pub(crate) fn analyze_with(code: &str, stack: &DetectedStack, config: &ScanConfig) -> Vec<Finding> {
        let file = ParsedFile::from_source("Test.java", code).unwrap();
        let index = index_file(&file);
        let queries = JavaQueries::compile().unwrap();
        let mut graph = extract_call_graph(&file, &index.imports, &index.symbols, &queries);
        graph.register_layers(&index.symbols);

        let ctx = RuleContext::new(&file, &index.imports, &index.symbols, &graph, stack, config, &queries);
        RuleEngine::with_default_rules().run(&ctx)
    }

    pub(crate) fn analyze(code: &str) -> Vec<Finding> {
        analyze_with(code, &DetectedStack::default(), &ScanConfig::default())
    }

    fn of_rule<'f>(findings: &'f [Finding], rule: &str) -> Vec<&'f Finding> {
        findings.iter().filter(|f| f.rule_id == rule).collect()
    }

    #[test]
    fn test_n_plus_one_resolved_repository_is_high() {
        let code = r#"package com.example;
@Repository
class UserRepository { User findById(Long id) { return null; } }
class UserService {
    private UserRepository userRepository;
    void load(List<Long> ids) {
        for (Long id : ids) {
            userRepository.findById(id);
        }
    }
}"#;
        let findings = analyze(code);
        let n1 = of_rule(&findings, "N_PLUS_ONE");
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].line, 8);
        assert_eq!(n1[0].confidence, Some(Confidence::High));
        assert_eq!(n1[0].call_chain, vec!["UserService.load".to_string(), "UserRepository.findById".to_string()]);
        assert!(n1[0].root_cause);
    }

    #[test]
    fn test_n_plus_one_through_service_chain() {
        let code = r#"package com.example;
interface OrderMapper extends BaseMapper<Order> {}
class PriceService {
    private OrderMapper orderMapper;
    Price price(Long id) { return orderMapper.selectById(id); }
}
class Checkout {
    private PriceService priceService;
    void run(List<Long> ids) {
        ids.forEach(id -> priceService.price(id));
    }
}"#;
        let findings = analyze(code);
        let n1 = of_rule(&findings, "N_PLUS_ONE");
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].line, 10);
        assert_eq!(
            n1[0].call_chain,
            vec![
                "Checkout.run".to_string(),
                "PriceService.price".to_string(),
                "OrderMapper.selectById".to_string()
            ]
        );
    }

    #[test]
    fn test_n_plus_one_heuristic_is_low_and_header_ignored() {
        let code = r#"class Job {
    void run() {
        for (Item item : itemDao.findAll()) {
            legacyDao.touch(item);
            item.getName();
        }
    }
}"#;
        let findings = analyze(code);
        let n1 = of_rule(&findings, "N_PLUS_ONE");
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].line, 4);
        assert_eq!(n1[0].confidence, Some(Confidence::Low));
        assert!(n1[0].call_chain.is_empty());
    }

    #[test]
    fn test_helper_call_inside_repository_is_not_n_plus_one() {
        let code = r#"package com.example;
@Repository
class ReportRepository {
    List<String> render(List<Row> rows) {
        List<String> out = new ArrayList<>();
        for (Row r : rows) {
            out.add(format(r));
        }
        return out;
    }
    private String format(Row r) { return r.toString(); }
}"#;
        assert!(of_rule(&analyze(code), "N_PLUS_ONE").is_empty());
    }

    #[test]
    fn test_self_call_reaching_jdbc_is_high() {
        let code = r#"package com.example;
@Repository
class OrderRepository {
    private JdbcTemplate jdbcTemplate;
    void insertEach(List<Order> orders) {
        for (Order o : orders) {
            insert(o);
        }
    }
    private void insert(Order o) { jdbcTemplate.update("insert", o.getId()); }
    void reloadEach(List<Long> ids) {
        for (Long id : ids) {
            findById(id);
        }
    }
    Order findById(Long id) { return null; }
}"#;
        let findings = analyze(code);
        let n1 = of_rule(&findings, "N_PLUS_ONE");
        assert_eq!(n1.len(), 2);
        assert_eq!(n1[0].line, 7);
        assert_eq!(n1[0].confidence, Some(Confidence::High));
        assert_eq!(
            n1[0].call_chain,
            vec![
                "OrderRepository.insertEach".to_string(),
                "OrderRepository.insert".to_string(),
                "JdbcTemplate.update".to_string()
            ]
        );
        assert_eq!(n1[1].line, 13);
        assert_eq!(
            n1[1].call_chain,
            vec!["OrderRepository.reloadEach".to_string(), "OrderRepository.findById".to_string()]
        );
    }

    #[test]
    fn test_object_mapper_is_not_dao() {
        let code = r#"class A {
    void f(List<String> xs) {
        for (String x : xs) { objectMapper.readValue(x, Foo.class); }
    }
}"#;
        assert!(of_rule(&analyze(code), "N_PLUS_ONE").is_empty());
    }

    #[test]
    fn test_nested_loop_reports_inner() {
        let code = r#"class A {
    void f(int n) {
        for (int i = 0; i < n; i++) {
            for (int j = 0; j < n; j++) {}
        }
        while (true) { break; }
    }
}"#;
        let findings = analyze(code);
        let nested = of_rule(&findings, "NESTED_LOOP");
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].line, 4);
    }

    #[test]
    fn test_sync_method_and_inline_suppression() {
        let code = r#"class A {
    @Override
    public synchronized void a() {}
    public synchronized void b() {} // java-perf-ignore: SYNC_METHOD
    public void c() { synchronized (this) {} }
}"#;
        let findings = analyze(code);
        let lines: Vec<usize> = of_rule(&findings, "SYNC_METHOD").iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![3]);
    }

    #[test]
    fn test_threadlocal_finally_variants() {
        let code = r#"class Ctx {
    private static final ThreadLocal<String> USER = new ThreadLocal<>();
    void safe() {
        try { USER.set("a"); work(); } finally { USER.remove(); }
    }
    void safeAfter() {
        USER.set("a");
        try { work(); } finally { USER.remove(); }
    }
    void removedOutsideFinally() {
        USER.set("a");
        work();
        USER.remove();
    }
}"#;
        let findings = analyze(code);
        let leaks = of_rule(&findings, "THREADLOCAL_LEAK");
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].line, 11);
        assert_eq!(leaks[0].severity, Severity::P1);
        assert_eq!(leaks[0].confidence, Some(Confidence::High));
    }

    #[test]
    fn test_threadlocal_without_remove_is_p0() {
        let code = r#"class Ctx {
    private static final ThreadLocal<String> USER = new ThreadLocal<>();
    private final Map<String, String> cache = new HashMap<>();
    void leak() {
        USER.set("a");
        cache.put("k", "v");
    }
}"#;
        let findings = analyze(code);
        let leaks = of_rule(&findings, "THREADLOCAL_LEAK");
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].severity, Severity::P0);
    }

    #[test]
    fn test_threadlocal_removed_in_other_method_is_p0() {
        let code = r#"class UserInterceptor {
    private static final ThreadLocal<String> CTX = new ThreadLocal<>();
    public boolean preHandle(String user) {
        CTX.set(user);
        return true;
    }
    public void afterCompletion() {
        CTX.remove();
    }
}"#;
        let findings = analyze(code);
        let leaks = of_rule(&findings, "THREADLOCAL_LEAK");
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].line, 4);
        assert_eq!(leaks[0].severity, Severity::P0);
    }

    #[test]
    fn test_threadlocal_field_access_receivers() {
        let code = r#"package com.acme;

class Holder {
    static final ThreadLocal<String> CTX = new ThreadLocal<>();
}

class Worker {
    private final ThreadLocal<String> ctx = new ThreadLocal<>();
    void own(String u) {
        this.ctx.set(u);
    }
    void ownCleaned(String u) {
        this.ctx.set(u);
        try { work(); } finally { ctx.remove(); }
    }
    void shared(String u) {
        Holder.CTX.set(u);
        work();
    }
    void sharedCleaned(String u) {
        try { Holder.CTX.set(u); work(); } finally { Holder.CTX.remove(); }
    }
}"#;
        let findings = analyze(code);
        let leaks = of_rule(&findings, "THREADLOCAL_LEAK");
        let lines: Vec<usize> = leaks.iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![10, 17]);
        assert!(leaks.iter().all(|f| f.severity == Severity::P0));
        assert!(leaks.iter().all(|f| f.confidence == Some(Confidence::High)));
    }

    #[test]
    fn test_sleep_in_lock() {
        let code = r#"class A {
    void a() throws Exception {
        synchronized (this) { Thread.sleep(100); }
        Thread.sleep(1);
    }
    synchronized void b() throws Exception { TimeUnit.SECONDS.sleep(1); }
}"#;
        let lines: Vec<usize> = of_rule(&analyze(code), "SLEEP_IN_LOCK").iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![3, 6]);
    }

    #[test]
    fn test_sleep_in_deferred_callback_is_not_in_lock() {
        let code = r#"class Poller {
    void start(ExecutorService pool) {
        synchronized (this) {
            pool.submit(() -> {
                Thread.sleep(100);
            });
            pool.submit(new Runnable() {
                public void run() { Thread.sleep(100); }
            });
        }
    }
}"#;
        assert!(of_rule(&analyze(code), "SLEEP_IN_LOCK").is_empty());
    }

    #[test]
    fn test_lock_without_finally_unlock() {
        let code = r#"class A {
    private final Lock lock = new ReentrantLock();
    void good() {
        lock.lock();
        try { work(); } finally { lock.unlock(); }
    }
    void bad() {
        lock.lock();
        work();
        lock.unlock();
    }
}"#;
        let lines: Vec<usize> = of_rule(&analyze(code), "LOCK_METHOD_CALL").iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![8]);
    }

    #[test]
    fn test_stack_gated_rules() {
        let code = r#"class A {
    @Autowired
    private UserService userService;
    String f(Mono<String> m) { return m.block(); }
}"#;
        let plain = analyze(code);
        assert!(of_rule(&plain, "FLUX_BLOCK").is_empty());
        assert!(of_rule(&plain, "AUTOWIRED_FIELD").is_empty());

        let stack = DetectedStack {
            is_spring_boot: true,
            is_webflux: true,
            is_reactive: true,
            ..DetectedStack::default()
        };
        let reactive = analyze_with(code, &stack, &ScanConfig::default());
        assert_eq!(of_rule(&reactive, "FLUX_BLOCK").len(), 1);
        let autowired = of_rule(&reactive, "AUTOWIRED_FIELD");
        assert_eq!(autowired.len(), 1);
        assert_eq!(autowired[0].line, 3);
        assert_eq!(autowired[0].severity, Severity::P2);
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let code = "class A { public synchronized void a() {} }";
        let config = ScanConfig {
            disabled_rules: vec!["SYNC_METHOD".to_string()],
            ..ScanConfig::default()
        };
        let findings = analyze_with(code, &DetectedStack::default(), &config);
        assert!(of_rule(&findings, "SYNC_METHOD").is_empty());
    }

    #[test]
    fn test_default_rule_ids_are_unique() {
        let ids = RuleEngine::with_default_rules().rule_ids();
        let unique: BTreeSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids.len(), 30);
    }
}
