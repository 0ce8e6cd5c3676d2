// ============================================================================
// 代码模式规则 - 单文件语法树上的惯用法检测
// ============================================================================
//
// 不需要调用链，只看一个文件的结构；涉及类型时借用接收者解析。
//
// ============================================================================

use tree_sitter::Node;

use super::rule_handlers::{has_keyword, in_lock, RuleContext, RuleHandler};
use super::tree_sitter_java::{
    ancestor, annotations_of, descendants, enclosing_method, first_named_child, line_of, ParsedFile,
    TYPE_DECLARATIONS,
};
use super::{Confidence, Finding, RuleMeta, Severity};
use crate::call_graph::ReceiverSource;
use crate::project_detector::DetectedStack;

// ============================================================================
// 规则元数据
// ============================================================================

pub static STRING_CONCAT_LOOP: RuleMeta = RuleMeta {
    id: "STRING_CONCAT_LOOP",
    title: "循环内字符串拼接",
    severity: Severity::P1,
    fix: "循环外创建 StringBuilder，循环内 append",
};

pub static EMPTY_CATCH: RuleMeta = RuleMeta {
    id: "EMPTY_CATCH",
    title: "空 catch 块 (吞掉异常)",
    severity: Severity::P0,
    fix: "至少记录日志，或包装后重新抛出",
};

pub static DOUBLE_CHECKED_LOCKING: RuleMeta = RuleMeta {
    id: "DOUBLE_CHECKED_LOCKING",
    title: "双重检查锁定 (DCL) 字段未声明 volatile",
    severity: Severity::P0,
    fix: "实例字段加 volatile，或改用静态内部类/枚举单例",
};

pub static NON_ATOMIC_COMPOUND: RuleMeta = RuleMeta {
    id: "NON_ATOMIC_COMPOUND",
    title: "非原子复合操作 (check-then-act)",
    severity: Severity::P0,
    fix: "使用 computeIfAbsent / putIfAbsent 等原子方法",
};

pub static ASYNC_DEFAULT_POOL: RuleMeta = RuleMeta {
    id: "ASYNC_DEFAULT_POOL",
    title: "@Async 未指定线程池",
    severity: Severity::P1,
    fix: "配置自定义 Executor，并在 @Async(\"executorName\") 中指定",
};

pub static TRANSACTION_SELF_CALL: RuleMeta = RuleMeta {
    id: "TRANSACTION_SELF_CALL",
    title: "@Transactional 方法自调用 (代理不生效)",
    severity: Severity::P0,
    fix: "把事务方法移到另一个 Bean，通过注入的代理调用",
};

pub static STREAM_RESOURCE_LEAK: RuleMeta = RuleMeta {
    id: "STREAM_RESOURCE_LEAK",
    title: "IO 资源未关闭",
    severity: Severity::P1,
    fix: "使用 try-with-resources",
};

pub static FINALIZE_OVERRIDE: RuleMeta = RuleMeta {
    id: "FINALIZE_OVERRIDE",
    title: "重写 finalize()",
    severity: Severity::P0,
    fix: "使用 java.lang.ref.Cleaner 或 try-with-resources",
};

pub static SUBSCRIBE_NO_ERROR: RuleMeta = RuleMeta {
    id: "SUBSCRIBE_NO_ERROR",
    title: "subscribe() 未处理 error",
    severity: Severity::P1,
    fix: "添加 error consumer: subscribe(onNext, onError)",
};

pub static FLUX_COLLECT_LIST: RuleMeta = RuleMeta {
    id: "FLUX_COLLECT_LIST",
    title: "collectList() 无界收集",
    severity: Severity::P1,
    fix: "使用 buffer(n) / window(n) 限制批量大小",
};

// ============================================================================
// 节点工具
// ============================================================================

/// `x` 与 `this.x` 统一为 `x`
fn variable_name<'f>(file: &'f ParsedFile, node: Node<'_>) -> Option<&'f str> {
    match node.kind() {
        "identifier" => Some(file.text(node)),
        "field_access" if node.child_by_field_name("object").is_some_and(|o| o.kind() == "this") => {
            node.child_by_field_name("field").map(|f| file.text(f))
        }
        _ => None,
    }
}

fn is_comment(node: Node<'_>) -> bool {
    matches!(node.kind(), "line_comment" | "block_comment")
}

/// 实参节点 (不含注释)
fn argument_nodes<'t>(args: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = args.walk();
    let nodes = args.named_children(&mut cursor).filter(|c| !is_comment(*c)).collect();
    nodes
}

fn call_arguments<'t>(call: Node<'t>) -> Vec<Node<'t>> {
    call.child_by_field_name("arguments").map(argument_nodes).unwrap_or_default()
}

/// 声明上按简单名匹配的注解节点
fn annotation<'t>(file: &ParsedFile, declaration: Node<'t>, name: &str) -> Option<Node<'t>> {
    let modifiers = first_named_child(declaration, "modifiers")?;
    let mut cursor = modifiers.walk();
    let found = modifiers.named_children(&mut cursor).find(|ann| {
        matches!(ann.kind(), "marker_annotation" | "annotation")
            && ann
                .child_by_field_name("name")
                .is_some_and(|n| file.text(n).rsplit('.').next() == Some(name))
    });
    found
}

/// 节点所在类型声明中名为 `name` 的字段声明
fn field_declaration<'t>(file: &ParsedFile, node: Node<'t>, name: &str) -> Option<Node<'t>> {
    let body = ancestor(node, TYPE_DECLARATIONS)?.child_by_field_name("body")?;
    let mut cursor = body.walk();
    let found = body.named_children(&mut cursor).find(|member| {
        if member.kind() != "field_declaration" {
            return false;
        }
        let mut inner = member.walk();
        let declared = member
            .children_by_field_name("declarator", &mut inner)
            .any(|d| d.child_by_field_name("name").is_some_and(|n| file.text(n) == name));
        declared
    });
    found
}

// ============================================================================
// 字符串与异常
// ============================================================================

pub struct StringConcatLoopHandler;

impl StringConcatLoopHandler {
    fn declared_type(ctx: &RuleContext, var: Node<'_>) -> Option<String> {
        let name = variable_name(ctx.file, var)?;
        let local = if var.kind() == "identifier" {
            ctx.resolver().declared_type(name, var)
        } else {
            None
        };
        local.or_else(|| {
            let class = ctx.file.enclosing_class_fqn(var, ctx.imports)?;
            ctx.symbols.field(&class, name).map(|b| b.type_name.clone())
        })
    }

    /// 左值是否为 String: Some(High) 声明类型确认，Some(Low) 仅凭右侧的字符串字面量
    fn string_confidence(ctx: &RuleContext, var: Node<'_>, value: Node<'_>) -> Option<Confidence> {
        match Self::declared_type(ctx, var) {
            Some(ty) => (ty.rsplit('.').next() == Some("String")).then_some(Confidence::High),
            None => (!descendants(value, &["string_literal"]).is_empty()).then_some(Confidence::Low),
        }
    }
}

impl RuleHandler for StringConcatLoopHandler {
    fn meta(&self) -> &'static RuleMeta {
        &STRING_CONCAT_LOOP
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.compound_assign, &["var", "value", "assign"])
            .into_iter()
            .filter_map(|row| {
                let (var, value, assign) = (row.get(0)?, row.get(1)?, row.get(2)?);
                ctx.file.enclosing_loop(assign)?;
                let confidence = Self::string_confidence(ctx, var, value)?;
                Some(ctx.finding_at(&STRING_CONCAT_LOOP, assign).with_confidence(confidence))
            })
            .collect()
    }
}

pub struct EmptyCatchHandler;

impl EmptyCatchHandler {
    /// `e.printStackTrace()` 或 `System.out/err.println(..)`
    fn is_print_only(ctx: &RuleContext, statement: Node<'_>) -> bool {
        let Some(call) = statement
            .named_child(0)
            .filter(|c| statement.kind() == "expression_statement" && c.kind() == "method_invocation")
        else {
            return false;
        };
        let (receiver, name) = ctx.file.call_parts(call);
        name == "printStackTrace"
            || receiver.is_some_and(|r| r.starts_with("System.out") || r.starts_with("System.err"))
    }
}

impl RuleHandler for EmptyCatchHandler {
    fn meta(&self) -> &'static RuleMeta {
        &EMPTY_CATCH
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for row in ctx.file.query(&ctx.queries.catch_clause, &["body", "catch"]) {
            let (Some(body), Some(catch)) = (row.get(0), row.get(1)) else {
                continue;
            };
            let mut cursor = body.walk();
            let children: Vec<Node> = body.named_children(&mut cursor).collect();
            // 写了注释视为有意忽略
            if children.iter().any(|c| is_comment(*c)) {
                continue;
            }
            if children.iter().all(|s| Self::is_print_only(ctx, *s)) {
                let line = line_of(catch);
                findings.push(Finding::new(&EMPTY_CATCH, &ctx.file.rel_path, line).with_evidence(ctx.source_line(line)));
            }
        }
        findings
    }
}

// ============================================================================
// 并发
// ============================================================================

pub struct DoubleCheckedLockingHandler;

impl DoubleCheckedLockingHandler {
    /// 条件中 `x == null` 的变量名
    fn null_checked<'f>(file: &'f ParsedFile, condition: Node<'_>) -> Option<&'f str> {
        descendants(condition, &["binary_expression"]).into_iter().find_map(|bin| {
            if file.text(bin.child_by_field_name("operator")?) != "==" {
                return None;
            }
            let (left, right) = (bin.child_by_field_name("left")?, bin.child_by_field_name("right")?);
            let operand = match (left.kind(), right.kind()) {
                (_, "null_literal") => left,
                ("null_literal", _) => right,
                _ => return None,
            };
            variable_name(file, operand)
        })
    }

    fn rechecked_under_lock(file: &ParsedFile, consequence: Node<'_>, name: &str) -> bool {
        descendants(consequence, &["synchronized_statement"]).into_iter().any(|sync| {
            sync.child_by_field_name("body").is_some_and(|body| {
                descendants(body, &["if_statement"]).into_iter().any(|inner| {
                    inner
                        .child_by_field_name("condition")
                        .and_then(|c| Self::null_checked(file, c))
                        == Some(name)
                })
            })
        })
    }
}

impl RuleHandler for DoubleCheckedLockingHandler {
    fn meta(&self) -> &'static RuleMeta {
        &DOUBLE_CHECKED_LOCKING
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for outer in descendants(ctx.file.root(), &["if_statement"]) {
            let (Some(condition), Some(consequence)) =
                (outer.child_by_field_name("condition"), outer.child_by_field_name("consequence"))
            else {
                continue;
            };
            let Some(name) = Self::null_checked(ctx.file, condition) else {
                continue;
            };
            if !Self::rechecked_under_lock(ctx.file, consequence, name) {
                continue;
            }
            // 局部变量不存在可见性问题
            let Some(field) = field_declaration(ctx.file, outer, name) else {
                continue;
            };
            let is_volatile = first_named_child(field, "modifiers").is_some_and(|m| has_keyword(m, "volatile"));
            if !is_volatile {
                findings.push(ctx.finding_at(&DOUBLE_CHECKED_LOCKING, outer));
            }
        }
        findings
    }
}

const CHECK_METHODS: &[&str] = &["containsKey", "contains"];
const ACT_METHODS: &[&str] = &["put", "add", "remove", "get"];

pub struct NonAtomicCompoundHandler;

impl NonAtomicCompoundHandler {
    /// 条件本身 (可带 `!`) 就是 `xs.containsKey(..)` / `xs.contains(..)`
    fn check_call<'t>(ctx: &RuleContext, condition: Node<'t>) -> Option<Node<'t>> {
        let mut expr = condition.named_child(0)?;
        if expr.kind() == "unary_expression" {
            expr = expr.child_by_field_name("operand")?;
        }
        (expr.kind() == "method_invocation" && CHECK_METHODS.contains(&ctx.file.call_parts(expr).1.as_str()))
            .then_some(expr)
    }
}

impl RuleHandler for NonAtomicCompoundHandler {
    fn meta(&self) -> &'static RuleMeta {
        &NON_ATOMIC_COMPOUND
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for statement in descendants(ctx.file.root(), &["if_statement"]) {
            let (Some(condition), Some(consequence)) = (
                statement.child_by_field_name("condition"),
                statement.child_by_field_name("consequence"),
            ) else {
                continue;
            };
            let Some(check) = Self::check_call(ctx, condition) else {
                continue;
            };
            if in_lock(statement) {
                continue;
            }
            // 只有字段是共享状态
            if ctx.resolver().resolve(check).source != ReceiverSource::Field {
                continue;
            }
            let Some(key) = check.child_by_field_name("object").and_then(|o| variable_name(ctx.file, o)) else {
                continue;
            };
            let acts = descendants(consequence, &["method_invocation"]).into_iter().any(|call| {
                ACT_METHODS.contains(&ctx.file.call_parts(call).1.as_str())
                    && call.child_by_field_name("object").and_then(|o| variable_name(ctx.file, o)) == Some(key)
            });
            if acts {
                findings.push(ctx.finding_at(&NON_ATOMIC_COMPOUND, statement));
            }
        }
        findings
    }
}

// ============================================================================
// Spring
// ============================================================================

pub struct AsyncDefaultPoolHandler;

impl RuleHandler for AsyncDefaultPoolHandler {
    fn meta(&self) -> &'static RuleMeta {
        &ASYNC_DEFAULT_POOL
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_spring()
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        descendants(ctx.file.root(), &["method_declaration", "class_declaration"])
            .into_iter()
            .filter_map(|decl| annotation(ctx.file, decl, "Async"))
            .filter(|ann| {
                let named_executor = ann
                    .child_by_field_name("arguments")
                    .is_some_and(|args| !argument_nodes(args).is_empty());
                !named_executor
            })
            .map(|ann| ctx.finding_at(&ASYNC_DEFAULT_POOL, ann))
            .collect()
    }
}

pub struct TransactionSelfCallHandler;

impl TransactionSelfCallHandler {
    fn is_transactional(ctx: &RuleContext, declaration: Node<'_>) -> bool {
        annotations_of(ctx.file, declaration)
            .iter()
            .any(|(name, _)| name == "Transactional")
    }

    /// 同一类中同名、参数个数相同且标注了 @Transactional 的方法
    fn transactional_target<'t>(ctx: &RuleContext, class: Node<'t>, name: &str, arity: usize) -> Option<Node<'t>> {
        let body = class.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let found = body.named_children(&mut cursor).find(|member| {
            member.kind() == "method_declaration"
                && member.child_by_field_name("name").is_some_and(|n| ctx.file.text(n) == name)
                && member
                    .child_by_field_name("parameters")
                    .is_some_and(|p| argument_nodes(p).len() == arity)
                && annotation(ctx.file, *member, "Transactional").is_some()
        });
        found
    }
}

impl RuleHandler for TransactionSelfCallHandler {
    fn meta(&self) -> &'static RuleMeta {
        &TRANSACTION_SELF_CALL
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_spring()
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let resolver = ctx.resolver();
        let mut findings = Vec::new();

        for call in descendants(ctx.file.root(), &["method_invocation"]) {
            if resolver.resolve(call).source != ReceiverSource::EnclosingClass {
                continue;
            }
            let (Some(caller), Some(class)) = (enclosing_method(call), ancestor(call, TYPE_DECLARATIONS)) else {
                continue;
            };
            let name = ctx.file.call_parts(call).1;
            let Some(target) = Self::transactional_target(ctx, class, &name, call_arguments(call).len()) else {
                continue;
            };
            let requires_new = annotation(ctx.file, target, "Transactional")
                .is_some_and(|ann| ctx.file.text(ann).contains("REQUIRES_NEW"));
            let caller_transactional = Self::is_transactional(ctx, caller) || Self::is_transactional(ctx, class);
            // 已在事务内调用普通事务方法，传播行为一致
            if caller_transactional && !requires_new {
                continue;
            }
            findings.push(
                Finding::new(&TRANSACTION_SELF_CALL, &ctx.file.rel_path, line_of(call))
                    .with_evidence(format!("{}() → @Transactional {name}()", ctx.file.method_name(caller))),
            );
        }
        findings
    }
}

// ============================================================================
// 资源
// ============================================================================

const CLOSEABLE_SUFFIXES: &[&str] = &["InputStream", "OutputStream", "Reader", "Writer"];
const IN_MEMORY_PREFIXES: &[&str] = &["ByteArray", "CharArray", "String"];
const FILES_STREAMS: &[&str] = &["lines", "list", "walk", "find"];

pub struct StreamResourceLeakHandler;

impl StreamResourceLeakHandler {
    fn is_io_resource(ty: &str) -> bool {
        let base = ty.split('<').next().unwrap_or(ty).trim();
        let simple = base.rsplit('.').next().unwrap_or(base);
        if IN_MEMORY_PREFIXES.iter().any(|p| simple.starts_with(p)) {
            return false;
        }
        simple == "Socket" || simple == "RandomAccessFile" || CLOSEABLE_SUFFIXES.iter().any(|s| simple.ends_with(s))
    }

    fn is_files_stream(ctx: &RuleContext, call: Node<'_>) -> bool {
        let (receiver, name) = ctx.file.call_parts(call);
        matches!(receiver.as_deref(), Some("Files" | "java.nio.file.Files")) && FILES_STREAMS.contains(&name.as_str())
    }

    fn opens_resource(ctx: &RuleContext, value: Node<'_>) -> bool {
        match value.kind() {
            "object_creation_expression" => value
                .child_by_field_name("type")
                .is_some_and(|t| Self::is_io_resource(ctx.file.text(t))),
            "method_invocation" => Self::is_files_stream(ctx, value),
            _ => false,
        }
    }

    /// finally 中 close()、交给 try-with-resources 或作为返回值交出
    fn is_handled(ctx: &RuleContext, method: Node<'_>, var: &str) -> bool {
        descendants(method, &["finally_clause"])
            .into_iter()
            .any(|finally| ctx.file.has_call_on(finally, var, "close"))
            || descendants(method, &["resource"])
                .into_iter()
                .any(|r| ctx.file.text(r).trim() == var)
            || descendants(method, &["return_statement"])
                .into_iter()
                .any(|r| r.named_child(0).is_some_and(|e| ctx.file.text(e) == var))
    }
}

impl RuleHandler for StreamResourceLeakHandler {
    fn meta(&self) -> &'static RuleMeta {
        &STREAM_RESOURCE_LEAK
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();

        for declarator in descendants(ctx.file.root(), &["variable_declarator"]) {
            let Some(declaration) = declarator.parent().filter(|p| p.kind() == "local_variable_declaration") else {
                continue;
            };
            let (Some(name), Some(value)) =
                (declarator.child_by_field_name("name"), declarator.child_by_field_name("value"))
            else {
                continue;
            };
            if !Self::opens_resource(ctx, value) {
                continue;
            }
            let Some(method) = enclosing_method(declaration) else {
                continue;
            };
            if !Self::is_handled(ctx, method, ctx.file.text(name)) {
                findings.push(ctx.finding_at(&STREAM_RESOURCE_LEAK, declaration));
            }
        }

        // 没有落到变量上的 Files.lines(..) 等，直接链式使用
        for call in descendants(ctx.file.root(), &["method_invocation"]) {
            if !Self::is_files_stream(ctx, call) {
                continue;
            }
            let consumed = call
                .parent()
                .is_some_and(|p| matches!(p.kind(), "variable_declarator" | "resource" | "return_statement"));
            if !consumed {
                findings.push(ctx.finding_at(&STREAM_RESOURCE_LEAK, call));
            }
        }
        findings
    }
}

pub struct FinalizeOverrideHandler;

impl RuleHandler for FinalizeOverrideHandler {
    fn meta(&self) -> &'static RuleMeta {
        &FINALIZE_OVERRIDE
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.finalize, &["name", "params"])
            .into_iter()
            .filter_map(|row| {
                let (name, params) = (row.get(0)?, row.get(1)?);
                argument_nodes(params).is_empty().then(|| {
                    let line = line_of(name);
                    Finding::new(&FINALIZE_OVERRIDE, &ctx.file.rel_path, line).with_evidence(ctx.source_line(line))
                })
            })
            .collect()
    }
}

// ============================================================================
// Reactor
// ============================================================================

pub struct SubscribeNoErrorHandler;

impl RuleHandler for SubscribeNoErrorHandler {
    fn meta(&self) -> &'static RuleMeta {
        &SUBSCRIBE_NO_ERROR
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_reactive
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.reactive_call, &["method", "args", "call"])
            .into_iter()
            .filter_map(|row| {
                let (method, args, call) = (row.get(0)?, row.get(1)?, row.get(2)?);
                if ctx.file.text(method) != "subscribe" {
                    return None;
                }
                // 单个 Subscriber 对象自带 onError
                let unhandled = match argument_nodes(args).as_slice() {
                    [] => true,
                    [only] => matches!(only.kind(), "lambda_expression" | "method_reference"),
                    _ => false,
                };
                unhandled.then(|| ctx.finding_at(&SUBSCRIBE_NO_ERROR, call))
            })
            .collect()
    }
}

pub struct FluxCollectListHandler;

impl RuleHandler for FluxCollectListHandler {
    fn meta(&self) -> &'static RuleMeta {
        &FLUX_COLLECT_LIST
    }

    fn applies_to(&self, stack: &DetectedStack) -> bool {
        stack.is_reactive
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        ctx.file
            .query(&ctx.queries.reactive_call, &["method", "call"])
            .into_iter()
            .filter_map(|row| {
                let (method, call) = (row.get(0)?, row.get(1)?);
                (ctx.file.text(method) == "collectList").then(|| ctx.finding_at(&FLUX_COLLECT_LIST, call))
            })
            .collect()
    }
}

pub fn default_handlers() -> Vec<Box<dyn RuleHandler>> {
    vec![
        Box::new(StringConcatLoopHandler),
        Box::new(EmptyCatchHandler),
        Box::new(DoubleCheckedLockingHandler),
        Box::new(NonAtomicCompoundHandler),
        Box::new(AsyncDefaultPoolHandler),
        Box::new(TransactionSelfCallHandler),
        Box::new(StreamResourceLeakHandler),
        Box::new(FinalizeOverrideHandler),
        Box::new(SubscribeNoErrorHandler),
        Box::new(FluxCollectListHandler),
    ]
}
