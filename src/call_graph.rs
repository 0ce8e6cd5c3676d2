// ============================================================================
// 调用图模块 - 跨文件调用链追踪
// ============================================================================
//
// 节点是 (类 FQN, 方法名)。接收者类型无法解析时记为 UNRESOLVED:<简单名>，
// 这类边不会参与 trace_to_layer 的层级判定。
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::Node;

use crate::import_index::ImportIndex;
use crate::scanner::tree_sitter_java::{
    declared_types, descendants, enclosing_method, JavaQueries, ParsedFile,
};
use crate::symbol_table::{normalize_type_name, LayerType, Resolution, SymbolTable};

const UNRESOLVED_PREFIX: &str = "UNRESOLVED:";

/// 方法签名
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSig {
    pub class_fqn: String,  // "com.example.service.UserService"
    pub name: String,       // "getUser"
}

impl MethodSig {
    pub fn new(class_fqn: &str, name: &str) -> Self {
        Self {
            class_fqn: class_fqn.to_string(),
            name: name.to_string(),
        }
    }

    pub fn unresolved(simple_class: &str, name: &str) -> Self {
        Self::new(&format!("{UNRESOLVED_PREFIX}{simple_class}"), name)
    }

    /// 类名已解析为带包名的 FQN
    pub fn is_resolved(&self) -> bool {
        !self.class_fqn.starts_with(UNRESOLVED_PREFIX) && self.class_fqn.contains('.')
    }

    pub fn simple_class_name(&self) -> &str {
        let class = self
            .class_fqn
            .strip_prefix(UNRESOLVED_PREFIX)
            .unwrap_or(&self.class_fqn);
        class.rsplit('.').next().unwrap_or(class)
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.simple_class_name(), self.name)
    }
}

/// trace_to_layer 找到的路径，起点在前
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPath(pub Vec<MethodSig>);

impl CallPath {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn target(&self) -> Option<&MethodSig> {
        self.0.last()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(" → "))
    }
}

/// 调用图 - 用于追踪 Controller -> Service -> DAO 链
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallGraph {
    /// 方法签名 -> 该方法调用的其他方法
    outgoing: BTreeMap<MethodSig, BTreeSet<MethodSig>>,
    /// 方法签名 -> 调用该方法的其他方法
    incoming: BTreeMap<MethodSig, BTreeSet<MethodSig>>,
    /// 类 FQN -> Layer
    class_layers: BTreeMap<String, LayerType>,
    /// 接口/父类 FQN -> 实现类 FQN
    implementations: BTreeMap<String, BTreeSet<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加调用关系
    pub fn add_edge(&mut self, caller: MethodSig, callee: MethodSig) {
        self.incoming
            .entry(callee.clone())
            .or_default()
            .insert(caller.clone());
        self.outgoing.entry(caller).or_default().insert(callee);
    }

    pub fn callees(&self, sig: &MethodSig) -> impl Iterator<Item = &MethodSig> {
        self.outgoing.get(sig).into_iter().flatten()
    }

    pub fn callers(&self, sig: &MethodSig) -> impl Iterator<Item = &MethodSig> {
        self.incoming.get(sig).into_iter().flatten()
    }

    /// 从全局符号表登记类层级
    pub fn register_layers(&mut self, symbols: &SymbolTable) {
        for info in symbols.classes() {
            self.class_layers.insert(info.fqn.clone(), info.layer);
        }
    }

    /// 登记 `impl_fqn` 实现/继承了 `super_fqn`，两端都是 FQN
    pub fn add_implementation(&mut self, super_fqn: String, impl_fqn: String) {
        if super_fqn != impl_fqn {
            self.implementations.entry(super_fqn).or_default().insert(impl_fqn);
        }
    }

    pub fn implementations_of(&self, super_fqn: &str) -> impl Iterator<Item = &String> {
        self.implementations.get(super_fqn).into_iter().flatten()
    }

    pub fn layer_of(&self, sig: &MethodSig) -> Option<LayerType> {
        self.class_layers.get(&sig.class_fqn).copied()
    }

    /// 下一跳: 直接调用 + 接口分派到实现类的同名方法
    fn neighbours(&self, sig: &MethodSig) -> Vec<MethodSig> {
        let mut next: Vec<MethodSig> = self.callees(sig).cloned().collect();
        if let Some(impls) = self.implementations.get(&sig.class_fqn) {
            next.extend(impls.iter().map(|fqn| MethodSig::new(fqn, &sig.name)));
        }
        next
    }

    /// BFS 查找从 start 到目标层任一方法的最短路径
    ///
    /// start 本身已在目标层时返回只含 start 的路径。
    pub fn trace_to_layer(&self, start: &MethodSig, target: LayerType) -> Option<CallPath> {
        if self.layer_of(start) == Some(target) {
            return Some(CallPath(vec![start.clone()]));
        }
        self.trace(start, |sig| sig.is_resolved() && self.layer_of(sig) == Some(target))
    }

    /// BFS 查找从 start 到第一个满足 `is_target` 的方法的最短路径
    ///
    /// start 自身不参与判断；未解析的方法可以是终点，但不再向下展开。
    pub fn trace<F>(&self, start: &MethodSig, is_target: F) -> Option<CallPath>
    where
        F: Fn(&MethodSig) -> bool,
    {
        let mut parent: BTreeMap<MethodSig, MethodSig> = BTreeMap::new();
        let mut visited = BTreeSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);

        while let Some(current) = queue.pop_front() {
            for next in self.neighbours(&current) {
                if !visited.insert(next.clone()) {
                    continue;
                }
                parent.insert(next.clone(), current.clone());
                if is_target(&next) {
                    return Some(Self::rebuild_path(&parent, next));
                }
                if next.is_resolved() {
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn rebuild_path(parent: &BTreeMap<MethodSig, MethodSig>, end: MethodSig) -> CallPath {
        let mut path = vec![end];
        while let Some(prev) = path.last().and_then(|last| parent.get(last)) {
            path.push(prev.clone());
        }
        path.reverse();
        CallPath(path)
    }

    /// 合并两个片段 (并集，与顺序无关)
    pub fn merge(mut self, other: CallGraph) -> CallGraph {
        for (caller, callees) in other.outgoing {
            self.outgoing.entry(caller).or_default().extend(callees);
        }
        for (callee, callers) in other.incoming {
            self.incoming.entry(callee).or_default().extend(callers);
        }
        self.class_layers.extend(other.class_layers);
        for (fqn, impls) in other.implementations {
            self.implementations.entry(fqn).or_default().extend(impls);
        }
        self
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    pub fn unresolved_edge_count(&self) -> usize {
        self.outgoing
            .values()
            .flatten()
            .filter(|callee| !callee.is_resolved())
            .count()
    }
}

// ============================================================================
// 接收者类型解析
// ============================================================================

/// 接收者的静态类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverType {
    /// 解析到 FQN
    Resolved(String),
    /// 知道声明类型的简单名，但无法定位到 FQN
    Unresolved(String),
    /// 连声明类型都不知道
    Unknown,
}

/// 接收者类型的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverSource {
    EnclosingClass,
    Field,
    Local,
    StaticType,
    Constructor,
    Expression,
}

#[derive(Debug, Clone)]
pub struct Receiver {
    /// 接收者原文，省略时为 None
    pub text: Option<String>,
    pub ty: ReceiverType,
    pub source: ReceiverSource,
    /// 字段上的 @Qualifier / @Resource(name)
    pub qualifier: Option<String>,
}

impl Receiver {
    pub fn fqn(&self) -> Option<&str> {
        match &self.ty {
            ReceiverType::Resolved(fqn) => Some(fqn),
            _ => None,
        }
    }

    /// 类型简单名 (已解析或仅知声明名)
    pub fn type_simple_name(&self) -> Option<&str> {
        match &self.ty {
            ReceiverType::Resolved(fqn) => fqn.rsplit('.').next(),
            ReceiverType::Unresolved(simple) => Some(simple),
            ReceiverType::Unknown => None,
        }
    }

    /// 调用图中的被调方签名
    pub fn callee(&self, method: &str) -> MethodSig {
        match &self.ty {
            ReceiverType::Resolved(fqn) => MethodSig::new(fqn, method),
            ReceiverType::Unresolved(simple) => MethodSig::unresolved(simple, method),
            ReceiverType::Unknown => MethodSig::unresolved(self.text.as_deref().unwrap_or("?"), method),
        }
    }
}

/// 单文件内的调用点接收者解析，规则与调用图提取共用
pub struct ReceiverResolver<'a> {
    file: &'a ParsedFile,
    imports: &'a ImportIndex,
    symbols: &'a SymbolTable,
}

const LOCAL_DECLARATIONS: &[&str] = &[
    "local_variable_declaration",
    "formal_parameter",
    "enhanced_for_statement",
    "resource",
];

impl<'a> ReceiverResolver<'a> {
    pub fn new(file: &'a ParsedFile, imports: &'a ImportIndex, symbols: &'a SymbolTable) -> Self {
        Self { file, imports, symbols }
    }

    pub fn resolve(&self, call: Node<'_>) -> Receiver {
        let Some(object) = call.child_by_field_name("object") else {
            return self.enclosing_class(call, None);
        };
        let text = self.file.text(object).to_string();

        match object.kind() {
            "this" => self.enclosing_class(call, Some(text)),
            "field_access" => {
                let is_this = object
                    .child_by_field_name("object")
                    .is_some_and(|o| o.kind() == "this");
                match object.child_by_field_name("field") {
                    Some(field) if is_this => {
                        let name = self.file.text(field);
                        self.field_receiver(call, name, text.clone())
                            .unwrap_or_else(|| self.unknown(text, ReceiverSource::Field))
                    }
                    _ => self.unknown(text, ReceiverSource::Expression),
                }
            }
            "identifier" => {
                if let Some(raw) = self.declared_type(&text, call) {
                    return Receiver {
                        ty: self.resolve_type_name(&raw),
                        text: Some(text),
                        source: ReceiverSource::Local,
                        qualifier: None,
                    };
                }
                if let Some(receiver) = self.field_receiver(call, &text, text.clone()) {
                    return receiver;
                }
                if text.starts_with(|c: char| c.is_ascii_uppercase()) {
                    return Receiver {
                        ty: self.resolve_type_name(&text),
                        text: Some(text),
                        source: ReceiverSource::StaticType,
                        qualifier: None,
                    };
                }
                self.unknown(text, ReceiverSource::Expression)
            }
            "object_creation_expression" => match object.child_by_field_name("type") {
                Some(ty) => Receiver {
                    ty: self.resolve_type_name(self.file.text(ty)),
                    text: Some(text),
                    source: ReceiverSource::Constructor,
                    qualifier: None,
                },
                None => self.unknown(text, ReceiverSource::Constructor),
            },
            "cast_expression" => match object.child_by_field_name("type") {
                Some(ty) => Receiver {
                    ty: self.resolve_type_name(self.file.text(ty)),
                    text: Some(text),
                    source: ReceiverSource::Expression,
                    qualifier: None,
                },
                None => self.unknown(text, ReceiverSource::Expression),
            },
            _ => self.unknown(text, ReceiverSource::Expression),
        }
    }

    fn unknown(&self, text: String, source: ReceiverSource) -> Receiver {
        Receiver {
            text: Some(text),
            ty: ReceiverType::Unknown,
            source,
            qualifier: None,
        }
    }

    fn enclosing_class(&self, call: Node<'_>, text: Option<String>) -> Receiver {
        let ty = match self.file.enclosing_class_fqn(call, self.imports) {
            Some(fqn) => ReceiverType::Resolved(fqn),
            None => ReceiverType::Unknown,
        };
        Receiver {
            text,
            ty,
            source: ReceiverSource::EnclosingClass,
            qualifier: None,
        }
    }

    fn field_receiver(&self, call: Node<'_>, field: &str, text: String) -> Option<Receiver> {
        let class_fqn = self.file.enclosing_class_fqn(call, self.imports)?;
        let binding = self.symbols.field(&class_fqn, field)?;
        let ty = match self.symbols.resolve_field_type_fqn(&class_fqn, field, self.imports) {
            Some(fqn) => ReceiverType::Resolved(fqn),
            None => ReceiverType::Unresolved(binding.type_name.clone()),
        };
        Some(Receiver {
            text: Some(text),
            ty,
            source: ReceiverSource::Field,
            qualifier: binding.qualifier.clone(),
        })
    }

    /// 声明类型原文 → ReceiverType
    pub fn resolve_type_name(&self, raw: &str) -> ReceiverType {
        let normalized = normalize_type_name(raw);
        if normalized.is_empty() || normalized == "var" {
            return ReceiverType::Unknown;
        }
        match self.imports.resolve_type(&normalized, self.symbols) {
            Some(fqn) => ReceiverType::Resolved(fqn),
            None => ReceiverType::Unresolved(normalized),
        }
    }

    /// 方法内位于 `at` 之前、离它最近的局部声明 (局部变量/参数/for-each 变量/资源)
    ///
    /// `var x = new T()` 返回 `T`；方法外的节点返回 None。
    pub fn declared_type(&self, name: &str, at: Node<'_>) -> Option<String> {
        let method = enclosing_method(at)?;
        let mut best: Option<(usize, String)> = None;

        for decl in descendants(method, LOCAL_DECLARATIONS) {
            if decl.start_byte() > at.start_byte() {
                continue;
            }
            let Some(ty) = self.declared_type_in(decl, name) else {
                continue;
            };
            if best.as_ref().map_or(true, |(pos, _)| decl.start_byte() >= *pos) {
                best = Some((decl.start_byte(), ty));
            }
        }
        best.map(|(_, ty)| ty)
    }

    fn declared_type_in(&self, decl: Node<'_>, name: &str) -> Option<String> {
        let ty = decl.child_by_field_name("type")?;
        let ty_text = self.file.text(ty);

        if decl.kind() == "local_variable_declaration" {
            let mut cursor = decl.walk();
            let declarator = decl
                .children_by_field_name("declarator", &mut cursor)
                .find(|d| {
                    d.child_by_field_name("name")
                        .is_some_and(|n| self.file.text(n) == name)
                })?;
            if ty_text == "var" {
                let inferred = declarator
                    .child_by_field_name("value")
                    .filter(|v| v.kind() == "object_creation_expression")
                    .and_then(|v| v.child_by_field_name("type"))
                    .map(|t| self.file.text(t).to_string());
                return Some(inferred.unwrap_or_else(|| "var".to_string()));
            }
            return Some(ty_text.to_string());
        }

        let declared = decl.child_by_field_name("name")?;
        (self.file.text(declared) == name).then(|| ty_text.to_string())
    }
}

// ============================================================================
// Phase 1b: 调用点提取
// ============================================================================

/// 提取单文件内所有方法调用边
pub fn extract_call_graph(
    file: &ParsedFile,
    imports: &ImportIndex,
    symbols: &SymbolTable,
    queries: &JavaQueries,
) -> CallGraph {
    let resolver = ReceiverResolver::new(file, imports, symbols);
    let mut graph = CallGraph::new();

    // 父类型按本文件的 import 解析，同名但不同包的接口不会串在一起
    for (path, _) in declared_types(file) {
        let fqn = imports.qualify(&path);
        let Some(info) = symbols.lookup_by_fqn(&fqn) else {
            continue;
        };
        for super_type in &info.super_types {
            if let Some(super_fqn) = resolve_super_type(super_type, imports, symbols) {
                graph.add_implementation(super_fqn, fqn.clone());
            }
        }
    }

    for row in file.query(&queries.invocation, &["call", "name"]) {
        let (Some(call), Some(name)) = (row.get(0), row.get(1)) else {
            continue;
        };
        let Some(method) = enclosing_method(call) else {
            continue;
        };
        let Some(class_fqn) = file.enclosing_class_fqn(call, imports) else {
            continue;
        };

        let caller = MethodSig::new(&class_fqn, &file.method_name(method));
        let method_name = file.text(name);
        let receiver = resolver.resolve(call);
        graph.add_edge(caller.clone(), receiver.callee(method_name));

        // @Qualifier 指定了具体实现时直接连到实现类
        if let (Some(qualifier), Some(fqn)) = (&receiver.qualifier, receiver.fqn()) {
            let target = symbols
                .implementations_of(fqn)
                .into_iter()
                .find(|info| info.bean_name.as_deref() == Some(qualifier.as_str()));
            if let Some(info) = target {
                graph.add_edge(caller, MethodSig::new(&info.fqn, method_name));
            }
        }
    }

    graph
}

/// 父类型原文 → FQN
///
/// 先走 import 规则。都不命中且没有通配导入时，才接受全局唯一的简单名；
/// 同名多包视为歧义，不连接。
pub fn resolve_super_type(raw: &str, imports: &ImportIndex, symbols: &SymbolTable) -> Option<String> {
    if let Some(fqn) = imports.resolve_type(raw, symbols) {
        return Some(fqn);
    }
    if !imports.wildcard_packages().is_empty() {
        return None;
    }
    let simple = raw.rsplit('.').next().unwrap_or(raw);
    match symbols.resolve_simple_name(simple, imports.package()) {
        Resolution::Unique(fqn) => Some(fqn),
        Resolution::Ambiguous(candidates) => {
            debug!("Ambiguous super type {raw}: {}", candidates.join(", "));
            None
        }
        Resolution::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tree_sitter_java::index_file;

    fn layered_graph() -> CallGraph {
        let mut graph = CallGraph::new();
        graph.class_layers.insert("com.a.web.UserController".into(), LayerType::Controller);
        graph.class_layers.insert("com.a.svc.UserService".into(), LayerType::Service);
        graph.class_layers.insert("com.a.repo.UserRepository".into(), LayerType::Repository);

        graph.add_edge(
            MethodSig::new("com.a.web.UserController", "list"),
            MethodSig::new("com.a.svc.UserService", "findAll"),
        );
        graph.add_edge(
            MethodSig::new("com.a.svc.UserService", "findAll"),
            MethodSig::new("com.a.repo.UserRepository", "findById"),
        );
        graph
    }

    #[test]
    fn test_trace_controller_to_repository_across_packages() {
        let graph = layered_graph();
        let path = graph
            .trace_to_layer(&MethodSig::new("com.a.web.UserController", "list"), LayerType::Repository)
            .unwrap();

        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "UserController.list → UserService.findAll → UserRepository.findById");
    }

    #[test]
    fn test_trace_start_already_in_layer() {
        let graph = layered_graph();
        let start = MethodSig::new("com.a.repo.UserRepository", "findById");
        assert_eq!(graph.trace_to_layer(&start, LayerType::Repository), Some(CallPath(vec![start])));
    }

    #[test]
    fn test_trace_steps_through_interface_dispatch() {
        let mut graph = CallGraph::new();
        graph.class_layers.insert("com.a.svc.UserApi".into(), LayerType::Other);
        graph.class_layers.insert("com.a.svc.UserApiImpl".into(), LayerType::Service);
        graph.class_layers.insert("com.a.repo.UserMapper".into(), LayerType::Mapper);
        graph.implementations.insert(
            "com.a.svc.UserApi".into(),
            BTreeSet::from(["com.a.svc.UserApiImpl".to_string()]),
        );
        graph.add_edge(
            MethodSig::new("com.a.svc.UserApiImpl", "load"),
            MethodSig::new("com.a.repo.UserMapper", "selectById"),
        );

        let path = graph
            .trace_to_layer(&MethodSig::new("com.a.svc.UserApi", "load"), LayerType::Mapper)
            .unwrap();
        assert_eq!(path.target(), Some(&MethodSig::new("com.a.repo.UserMapper", "selectById")));
    }

    #[test]
    fn test_unresolved_edges_do_not_reach_layers() {
        let mut graph = CallGraph::new();
        graph.class_layers.insert("UNRESOLVED:UserRepository".into(), LayerType::Repository);
        let start = MethodSig::new("com.a.svc.UserService", "run");
        graph.add_edge(start.clone(), MethodSig::unresolved("UserRepository", "findAll"));

        assert_eq!(graph.trace_to_layer(&start, LayerType::Repository), None);
        assert_eq!(graph.unresolved_edge_count(), 1);
        assert!(!MethodSig::new("Foo", "bar").is_resolved());
    }

    fn project_graph(sources: &[(&str, &str)]) -> CallGraph {
        let queries = JavaQueries::compile().unwrap();
        let files: Vec<ParsedFile> = sources
            .iter()
            .map(|(name, code)| ParsedFile::from_source(name, code).unwrap())
            .collect();
        let indexes: Vec<_> = files.iter().map(index_file).collect();
        let symbols = indexes
            .iter()
            .fold(SymbolTable::new(), |acc, index| acc.merge(index.symbols.clone()));

        let mut graph = files.iter().zip(&indexes).fold(CallGraph::new(), |acc, (file, index)| {
            acc.merge(extract_call_graph(file, &index.imports, &symbols, &queries))
        });
        graph.register_layers(&symbols);
        graph
    }

    #[test]
    fn test_same_named_interfaces_in_different_packages_stay_apart() {
        let graph = project_graph(&[
            ("a/PayApi.java", "package a; public interface PayApi { void load(); }"),
            ("a/Alipay.java", "package a; public class Alipay implements PayApi { public void load() {} }"),
            ("b/PayApi.java", "package b; public interface PayApi { void load(); }"),
            ("b/Wechat.java", "package b; public class Wechat implements PayApi { public void load() {} }"),
            (
                "c/Checkout.java",
                "package c; import a.PayApi; public class Checkout implements PayApi, b.PayApi { public void load() {} }",
            ),
        ]);

        let a: Vec<&str> = graph.implementations_of("a.PayApi").map(String::as_str).collect();
        assert_eq!(a, vec!["a.Alipay", "c.Checkout"]);
        let b: Vec<&str> = graph.implementations_of("b.PayApi").map(String::as_str).collect();
        assert_eq!(b, vec!["b.Wechat", "c.Checkout"]);
    }

    #[test]
    fn test_ambiguous_super_type_is_not_wired() {
        let graph = project_graph(&[
            ("a/PayApi.java", "package a; public interface PayApi { void load(); }"),
            ("b/PayApi.java", "package b; public interface PayApi { void load(); }"),
            ("c/Legacy.java", "package c; public class Legacy implements PayApi { public void load() {} }"),
        ]);
        assert_eq!(graph.implementations_of("a.PayApi").count(), 0);
        assert_eq!(graph.implementations_of("b.PayApi").count(), 0);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = CallGraph::new();
        a.add_edge(MethodSig::new("x.A", "a"), MethodSig::new("x.B", "b"));
        let mut b = CallGraph::new();
        b.add_edge(MethodSig::new("x.B", "b"), MethodSig::new("x.C", "c"));
        b.add_edge(MethodSig::new("x.A", "a"), MethodSig::new("x.C", "c"));

        let ab = a.clone().merge(b.clone());
        assert_eq!(ab, b.merge(a));
        assert_eq!(ab.edge_count(), 3);
        assert_eq!(ab.callers(&MethodSig::new("x.C", "c")).count(), 2);
    }

    const SERVICE: &str = r#"
package com.example.service;

import com.example.repository.OrderRepository;

public class OrderService {
    private OrderRepository orderRepository;
    private Helper helper;

    public void process(List<Long> ids) {
        orderRepository.findAll();
        this.orderRepository.count();
        for (Long id : ids) {
            String orderRepository = "shadow";
            orderRepository.length();
        }
        var local = new StringBuilder();
        local.append("x");
        Collections.emptyList();
        helper.help();
        validate();
    }

    private void validate() {}
}
"#;

    fn receivers() -> Vec<(String, Receiver)> {
        let file = ParsedFile::from_source("OrderService.java", SERVICE).unwrap();
        let index = index_file(&file);
        let queries = JavaQueries::compile().unwrap();
        let resolver = ReceiverResolver::new(&file, &index.imports, &index.symbols);
        file.query(&queries.invocation, &["call", "name"])
            .iter()
            .map(|row| {
                let name = file.text(row.get(1).unwrap()).to_string();
                (name, resolver.resolve(row.get(0).unwrap()))
            })
            .collect()
    }

    fn receiver_of(name: &str) -> Receiver {
        receivers()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
            .unwrap()
    }

    #[test]
    fn test_field_and_this_field_resolve_through_imports() {
        let find_all = receiver_of("findAll");
        assert_eq!(find_all.fqn(), Some("com.example.repository.OrderRepository"));
        assert_eq!(find_all.source, ReceiverSource::Field);

        let count = receiver_of("count");
        assert_eq!(count.fqn(), Some("com.example.repository.OrderRepository"));
    }

    #[test]
    fn test_local_shadows_field() {
        let length = receiver_of("length");
        assert_eq!(length.source, ReceiverSource::Local);
        assert_eq!(length.fqn(), Some("java.lang.String"));
    }

    #[test]
    fn test_var_with_constructor_and_static_type() {
        assert_eq!(receiver_of("append").fqn(), Some("java.lang.StringBuilder"));
        let empty = receiver_of("emptyList");
        assert_eq!(empty.source, ReceiverSource::StaticType);
        assert_eq!(empty.ty, ReceiverType::Unresolved("Collections".into()));
    }

    #[test]
    fn test_unresolved_field_and_implicit_this() {
        assert_eq!(receiver_of("help").ty, ReceiverType::Unresolved("Helper".into()));
        let validate = receiver_of("validate");
        assert_eq!(validate.source, ReceiverSource::EnclosingClass);
        assert_eq!(validate.fqn(), Some("com.example.service.OrderService"));
    }

    #[test]
    fn test_extract_call_graph_edges() {
        let file = ParsedFile::from_source("OrderService.java", SERVICE).unwrap();
        let index = index_file(&file);
        let queries = JavaQueries::compile().unwrap();
        let graph = extract_call_graph(&file, &index.imports, &index.symbols, &queries);

        let caller = MethodSig::new("com.example.service.OrderService", "process");
        let callees: Vec<String> = graph.callees(&caller).map(|c| c.to_string()).collect();
        assert!(callees.contains(&"OrderRepository.findAll".to_string()));
        assert!(callees.contains(&"OrderService.validate".to_string()));
        assert!(graph.callees(&caller).any(|c| *c == MethodSig::unresolved("Helper", "help")));
    }
}
