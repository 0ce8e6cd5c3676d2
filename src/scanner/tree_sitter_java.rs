use std::cell::RefCell;
use std::path::{Path, PathBuf};

use tree_sitter::{Language, Node, Parser, Query, QueryCursor, Tree};

use crate::error::{Result, ScanError};
use crate::import_index::ImportIndex;
use crate::symbol_table::{normalize_type_name, SymbolTable, TypeInfo, TypeKind, VarBinding};

// ============================================================================
// P0 优化: thread_local Parser 复用
// ============================================================================
//
// Parser::new() 和 set_language() 涉及 native 层初始化和内存分配。
// 使用 thread_local 确保每个 rayon 工作线程只初始化一次 Parser。
//
// ============================================================================

thread_local! {
    /// 线程本地 Parser 实例 (避免重复创建)
    static JAVA_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

pub fn java_language() -> Language {
    tree_sitter_java::language()
}

/// 获取或初始化线程本地 Parser
fn with_parser<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut Parser) -> Result<R>,
{
    JAVA_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();

        // 懒初始化 Parser
        if slot.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&java_language())
                .map_err(|e| ScanError::Parser(format!("Failed to set language: {e}")))?;
            *slot = Some(parser);
        }

        match slot.as_mut() {
            Some(parser) => f(parser),
            None => Err(ScanError::Parser("parser not initialised".to_string())),
        }
    })
}

pub const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
];

pub const LOOP_KINDS: &[&str] = &[
    "for_statement",
    "enhanced_for_statement",
    "while_statement",
    "do_statement",
];

pub const METHOD_KINDS: &[&str] = &["method_declaration", "constructor_declaration"];

/// Stream 上对每个元素执行一次 lambda 的中间操作
const STREAM_STAGES: &[&str] = &["map", "flatMap", "peek"];

/// 向上查找时不跨越的节点
const SCOPE_BOUNDARIES: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "class_body",
    "interface_body",
    "enum_body",
    "static_initializer",
];

// ============================================================================
// 预编译查询
// ============================================================================

const INVOCATION_QUERY: &str = r#"
    (method_invocation
        name: (identifier) @name
    ) @call
"#;

const LOOP_QUERY: &str = r#"
    [
        (for_statement)
        (enhanced_for_statement)
        (while_statement)
        (do_statement)
    ] @loop
"#;

const SYNC_METHOD_QUERY: &str = r#"
    (method_declaration
        (modifiers) @mods
        name: (identifier) @name
    ) @method
"#;

const THREADLOCAL_SET_QUERY: &str = r#"
    (method_invocation
        object: [(identifier) (field_access)] @var
        name: (identifier) @method
        (#eq? @method "set")
    ) @set_call
"#;

const SLEEP_QUERY: &str = r#"
    (method_invocation
        object: (_) @target
        name: (identifier) @method
        (#eq? @method "sleep")
    ) @call
"#;

const LOCK_QUERY: &str = r#"
    (method_invocation
        object: (_) @lock_var
        name: (identifier) @method
        arguments: (argument_list) @args
        (#eq? @method "lock")
    ) @lock_call
"#;

const BLOCK_QUERY: &str = r#"
    (method_invocation
        name: (identifier) @method
        (#match? @method "^block(First|Last)?$")
    ) @call
"#;

const AUTOWIRED_FIELD_QUERY: &str = r#"
    (field_declaration
        (modifiers
            [
                (marker_annotation name: (identifier) @ann)
                (annotation name: (identifier) @ann)
            ]
        )
        declarator: (variable_declarator name: (identifier) @name)
        (#eq? @ann "Autowired")
    ) @field
"#;

const COMPOUND_ASSIGN_QUERY: &str = r#"
    (assignment_expression
        left: (_) @var
        operator: "+="
        right: (_) @value
    ) @assign
"#;

const CATCH_QUERY: &str = r#"
    (catch_clause
        body: (block) @body
    ) @catch
"#;

const FINALIZE_QUERY: &str = r#"
    (method_declaration
        name: (identifier) @name
        parameters: (formal_parameters) @params
        (#eq? @name "finalize")
    ) @method
"#;

const REACTIVE_CALL_QUERY: &str = r#"
    (method_invocation
        name: (identifier) @method
        arguments: (argument_list) @args
        (#match? @method "^(subscribe|collectList)$")
    ) @call
"#;

/// 全部查询在启动时编译一次，扫描期间只读共享
pub struct JavaQueries {
    pub invocation: Query,
    pub loops: Query,
    pub sync_method: Query,
    pub threadlocal_set: Query,
    pub sleep: Query,
    pub lock: Query,
    pub block: Query,
    pub autowired_field: Query,
    pub compound_assign: Query,
    pub catch_clause: Query,
    pub finalize: Query,
    pub reactive_call: Query,
}

impl JavaQueries {
    pub fn compile() -> Result<Self> {
        let language = java_language();
        let compile = |name: &'static str, source: &str| {
            Query::new(&language, source).map_err(|e| ScanError::Query {
                name,
                message: e.to_string(),
            })
        };

        Ok(Self {
            invocation: compile("invocation", INVOCATION_QUERY)?,
            loops: compile("loops", LOOP_QUERY)?,
            sync_method: compile("sync_method", SYNC_METHOD_QUERY)?,
            threadlocal_set: compile("threadlocal_set", THREADLOCAL_SET_QUERY)?,
            sleep: compile("sleep", SLEEP_QUERY)?,
            lock: compile("lock", LOCK_QUERY)?,
            block: compile("block", BLOCK_QUERY)?,
            autowired_field: compile("autowired_field", AUTOWIRED_FIELD_QUERY)?,
            compound_assign: compile("compound_assign", COMPOUND_ASSIGN_QUERY)?,
            catch_clause: compile("catch_clause", CATCH_QUERY)?,
            finalize: compile("finalize", FINALIZE_QUERY)?,
            reactive_call: compile("reactive_call", REACTIVE_CALL_QUERY)?,
        })
    }
}

/// 一次匹配中按名称顺序取出的捕获节点
pub struct QueryRow<'t>(Vec<Option<Node<'t>>>);

impl<'t> QueryRow<'t> {
    pub fn get(&self, position: usize) -> Option<Node<'t>> {
        self.0.get(position).copied().flatten()
    }
}

// ============================================================================
// 解析结果
// ============================================================================

/// 一个已解析的 Java 源文件
pub struct ParsedFile {
    pub path: PathBuf,
    /// 相对扫描根目录的路径，`/` 分隔，用于报告
    pub rel_path: String,
    pub source: String,
    pub tree: Tree,
}

impl ParsedFile {
    /// 使用线程本地 Parser 解析源码
    pub fn parse(path: &Path, rel_path: &str, source: String) -> Result<Self> {
        let tree = with_parser(|parser| {
            parser
                .parse(&source, None)
                .ok_or_else(|| ScanError::Parser(format!("Failed to parse {rel_path}")))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            rel_path: rel_path.to_string(),
            source,
            tree,
        })
    }

    /// 内存中的源码 (测试与单文件分析)
    pub fn from_source(rel_path: &str, source: &str) -> Result<Self> {
        Self::parse(Path::new(rel_path), rel_path, source.to_string())
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text<'a>(&'a self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// 第一个语法错误所在行 (ERROR / MISSING 节点)
    pub fn first_error_line(&self) -> Option<usize> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.is_error() || node.is_missing() {
                return Some(line_of(node));
            }
            if node.has_error() {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
        Some(1)
    }

    /// 执行查询，按 `names` 顺序返回每次匹配的捕获
    pub fn query<'t>(&'t self, query: &Query, names: &[&str]) -> Vec<QueryRow<'t>> {
        let indices: Vec<Option<u32>> = names.iter().map(|n| query.capture_index_for_name(n)).collect();
        let mut cursor = QueryCursor::new();
        let mut rows = Vec::new();

        for m in cursor.matches(query, self.root(), self.source.as_bytes()) {
            let nodes = indices
                .iter()
                .map(|idx| {
                    idx.and_then(|i| m.captures.iter().find(|c| c.index == i).map(|c| c.node))
                })
                .collect();
            rows.push(QueryRow(nodes));
        }
        rows
    }

    /// 节点所在类的 FQN (嵌套类为 `pkg.Outer.Inner`)
    pub fn enclosing_class_fqn(&self, node: Node<'_>, imports: &ImportIndex) -> Option<String> {
        let mut names = Vec::new();
        let mut current = node.parent();
        while let Some(n) = current {
            if TYPE_DECLARATIONS.contains(&n.kind()) {
                if let Some(name) = n.child_by_field_name("name") {
                    names.push(self.text(name));
                }
            }
            current = n.parent();
        }
        if names.is_empty() {
            return None;
        }
        names.reverse();
        Some(imports.qualify(&names.join(".")))
    }

    /// 方法名，构造器统一为 `<init>`
    pub fn method_name(&self, method: Node<'_>) -> String {
        if method.kind() == "constructor_declaration" {
            return "<init>".to_string();
        }
        method
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default()
    }

    /// 节点所在循环体对应的循环 (位于循环头的表达式不算)
    pub fn enclosing_loop<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        let mut current = node.parent();
        while let Some(n) = current {
            let kind = n.kind();
            if SCOPE_BOUNDARIES.contains(&kind) {
                return None;
            }
            if LOOP_KINDS.contains(&kind) {
                if let Some(body) = n.child_by_field_name("body") {
                    if contains(body, node) {
                        return Some(n);
                    }
                }
            }
            if kind == "lambda_expression" && self.is_iterating_lambda(n) {
                return Some(n);
            }
            current = n.parent();
        }
        None
    }

    /// `forEach` 的 lambda 总算循环；`map`/`flatMap`/`peek` 只在 Stream 链上才算
    fn is_iterating_lambda(&self, lambda: Node<'_>) -> bool {
        let Some(call) = lambda
            .parent()
            .filter(|p| p.kind() == "argument_list")
            .and_then(|p| p.parent())
            .filter(|call| call.kind() == "method_invocation")
        else {
            return false;
        };
        let Some(name) = call.child_by_field_name("name").map(|n| self.text(n)) else {
            return false;
        };
        name == "forEach" || (STREAM_STAGES.contains(&name) && self.is_stream_chain(call))
    }

    /// 接收者链上有 `stream()`/`parallelStream()`，或以 `XxxStream.` 开头
    fn is_stream_chain(&self, call: Node<'_>) -> bool {
        let mut current = call.child_by_field_name("object");
        while let Some(node) = current {
            match node.kind() {
                "method_invocation" => {
                    let name = node.child_by_field_name("name").map(|n| self.text(n));
                    if matches!(name, Some("stream" | "parallelStream")) {
                        return true;
                    }
                    current = node.child_by_field_name("object");
                }
                "identifier" => return self.text(node).ends_with("Stream"),
                _ => return false,
            }
        }
        false
    }

    /// 调用节点的接收者文本与方法名
    pub fn call_parts(&self, call: Node<'_>) -> (Option<String>, String) {
        let receiver = call.child_by_field_name("object").map(|o| self.text(o).to_string());
        let name = call
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        (receiver, name)
    }

    /// 方法内是否存在 `receiver.method()` 调用，可选只看 finally 块
    pub fn has_call_on(&self, scope: Node<'_>, receiver: &str, method: &str) -> bool {
        descendants(scope, &["method_invocation"]).into_iter().any(|call| {
            let (obj, name) = self.call_parts(call);
            name == method && obj.as_deref() == Some(receiver)
        })
    }
}

// ============================================================================
// 节点工具函数
// ============================================================================

pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn contains(outer: Node<'_>, inner: Node<'_>) -> bool {
    outer.start_byte() <= inner.start_byte() && inner.end_byte() <= outer.end_byte()
}

/// 先序遍历，返回指定类型的所有具名后代 (含自身)
pub fn descendants<'t>(node: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if kinds.contains(&current.kind()) {
            found.push(current);
        }
        let mut cursor = current.walk();
        let children: Vec<Node<'t>> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

/// 最近的指定类型祖先
pub fn ancestor<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(n) = current {
        if kinds.contains(&n.kind()) {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

pub fn enclosing_method(node: Node<'_>) -> Option<Node<'_>> {
    ancestor(node, METHOD_KINDS)
}

pub fn first_named_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn unquote(literal: &str) -> String {
    literal.trim().trim_matches('"').to_string()
}

/// 声明上的注解: (名称, 第一个字符串参数)
pub fn annotations_of(file: &ParsedFile, declaration: Node<'_>) -> Vec<(String, Option<String>)> {
    let Some(modifiers) = first_named_child(declaration, "modifiers") else {
        return Vec::new();
    };
    let mut cursor = modifiers.walk();
    let annotations: Vec<Node> = modifiers
        .named_children(&mut cursor)
        .filter(|c| matches!(c.kind(), "marker_annotation" | "annotation"))
        .collect();

    annotations
        .into_iter()
        .filter_map(|ann| {
            let name = ann.child_by_field_name("name")?;
            let name = file.text(name);
            let simple = name.rsplit('.').next().unwrap_or(name).to_string();
            let value = ann
                .child_by_field_name("arguments")
                .and_then(|args| descendants(args, &["string_literal"]).into_iter().next())
                .map(|lit| unquote(file.text(lit)));
            Some((simple, value))
        })
        .collect()
}

// ============================================================================
// Phase 1: 结构提取 (包、import、类型、字段)
// ============================================================================

/// 单个文件的索引片段
pub struct FileIndex {
    pub imports: ImportIndex,
    pub symbols: SymbolTable,
}

pub fn index_file(file: &ParsedFile) -> FileIndex {
    let root = file.root();
    let mut package = None;
    let mut import_names = Vec::new();

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "package_declaration" => {
                package = child
                    .named_children(&mut child.walk())
                    .find(|c| matches!(c.kind(), "identifier" | "scoped_identifier"))
                    .map(|n| file.text(n).to_string());
            }
            "import_declaration" => {
                if let Some(import) = import_name(file, child) {
                    import_names.push(import);
                }
            }
            _ => {}
        }
    }

    let types = declared_types(file);

    let imports = ImportIndex::build(
        package.as_deref(),
        &import_names,
        types.iter().map(|(path, _)| path.as_str()),
    );

    let mut symbols = SymbolTable::new();
    for (path, node) in &types {
        let fqn = imports.qualify(path);
        let mut info = type_info(file, *node, &fqn);
        info.package = package.clone();
        symbols.register_class(&fqn, info);

        for binding in field_bindings(file, *node) {
            symbols.register_field(&fqn, binding);
        }
    }

    FileIndex { imports, symbols }
}

/// 文件中声明的全部类型 (含嵌套类型)，路径形如 `Outer.Inner`
pub fn declared_types(file: &ParsedFile) -> Vec<(String, Node<'_>)> {
    let root = file.root();
    let mut cursor = root.walk();
    let top_level: Vec<Node> = root
        .named_children(&mut cursor)
        .filter(|c| TYPE_DECLARATIONS.contains(&c.kind()))
        .collect();

    let mut types = Vec::new();
    for decl in top_level {
        collect_types(file, decl, None, &mut types);
    }
    types
}

/// `import a.b.C;` → `a.b.C`，`import a.b.*;` → `a.b.*`，静态导入忽略
fn import_name(file: &ParsedFile, import: Node<'_>) -> Option<String> {
    let mut cursor = import.walk();
    let children: Vec<Node> = import.children(&mut cursor).collect();
    if children.iter().any(|c| c.kind() == "static") {
        return None;
    }
    let name = children
        .iter()
        .find(|c| matches!(c.kind(), "identifier" | "scoped_identifier"))?;
    let name = file.text(*name);
    if children.iter().any(|c| c.kind() == "asterisk") {
        Some(format!("{name}.*"))
    } else {
        Some(name.to_string())
    }
}

fn collect_types<'t>(file: &ParsedFile, decl: Node<'t>, outer: Option<&str>, out: &mut Vec<(String, Node<'t>)>) {
    let Some(name) = decl.child_by_field_name("name") else {
        return;
    };
    let path = match outer {
        Some(o) => format!("{o}.{}", file.text(name)),
        None => file.text(name).to_string(),
    };
    out.push((path.clone(), decl));

    for member in body_members(decl) {
        if TYPE_DECLARATIONS.contains(&member.kind()) {
            collect_types(file, member, Some(&path), out);
        }
    }
}

/// 类体成员 (enum 体内的声明区也展开)
fn body_members(decl: Node<'_>) -> Vec<Node<'_>> {
    let Some(body) = decl.child_by_field_name("body") else {
        return Vec::new();
    };
    let mut members = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if child.kind() == "enum_body_declarations" {
            let mut inner = child.walk();
            members.extend(child.named_children(&mut inner));
        } else {
            members.push(child);
        }
    }
    members
}

fn type_info(file: &ParsedFile, decl: Node<'_>, fqn: &str) -> TypeInfo {
    let name = decl
        .child_by_field_name("name")
        .map(|n| file.text(n).to_string())
        .unwrap_or_default();
    let kind = match decl.kind() {
        "interface_declaration" => TypeKind::Interface,
        "enum_declaration" => TypeKind::Enum,
        _ => TypeKind::Class,
    };
    let mut info = TypeInfo::new(&name, fqn, kind, file.path.clone(), line_of(decl));

    for (annotation, value) in annotations_of(file, decl) {
        info.add_annotation(&annotation, value.as_deref());
    }

    let mut cursor = decl.walk();
    for child in decl.named_children(&mut cursor) {
        match child.kind() {
            "superclass" => {
                if let Some(ty) = child.named_child(0) {
                    info.add_super_type(&normalize_type_name(file.text(ty)));
                }
            }
            "super_interfaces" | "extends_interfaces" => {
                if let Some(list) = first_named_child(child, "type_list") {
                    let mut list_cursor = list.walk();
                    for ty in list.named_children(&mut list_cursor) {
                        info.add_super_type(&normalize_type_name(file.text(ty)));
                    }
                }
            }
            _ => {}
        }
    }

    info.classify();
    info
}

fn field_bindings(file: &ParsedFile, decl: Node<'_>) -> Vec<VarBinding> {
    let mut bindings = Vec::new();
    for member in body_members(decl) {
        if member.kind() != "field_declaration" {
            continue;
        }
        let Some(ty) = member.child_by_field_name("type") else {
            continue;
        };
        let annotations = annotations_of(file, member);
        let qualifier = annotations
            .iter()
            .find(|(name, _)| name == "Qualifier" || name == "Resource")
            .and_then(|(_, value)| value.clone());

        let mut cursor = member.walk();
        for declarator in member.children_by_field_name("declarator", &mut cursor) {
            let Some(name) = declarator.child_by_field_name("name") else {
                continue;
            };
            let mut binding = VarBinding::new(file.text(name), file.text(ty), line_of(declarator))
                .with_qualifier(qualifier.clone());
            binding.annotations = annotations.iter().map(|(n, _)| n.clone()).collect();
            bindings.push(binding);
        }
    }
    bindings
}
