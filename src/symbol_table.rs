// ============================================================================
// 符号表模块 - 全局类型与字段绑定
// ============================================================================
//
// Phase 1 每个文件独立产出一个 SymbolTable 片段，随后并行 reduce 合并。
// merge 对相同 key 取 Ord 较小者，保证合并与顺序无关 (交换律 + 结合律)。
// Phase 2 只读。
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::import_index::{ClassLookup, ImportIndex};

/// 代码层级类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Controller,
    Service,
    Repository,
    Mapper,
    Other,
}

impl LayerType {
    /// 从注解名称推断层级
    pub fn from_annotation(annotation: &str) -> Option<Self> {
        match annotation {
            "Controller" | "RestController" => Some(LayerType::Controller),
            "Service" => Some(LayerType::Service),
            "Repository" => Some(LayerType::Repository),
            "Mapper" => Some(LayerType::Mapper),
            _ => None,
        }
    }

    /// 从父类型推断 (Spring Data / MyBatis-Plus)
    fn from_super_type(super_type: &str) -> Option<Self> {
        let simple = super_type.rsplit('.').next().unwrap_or(super_type);
        match simple {
            "JpaRepository" | "CrudRepository" | "PagingAndSortingRepository" | "MongoRepository"
            | "ReactiveCrudRepository" | "R2dbcRepository" | "Repository" => Some(LayerType::Repository),
            "BaseMapper" => Some(LayerType::Mapper),
            _ => None,
        }
    }

    /// 从类名后缀推断
    fn from_name(name: &str) -> Option<Self> {
        if name.ends_with("Controller") {
            Some(LayerType::Controller)
        } else if name.ends_with("Service") || name.ends_with("ServiceImpl") {
            Some(LayerType::Service)
        } else if name.ends_with("Repository") || name.ends_with("Dao") || name.ends_with("DAO") {
            Some(LayerType::Repository)
        } else if name.ends_with("Mapper") {
            Some(LayerType::Mapper)
        } else {
            None
        }
    }

    /// 是否是数据访问层
    pub fn is_data_access(&self) -> bool {
        matches!(self, LayerType::Repository | LayerType::Mapper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

/// 类型信息
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,               // "UserRepository"
    pub fqn: String,                // "com.example.repository.UserRepository"
    pub package: Option<String>,    // "com.example.repository"
    pub kind: TypeKind,
    pub annotations: Vec<String>,   // ["Repository"]
    pub layer: LayerType,
    pub super_types: Vec<String>,   // ["JpaRepository"]
    pub bean_name: Option<String>,
    pub file: PathBuf,
    pub line: usize,
}

impl TypeInfo {
    pub fn new(name: &str, fqn: &str, kind: TypeKind, file: PathBuf, line: usize) -> Self {
        let package = fqn
            .strip_suffix(name)
            .and_then(|p| p.strip_suffix('.'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Self {
            name: name.to_string(),
            fqn: fqn.to_string(),
            package,
            kind,
            annotations: Vec::new(),
            layer: LayerType::Other,
            super_types: Vec::new(),
            bean_name: None,
            file,
            line,
        }
    }

    /// 添加注解，Spring 组件注解的值作为 bean 名称
    pub fn add_annotation(&mut self, annotation: &str, value: Option<&str>) {
        self.annotations.push(annotation.to_string());
        let is_component = matches!(
            annotation,
            "Service" | "Component" | "Repository" | "Controller" | "RestController"
        );
        if is_component {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                self.bean_name = Some(v.to_string());
            }
        }
    }

    pub fn add_super_type(&mut self, super_type: &str) {
        self.super_types.push(super_type.to_string());
    }

    /// 根据注解、父类型、命名确定层级，并补齐默认 bean 名称
    pub fn classify(&mut self) {
        self.layer = self
            .annotations
            .iter()
            .find_map(|a| LayerType::from_annotation(a))
            .or_else(|| self.super_types.iter().find_map(|s| LayerType::from_super_type(s)))
            .or_else(|| LayerType::from_name(&self.name))
            .unwrap_or(LayerType::Other);

        if self.bean_name.is_none() {
            self.bean_name = Some(decapitalize(&self.name));
        }
    }

    /// 远程调用客户端 (Feign 等)
    pub fn is_remote_client(&self) -> bool {
        self.annotations.iter().any(|a| a == "FeignClient")
            || (self.kind == TypeKind::Interface && self.name.ends_with("Client"))
    }

    /// 调用该类型的方法会产生 DB/RPC 往返
    pub fn is_external_access(&self) -> bool {
        self.layer.is_data_access() || self.is_remote_client()
    }
}

fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 字段绑定
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarBinding {
    pub name: String,               // "userRepository"
    pub type_name: String,          // 声明类型原文 (去泛型): "UserRepository"
    pub qualifier: Option<String>,  // @Qualifier("primaryRepo")
    pub annotations: Vec<String>,   // ["Autowired"]
    pub line: usize,
}

impl VarBinding {
    pub fn new(name: &str, type_name: &str, line: usize) -> Self {
        Self {
            name: name.to_string(),
            type_name: normalize_type_name(type_name),
            qualifier: None,
            annotations: Vec::new(),
            line,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Option<String>) -> Self {
        self.qualifier = qualifier;
        self
    }
}

/// 去掉泛型参数、数组维度、类型注解和空白: `@NonNull List<Order>[]` → `List`
pub fn normalize_type_name(raw: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(raw.len());
    for token in raw.split_whitespace().filter(|t| !t.starts_with('@')) {
        for c in token.chars() {
            match c {
                '<' => depth += 1,
                '>' => depth = depth.saturating_sub(1),
                '[' | ']' => {}
                c if depth == 0 => out.push(c),
                _ => {}
            }
        }
    }
    out
}

/// 按简单名解析的结果 (歧义显式暴露)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unique(String),
    Ambiguous(Vec<String>),
    Unknown,
}

/// 符号表 - 跟踪类型和字段
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    /// FQN -> 类型信息
    classes: BTreeMap<String, TypeInfo>,
    /// 简单名 -> FQN 集合 (同名类不覆盖)
    simple_name_index: BTreeMap<String, BTreeSet<String>>,
    /// (类 FQN, 字段名) -> 字段绑定
    fields: BTreeMap<(String, String), VarBinding>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类
    pub fn register_class(&mut self, fqn: &str, mut info: TypeInfo) {
        info.fqn = fqn.to_string();
        self.simple_name_index
            .entry(info.name.clone())
            .or_default()
            .insert(fqn.to_string());
        match self.classes.get(fqn) {
            Some(existing) if *existing <= info => {}
            _ => {
                self.classes.insert(fqn.to_string(), info);
            }
        }
    }

    /// 注册字段
    pub fn register_field(&mut self, class_fqn: &str, binding: VarBinding) {
        let key = (class_fqn.to_string(), binding.name.clone());
        match self.fields.get(&key) {
            Some(existing) if *existing <= binding => {}
            _ => {
                self.fields.insert(key, binding);
            }
        }
    }

    pub fn lookup_by_fqn(&self, fqn: &str) -> Option<&TypeInfo> {
        self.classes.get(fqn)
    }

    /// 同名类全部返回，按 FQN 排序
    pub fn lookup_by_simple_name(&self, name: &str) -> Vec<&TypeInfo> {
        self.simple_name_index
            .get(name)
            .map(|fqns| fqns.iter().filter_map(|f| self.classes.get(f)).collect())
            .unwrap_or_default()
    }

    pub fn classes(&self) -> impl Iterator<Item = &TypeInfo> {
        self.classes.values()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn field(&self, class_fqn: &str, field_name: &str) -> Option<&VarBinding> {
        self.fields.get(&(class_fqn.to_string(), field_name.to_string()))
    }

    pub fn fields_of<'a>(&'a self, class_fqn: &'a str) -> impl Iterator<Item = &'a VarBinding> + 'a {
        self.fields
            .range((class_fqn.to_string(), String::new())..)
            .take_while(move |((class, _), _)| class == class_fqn)
            .map(|(_, binding)| binding)
    }

    /// 解析字段声明类型的 FQN，失败返回 None (调用方降级为启发式)
    pub fn resolve_field_type_fqn(
        &self,
        class_fqn: &str,
        field_name: &str,
        import_index: &ImportIndex,
    ) -> Option<String> {
        let binding = self.field(class_fqn, field_name)?;
        import_index.resolve_type(&binding.type_name, self)
    }

    /// 按简单名在全局范围解析，优先同包
    pub fn resolve_simple_name(&self, name: &str, preferred_package: Option<&str>) -> Resolution {
        let Some(fqns) = self.simple_name_index.get(name) else {
            return Resolution::Unknown;
        };
        if let Some(pkg) = preferred_package {
            let same_pkg = format!("{pkg}.{name}");
            if fqns.contains(&same_pkg) {
                return Resolution::Unique(same_pkg);
            }
        }
        match fqns.len() {
            0 => Resolution::Unknown,
            1 => fqns
                .iter()
                .next()
                .map(|f| Resolution::Unique(f.clone()))
                .unwrap_or(Resolution::Unknown),
            _ => Resolution::Ambiguous(fqns.iter().cloned().collect()),
        }
    }

    /// 实现/继承了指定类型的类
    ///
    /// 父类型写成简单名时，要从实现类所在包看过去唯一解析到 `fqn` 才算；
    /// 不同包的同名接口不会互相匹配。
    pub fn implementations_of(&self, fqn: &str) -> Vec<&TypeInfo> {
        let simple = fqn.rsplit('.').next().unwrap_or(fqn);
        let expected = Resolution::Unique(fqn.to_string());
        self.classes
            .values()
            .filter(|t| t.fqn != fqn && t.kind != TypeKind::Interface)
            .filter(|t| {
                t.super_types.iter().any(|s| {
                    s == fqn || (s == simple && self.resolve_simple_name(simple, t.package.as_deref()) == expected)
                })
            })
            .collect()
    }

    /// 合并两个片段 (key 并集)
    pub fn merge(mut self, other: SymbolTable) -> SymbolTable {
        if self.classes.len() < other.classes.len() {
            return other.merge(self);
        }
        for (fqn, info) in other.classes {
            self.register_class(&fqn, info);
        }
        for (name, fqns) in other.simple_name_index {
            self.simple_name_index.entry(name).or_default().extend(fqns);
        }
        for ((class, _), binding) in other.fields {
            self.register_field(&class, binding);
        }
        self
    }
}

impl ClassLookup for SymbolTable {
    fn contains_class(&self, fqn: &str) -> bool {
        self.classes.contains_key(fqn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn class(fqn: &str, file: &str) -> TypeInfo {
        let name = fqn.rsplit('.').next().unwrap();
        let mut info = TypeInfo::new(name, fqn, TypeKind::Class, PathBuf::from(file), 1);
        info.classify();
        info
    }

    #[test]
    fn test_layer_from_annotation() {
        assert_eq!(LayerType::from_annotation("Repository"), Some(LayerType::Repository));
        assert_eq!(LayerType::from_annotation("RestController"), Some(LayerType::Controller));
        assert_eq!(LayerType::from_annotation("Mapper"), Some(LayerType::Mapper));
        assert_eq!(LayerType::from_annotation("Autowired"), None);
    }

    #[test]
    fn test_classify_priority() {
        let mut info = TypeInfo::new("OrderStore", "com.x.OrderStore", TypeKind::Interface, PathBuf::new(), 1);
        info.add_super_type("JpaRepository");
        info.classify();
        assert_eq!(info.layer, LayerType::Repository);
        assert_eq!(info.package.as_deref(), Some("com.x"));

        let mut annotated = TypeInfo::new("UserDao", "com.x.UserDao", TypeKind::Class, PathBuf::new(), 1);
        annotated.add_annotation("Service", Some("userDao"));
        annotated.classify();
        assert_eq!(annotated.layer, LayerType::Service);
        assert_eq!(annotated.bean_name.as_deref(), Some("userDao"));

        let plain = class("com.x.Helper", "Helper.java");
        assert_eq!(plain.layer, LayerType::Other);
        assert_eq!(plain.bean_name.as_deref(), Some("helper"));
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name("List<Map<String, Order>>"), "List");
        assert_eq!(normalize_type_name("byte[]"), "byte");
        assert_eq!(normalize_type_name("java.util.List<Order>"), "java.util.List");
        assert_eq!(normalize_type_name("@NonNull OrderRepository"), "OrderRepository");
    }

    #[test]
    fn test_same_simple_name_kept_apart() {
        let mut table = SymbolTable::new();
        table.register_class("a.Foo", class("a.Foo", "a/Foo.java"));
        table.register_class("b.Foo", class("b.Foo", "b/Foo.java"));

        let found: Vec<&str> = table.lookup_by_simple_name("Foo").iter().map(|t| t.fqn.as_str()).collect();
        assert_eq!(found, vec!["a.Foo", "b.Foo"]);
        assert_eq!(table.class_count(), 2);
        assert_eq!(
            table.resolve_simple_name("Foo", None),
            Resolution::Ambiguous(vec!["a.Foo".to_string(), "b.Foo".to_string()])
        );
        assert_eq!(table.resolve_simple_name("Foo", Some("b")), Resolution::Unique("b.Foo".into()));
        assert_eq!(table.resolve_simple_name("Bar", None), Resolution::Unknown);
    }

    #[test]
    fn test_resolve_field_type_fqn() {
        let mut table = SymbolTable::new();
        table.register_class("com.repo.OrderRepository", class("com.repo.OrderRepository", "R.java"));
        table.register_field("com.svc.OrderService", VarBinding::new("orderRepository", "OrderRepository", 5));
        table.register_field("com.svc.OrderService", VarBinding::new("cache", "Map<String, Order>", 6));
        table.register_field("com.svc.OrderService", VarBinding::new("audit", "AuditClient", 7));

        let imports = ImportIndex::build(Some("com.svc"), ["com.repo.*", "java.util.Map"], Vec::<String>::new());
        assert_eq!(
            table.resolve_field_type_fqn("com.svc.OrderService", "orderRepository", &imports).as_deref(),
            Some("com.repo.OrderRepository")
        );
        assert_eq!(
            table.resolve_field_type_fqn("com.svc.OrderService", "cache", &imports).as_deref(),
            Some("java.util.Map")
        );
        // 未解析的字段保留原始类型名
        assert_eq!(table.resolve_field_type_fqn("com.svc.OrderService", "audit", &imports), None);
        assert_eq!(table.field("com.svc.OrderService", "audit").unwrap().type_name, "AuditClient");
        assert_eq!(table.fields_of("com.svc.OrderService").count(), 3);
    }

    #[test]
    fn test_implementations_of() {
        let mut table = SymbolTable::new();
        let iface = TypeInfo::new("PayService", "com.pay.PayService", TypeKind::Interface, PathBuf::new(), 1);
        table.register_class("com.pay.PayService", iface);
        let mut alipay = class("com.pay.AlipayService", "A.java");
        alipay.add_super_type("PayService");
        table.register_class("com.pay.AlipayService", alipay);
        table.register_class("com.pay.Other", class("com.pay.Other", "O.java"));

        let impls: Vec<&str> = table.implementations_of("com.pay.PayService").iter().map(|t| t.fqn.as_str()).collect();
        assert_eq!(impls, vec!["com.pay.AlipayService"]);
    }

    #[test]
    fn test_implementations_of_same_name_in_other_package() {
        let mut table = SymbolTable::new();
        for fqn in ["a.PayApi", "b.PayApi"] {
            let name = fqn.rsplit('.').next().unwrap();
            table.register_class(fqn, TypeInfo::new(name, fqn, TypeKind::Interface, PathBuf::new(), 1));
        }
        let mut wechat = class("b.WechatPay", "W.java");
        wechat.package = Some("b".to_string());
        wechat.add_super_type("PayApi");
        table.register_class("b.WechatPay", wechat);

        assert!(table.implementations_of("a.PayApi").is_empty());
        let impls: Vec<&str> = table.implementations_of("b.PayApi").iter().map(|t| t.fqn.as_str()).collect();
        assert_eq!(impls, vec!["b.WechatPay"]);
    }

    fn fragment(entries: &[(String, String)]) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (fqn, file) in entries {
            table.register_class(fqn, class(fqn, file));
            table.register_field(fqn, VarBinding::new("dep", file, 1));
        }
        table
    }

    proptest! {
        #[test]
        fn prop_merge_is_commutative_and_associative(
            a in proptest::collection::vec(("[a-c]\\.[A-C]", "[x-z]\\.java"), 0..6),
            b in proptest::collection::vec(("[a-c]\\.[A-C]", "[x-z]\\.java"), 0..6),
            c in proptest::collection::vec(("[a-c]\\.[A-C]", "[x-z]\\.java"), 0..6),
        ) {
            let (fa, fb, fc) = (fragment(&a), fragment(&b), fragment(&c));
            let ab = fa.clone().merge(fb.clone());
            let ba = fb.clone().merge(fa.clone());
            prop_assert_eq!(&ab, &ba);

            let left = ab.merge(fc.clone());
            let right = fa.merge(fb.merge(fc));
            prop_assert_eq!(left, right);
        }
    }
}
