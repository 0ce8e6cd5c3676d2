// ============================================================================
// Import 索引 - 单文件内的简单类名 → FQN 解析
// ============================================================================
//
// 每个文件一个实例，解析完成后只读。不同文件的 ImportIndex 互不可见，
// 合并全局符号表时只合并类与字段，不合并 import。
//
// ============================================================================

use std::collections::BTreeMap;

/// 全局已知类查询 (由 SymbolTable 实现)
pub trait ClassLookup {
    fn contains_class(&self, fqn: &str) -> bool;
}

/// 没有全局上下文时使用
pub struct NoClasses;

impl ClassLookup for NoClasses {
    fn contains_class(&self, _fqn: &str) -> bool {
        false
    }
}

/// java.lang 下常用类 (隐式导入)
const JAVA_LANG_CLASSES: &[&str] = &[
    "AutoCloseable", "Boolean", "Byte", "CharSequence", "Character", "Class", "ClassLoader",
    "Cloneable", "Comparable", "Deprecated", "Double", "Enum", "Error", "Exception", "Float",
    "FunctionalInterface", "IllegalArgumentException", "IllegalStateException",
    "IndexOutOfBoundsException", "InheritableThreadLocal", "Integer", "InterruptedException",
    "Iterable", "Long", "Math", "NullPointerException", "Number", "Object", "Override",
    "Process", "ProcessBuilder", "Record", "Runnable", "Runtime", "RuntimeException", "Short",
    "StrictMath", "String", "StringBuffer", "StringBuilder", "SuppressWarnings", "System",
    "Thread", "ThreadGroup", "ThreadLocal", "Throwable", "UnsupportedOperationException", "Void",
];

pub fn is_java_lang_class(simple_name: &str) -> bool {
    JAVA_LANG_CLASSES.binary_search(&simple_name).is_ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportIndex {
    /// 显式导入: "List" -> "java.util.List"
    explicit: BTreeMap<String, String>,
    /// 通配导入的包: "java.util"
    wildcards: Vec<String>,
    package: Option<String>,
    /// 本文件声明的类: "Inner" -> "com.example.Outer.Inner"
    local_classes: BTreeMap<String, String>,
}

impl ImportIndex {
    /// 由 import 语句文本、包声明、本文件类声明构建
    ///
    /// `imports` 形如 `java.util.List` 或 `java.util.*`；
    /// `local_classes` 为相对包的路径，如 `Outer` / `Outer.Inner`
    pub fn build<I, L>(package: Option<&str>, imports: I, local_classes: L) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
    {
        let package = package.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
        let mut index = Self {
            package,
            ..Self::default()
        };

        for import in imports {
            let import = import.as_ref().trim().trim_end_matches(';').trim();
            if let Some(pkg) = import.strip_suffix(".*") {
                if !index.wildcards.iter().any(|w| w == pkg) {
                    index.wildcards.push(pkg.to_string());
                }
            } else if let Some((_, simple)) = import.rsplit_once('.') {
                index.explicit.insert(simple.to_string(), import.to_string());
            }
        }

        for path in local_classes {
            let path = path.as_ref();
            let simple = path.rsplit('.').next().unwrap_or(path);
            let fqn = index.qualify(path);
            index.local_classes.insert(simple.to_string(), fqn);
        }

        index
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// 包名 + 相对路径
    pub fn qualify(&self, relative: &str) -> String {
        match &self.package {
            Some(pkg) => format!("{pkg}.{relative}"),
            None => relative.to_string(),
        }
    }

    pub fn explicit_imports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.explicit.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn wildcard_packages(&self) -> &[String] {
        &self.wildcards
    }

    /// 解析简单类名，先命中者优先:
    /// 显式导入 → 本文件类 → 通配包(需全局已知) → 同包(需全局已知) → java.lang
    pub fn resolve(&self, simple_name: &str, known: &impl ClassLookup) -> Option<String> {
        if let Some(fqn) = self.explicit.get(simple_name) {
            return Some(fqn.clone());
        }

        if let Some(fqn) = self.local_classes.get(simple_name) {
            return Some(fqn.clone());
        }

        for pkg in &self.wildcards {
            let candidate = format!("{pkg}.{simple_name}");
            if known.contains_class(&candidate) {
                return Some(candidate);
            }
        }

        if let Some(pkg) = &self.package {
            let candidate = format!("{pkg}.{simple_name}");
            if known.contains_class(&candidate) {
                return Some(candidate);
            }
        }

        let java_lang = format!("java.lang.{simple_name}");
        if is_java_lang_class(simple_name) || known.contains_class(&java_lang) {
            return Some(java_lang);
        }

        None
    }

    /// 解析可能带限定的类型名 (`Map.Entry`、`com.x.Foo`)
    pub fn resolve_type(&self, type_name: &str, known: &impl ClassLookup) -> Option<String> {
        match type_name.split_once('.') {
            None => self.resolve(type_name, known),
            Some((head, rest)) => {
                if head.starts_with(|c: char| c.is_ascii_lowercase()) {
                    // 已是全限定名
                    Some(type_name.to_string())
                } else {
                    self.resolve(head, known).map(|fqn| format!("{fqn}.{rest}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    struct Known(BTreeSet<String>);

    impl ClassLookup for Known {
        fn contains_class(&self, fqn: &str) -> bool {
            self.0.contains(fqn)
        }
    }

    fn known(fqns: &[&str]) -> Known {
        Known(fqns.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_java_lang_table_is_sorted() {
        let mut sorted = JAVA_LANG_CLASSES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, JAVA_LANG_CLASSES);
    }

    #[test]
    fn test_explicit_beats_wildcard() {
        let index = ImportIndex::build(
            Some("com.example.app"),
            ["com.example.a.*", "com.example.b.Foo"],
            Vec::<String>::new(),
        );
        let known = known(&["com.example.a.Foo", "com.example.b.Foo"]);
        assert_eq!(index.resolve("Foo", &known).as_deref(), Some("com.example.b.Foo"));
    }

    #[test]
    fn test_local_class_beats_wildcard_and_same_package() {
        let index = ImportIndex::build(Some("com.example"), ["com.other.*"], ["Order", "Order.Line"]);
        let known = known(&["com.other.Order", "com.other.Line"]);
        assert_eq!(index.resolve("Order", &known).as_deref(), Some("com.example.Order"));
        assert_eq!(index.resolve("Line", &known).as_deref(), Some("com.example.Order.Line"));
    }

    #[test]
    fn test_wildcard_requires_known_class() {
        let index = ImportIndex::build(Some("com.example"), ["com.repo.*"], Vec::<String>::new());
        assert_eq!(index.resolve("UserRepository", &NoClasses), None);
        let known = known(&["com.repo.UserRepository"]);
        assert_eq!(
            index.resolve("UserRepository", &known).as_deref(),
            Some("com.repo.UserRepository")
        );
    }

    #[test]
    fn test_same_package_and_java_lang_fallback() {
        let index = ImportIndex::build(Some("com.example"), Vec::<String>::new(), Vec::<String>::new());
        let known = known(&["com.example.Helper"]);
        assert_eq!(index.resolve("Helper", &known).as_deref(), Some("com.example.Helper"));
        assert_eq!(index.resolve("String", &known).as_deref(), Some("java.lang.String"));
        assert_eq!(index.resolve("Unknown", &known), None);
    }

    #[test]
    fn test_resolve_qualified_type() {
        let index = ImportIndex::build(None, ["java.util.Map"], Vec::<String>::new());
        assert_eq!(index.resolve_type("Map.Entry", &NoClasses).as_deref(), Some("java.util.Map.Entry"));
        assert_eq!(index.resolve_type("org.x.Y", &NoClasses).as_deref(), Some("org.x.Y"));
    }

    fn class_name() -> impl Strategy<Value = String> {
        "[A-Z][a-zA-Z]{1,8}"
    }

    fn package_name() -> impl Strategy<Value = String> {
        "[a-z]{2,6}(\\.[a-z]{2,6}){0,2}"
    }

    proptest! {
        #[test]
        fn prop_explicit_import_always_wins(
            name in class_name(),
            explicit_pkg in package_name(),
            wildcard_pkg in package_name(),
        ) {
            let explicit = format!("{explicit_pkg}.{name}");
            let index = ImportIndex::build(
                Some("app.current"),
                [format!("{wildcard_pkg}.*"), explicit.clone()],
                Vec::<String>::new(),
            );
            let known = Known([format!("{wildcard_pkg}.{name}"), explicit.clone()].into_iter().collect());
            prop_assert_eq!(index.resolve(&name, &known), Some(explicit));
        }

        #[test]
        fn prop_imports_do_not_leak_between_files(
            name in class_name(),
            pkg_a in package_name(),
        ) {
            prop_assume!(!is_java_lang_class(&name));
            let file_a = ImportIndex::build(Some("app.a"), [format!("{pkg_a}.{name}")], Vec::<String>::new());
            let file_b = ImportIndex::build(Some("app.b"), Vec::<String>::new(), Vec::<String>::new());
            prop_assert!(file_a.resolve(&name, &NoClasses).is_some());
            prop_assert_eq!(file_b.resolve(&name, &NoClasses), None);
        }
    }
}
