// ============================================================================
// 项目侦测模块 - 识别构建工具、技术栈与 JDK 版本
// ============================================================================
//
// 只看主依赖: Maven 的 test scope 与 Gradle 的 test* 配置不参与判定。
// 清单解析失败时退化为子串匹配并 warn，不中断扫描。
//
// ============================================================================

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ScanError};

/// Maven/Gradle 依赖的统一视图
pub trait ManifestDependency {
    fn group(&self) -> &str;
    fn artifact(&self) -> &str;
    /// 是否属于主代码 (非测试) 依赖
    fn is_main(&self) -> bool;
}

// ============================================================================
// Maven
// ============================================================================

/// Dependency scope in Maven pom.xml
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyScope {
    #[default]
    Compile,
    Test,
    Runtime,
    Provided,
    System,
    Import,
}

impl FromStr for DependencyScope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "test" => DependencyScope::Test,
            "runtime" => DependencyScope::Runtime,
            "provided" => DependencyScope::Provided,
            "system" => DependencyScope::System,
            "import" => DependencyScope::Import,
            _ => DependencyScope::Compile,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenDependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Option<String>,
    pub scope: DependencyScope,
}

impl ManifestDependency for MavenDependency {
    fn group(&self) -> &str {
        &self.group_id
    }

    fn artifact(&self) -> &str {
        &self.artifact_id
    }

    fn is_main(&self) -> bool {
        self.scope != DependencyScope::Test
    }
}

#[derive(Default)]
struct PartialDependency {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    scope: Option<String>,
}

impl PartialDependency {
    fn build(self) -> Option<MavenDependency> {
        Some(MavenDependency {
            group_id: self.group_id?,
            artifact_id: self.artifact_id?,
            version: self.version,
            scope: self
                .scope
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        })
    }
}

/// `project > dependencies > dependency` 的元素路径
const DEPENDENCY_PATH: [&str; 3] = ["project", "dependencies", "dependency"];

/// 解析 pom.xml 的 `<dependencies>`
///
/// 只读取 `project/dependencies/dependency` 的直接子元素，
/// `<dependencyManagement>`、插件依赖、`<exclusions>` 和注释都不计入。
pub fn parse_maven_pom(content: &str) -> Result<Vec<MavenDependency>> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut dependencies = Vec::new();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<PartialDependency> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                if path == DEPENDENCY_PATH {
                    current = Some(PartialDependency::default());
                }
            }
            Ok(Event::End(_)) => {
                if path == DEPENDENCY_PATH {
                    if let Some(dep) = current.take().and_then(PartialDependency::build) {
                        dependencies.push(dep);
                    }
                }
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                // 坐标必须是 <dependency> 的直接子元素
                let direct_child = path.len() == DEPENDENCY_PATH.len() + 1
                    && path[..DEPENDENCY_PATH.len()] == DEPENDENCY_PATH;
                if let (true, Some(dep)) = (direct_child, current.as_mut()) {
                    let text = e
                        .unescape()
                        .map_err(|err| ScanError::Manifest(format!("pom.xml: {err}")))?
                        .trim()
                        .to_string();
                    match path[DEPENDENCY_PATH.len()].as_str() {
                        "groupId" => dep.group_id = Some(text),
                        "artifactId" => dep.artifact_id = Some(text),
                        "version" => dep.version = Some(text),
                        "scope" => dep.scope = Some(text),
                        _ => {}
                    }
                }
            }
            // 注释中的依赖不会产生 Start 事件
            Ok(Event::Comment(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ScanError::Manifest(format!(
                    "pom.xml parse error at position {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(dependencies)
}

// ============================================================================
// Gradle
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GradleConfiguration {
    #[default]
    Implementation,
    TestImplementation,
    CompileOnly,
    RuntimeOnly,
    TestCompileOnly,
    TestRuntimeOnly,
    Api,
    AnnotationProcessor,
    Other(String),
}

impl FromStr for GradleConfiguration {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "implementation" | "compile" => GradleConfiguration::Implementation,
            "testImplementation" | "testCompile" => GradleConfiguration::TestImplementation,
            "compileOnly" => GradleConfiguration::CompileOnly,
            "runtimeOnly" => GradleConfiguration::RuntimeOnly,
            "testCompileOnly" => GradleConfiguration::TestCompileOnly,
            "testRuntimeOnly" => GradleConfiguration::TestRuntimeOnly,
            "api" => GradleConfiguration::Api,
            "annotationProcessor" => GradleConfiguration::AnnotationProcessor,
            other => GradleConfiguration::Other(other.to_string()),
        })
    }
}

impl GradleConfiguration {
    pub fn is_test(&self) -> bool {
        match self {
            GradleConfiguration::TestImplementation
            | GradleConfiguration::TestCompileOnly
            | GradleConfiguration::TestRuntimeOnly => true,
            GradleConfiguration::Other(name) => name.starts_with("test"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradleDependency {
    pub group: String,
    pub name: String,
    pub version: Option<String>,
    pub configuration: GradleConfiguration,
}

impl ManifestDependency for GradleDependency {
    fn group(&self) -> &str {
        &self.group
    }

    fn artifact(&self) -> &str {
        &self.name
    }

    fn is_main(&self) -> bool {
        !self.configuration.is_test()
    }
}

const GRADLE_CONFIGURATIONS: &str =
    "implementation|testImplementation|compileOnly|runtimeOnly|testCompileOnly|testRuntimeOnly|api|annotationProcessor|compile|testCompile";

/// `implementation "g:a:v"` / `implementation("g:a:v")` / `implementation platform("g:a:v")`
static RE_GRADLE_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^\s*({GRADLE_CONFIGURATIONS})\s*\(?\s*(?:(?:enforcedPlatform|platform)\s*\(\s*)?["']([^"']+)["']"#
    ))
    .unwrap()
});

/// `implementation group: 'g', name: 'a', version: 'v'`
static RE_GRADLE_MAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^\s*({GRADLE_CONFIGURATIONS})\s*\(?\s*group\s*[:=]\s*["']([^"']+)["']\s*,\s*name\s*[:=]\s*["']([^"']+)["'](?:\s*,\s*version\s*[:=]\s*["']([^"']+)["'])?"#
    ))
    .unwrap()
});

static RE_DEPENDENCIES_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bdependencies\s*\{").unwrap());

/// 去掉 `//` 行注释 (字符串内的 `//` 保留)
fn strip_line_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) if c == q && prev != '\\' => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '/' && prev == '/' => return &line[..i - 1],
            None => {}
        }
        prev = c;
    }
    line
}

/// 所有 `dependencies { ... }` 块的内容 (不含花括号)；块不闭合时报错
fn dependency_blocks(content: &str) -> Result<Vec<String>> {
    let cleaned: String = content
        .lines()
        .map(strip_line_comment)
        .collect::<Vec<_>>()
        .join("\n");

    let mut blocks = Vec::new();
    let mut search_from = 0;
    while let Some(m) = RE_DEPENDENCIES_BLOCK.find_at(&cleaned, search_from) {
        let body_start = m.end();
        let mut depth = 1usize;
        let mut body_end = None;
        for (i, c) in cleaned[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        body_end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = body_end else {
            return Err(ScanError::Manifest(
                "build.gradle: unbalanced `dependencies {` block".to_string(),
            ));
        };
        blocks.push(cleaned[body_start..end].to_string());
        search_from = end + 1;
    }
    Ok(blocks)
}

fn parse_coordinates(coordinates: &str, configuration: &str) -> Option<GradleDependency> {
    let mut parts = coordinates.split(':');
    let group = parts.next().filter(|g| !g.is_empty())?;
    let name = parts.next().filter(|n| !n.is_empty())?;
    Some(GradleDependency {
        group: group.to_string(),
        name: name.to_string(),
        version: parts.next().map(str::to_string),
        configuration: configuration.parse().unwrap_or_default(),
    })
}

/// 解析 build.gradle / build.gradle.kts 的依赖声明
pub fn parse_gradle_build(content: &str) -> Result<Vec<GradleDependency>> {
    let mut dependencies = Vec::new();

    for block in dependency_blocks(content)? {
        for line in block.lines() {
            if let Some(caps) = RE_GRADLE_MAP.captures(line) {
                dependencies.push(GradleDependency {
                    group: caps[2].to_string(),
                    name: caps[3].to_string(),
                    version: caps.get(4).map(|m| m.as_str().to_string()),
                    configuration: caps[1].parse().unwrap_or_default(),
                });
            } else if let Some(caps) = RE_GRADLE_STRING.captures(line) {
                if let Some(dep) = parse_coordinates(&caps[2], &caps[1]) {
                    dependencies.push(dep);
                }
            }
        }
    }

    Ok(dependencies)
}

// ============================================================================
// 技术栈判定
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    Maven,
    Gradle,
}

impl fmt::Display for BuildTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTool::Maven => f.write_str("maven"),
            BuildTool::Gradle => f.write_str("gradle"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedStack {
    pub is_spring_boot: bool,
    pub is_spring_mvc: bool,
    pub is_reactive: bool,      // WebFlux, Reactor
    pub is_webflux: bool,
    pub has_lombok: bool,
    pub is_maven: bool,
    pub is_gradle: bool,
    pub build_tool: Option<BuildTool>,
    pub jdk_version: Option<String>,    // "8", "11", "17", "21"
}

impl DetectedStack {
    pub fn is_spring(&self) -> bool {
        self.is_spring_boot || self.is_spring_mvc || self.is_webflux
    }

    fn with_build_tool(mut self, tool: BuildTool) -> Self {
        self.build_tool = Some(tool);
        self.is_maven = tool == BuildTool::Maven;
        self.is_gradle = tool == BuildTool::Gradle;
        self
    }

    /// 合并另一份判定 (标志取或)
    fn absorb(&mut self, other: &DetectedStack) {
        self.is_spring_boot |= other.is_spring_boot;
        self.is_spring_mvc |= other.is_spring_mvc;
        self.is_reactive |= other.is_reactive;
        self.is_webflux |= other.is_webflux;
        self.has_lombok |= other.has_lombok;
    }
}

/// 从依赖列表判定技术栈 (测试依赖不参与)
pub fn detect_stack_from_deps<D: ManifestDependency>(deps: &[D]) -> DetectedStack {
    let mut stack = DetectedStack::default();

    for dep in deps.iter().filter(|d| d.is_main()) {
        let group = dep.group();
        let artifact = dep.artifact();

        if artifact.starts_with("spring-boot") || group == "org.springframework.boot" {
            stack.is_spring_boot = true;
        }
        if artifact == "spring-boot-starter-web" || artifact == "spring-webmvc" {
            stack.is_spring_mvc = true;
        }
        if artifact == "spring-boot-starter-webflux" || artifact == "spring-webflux" {
            stack.is_webflux = true;
            stack.is_reactive = true;
        }
        if artifact == "reactor-core" || (group == "io.projectreactor" && artifact.starts_with("reactor-")) {
            stack.is_reactive = true;
        }
        if artifact == "lombok" || group == "org.projectlombok" {
            stack.has_lombok = true;
        }
    }

    stack
}

/// 清单无法解析时的子串兜底
fn detect_stack_by_substring(content: &str) -> DetectedStack {
    DetectedStack {
        is_spring_boot: content.contains("spring-boot") || content.contains("org.springframework.boot"),
        is_spring_mvc: content.contains("spring-boot-starter-web\"")
            || content.contains("spring-boot-starter-web<")
            || content.contains("spring-boot-starter-web'")
            || content.contains("spring-webmvc"),
        is_webflux: content.contains("webflux"),
        is_reactive: content.contains("webflux") || content.contains("reactor-core"),
        has_lombok: content.contains("lombok"),
        ..DetectedStack::default()
    }
}

static RE_MAVEN_JDK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:java\.version|maven\.compiler\.(?:source|target|release)|release|source|target)>\s*(?:1\.)?(\d+)").unwrap()
});

static RE_GRADLE_JDK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"JavaVersion\.VERSION_(?:1_)?(\d+)|(?:source|target)Compatibility\s*=\s*['"]?(?:1\.)?(\d+)|JavaLanguageVersion\.of\(\s*(\d+)"#).unwrap()
});

fn sniff_jdk(re: &Regex, content: &str) -> Option<String> {
    let caps = re.captures(content)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
}

fn read_manifest(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Failed to read {}: {e}", path.display());
            None
        }
    }
}

fn analyze_maven(pom: &Path) -> DetectedStack {
    let mut stack = DetectedStack::default().with_build_tool(BuildTool::Maven);
    let Some(content) = read_manifest(pom) else {
        return stack;
    };

    match parse_maven_pom(&content) {
        Ok(deps) => {
            debug!("pom.xml: {} dependencies", deps.len());
            stack.absorb(&detect_stack_from_deps(&deps));
        }
        Err(e) => {
            warn!("{e}; falling back to substring detection");
            stack.absorb(&detect_stack_by_substring(&content));
        }
    }
    stack.jdk_version = sniff_jdk(&RE_MAVEN_JDK, &content);
    stack
}

fn analyze_gradle(root: &Path) -> DetectedStack {
    let mut stack = DetectedStack::default().with_build_tool(BuildTool::Gradle);

    for name in ["build.gradle", "build.gradle.kts"] {
        let path = root.join(name);
        if !path.is_file() {
            continue;
        }
        let Some(content) = read_manifest(&path) else {
            continue;
        };
        match parse_gradle_build(&content) {
            Ok(deps) => {
                debug!("{name}: {} dependencies", deps.len());
                stack.absorb(&detect_stack_from_deps(&deps));
            }
            Err(e) => {
                warn!("{e}; falling back to substring detection");
                stack.absorb(&detect_stack_by_substring(&content));
            }
        }
        if stack.jdk_version.is_none() {
            stack.jdk_version = sniff_jdk(&RE_GRADLE_JDK, &content);
        }
    }
    stack
}

/// 扫描项目根目录的构建清单，检测技术栈
pub fn detect_stack(root: &Path) -> DetectedStack {
    let pom = root.join("pom.xml");
    if pom.is_file() {
        return analyze_maven(&pom);
    }
    if root.join("build.gradle").is_file() || root.join("build.gradle.kts").is_file() {
        return analyze_gradle(root);
    }
    debug!("No build manifest under {}", root.display());
    DetectedStack::default()
}

/// 根据检测到的技术栈生成分析指导策略
pub fn strategy_hint(stack: &DetectedStack) -> String {
    let mut hints = Vec::new();

    let kind = if stack.is_spring_boot {
        "Spring Boot"
    } else if stack.is_spring() {
        "Spring"
    } else {
        "Java Application"
    };
    let jdk = stack.jdk_version.as_deref().unwrap_or("unknown");
    let tool = stack
        .build_tool
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string());
    hints.push(format!("Project Type: {kind} (JDK {jdk}, build: {tool})"));

    if jdk.parse::<u32>().is_ok_and(|v| v >= 21) {
        hints.push("- **Virtual Threads**: Check for `synchronized` pinning. Suggest `ReentrantLock`.".to_string());
    }
    if stack.is_reactive {
        hints.push("- **Reactive**: Focus on blocking calls in Reactor threads (`.block()`), backpressure. ThreadLocal context does not propagate.".to_string());
    } else if stack.is_spring() {
        hints.push("- **Servlet (MVC)**: Focus on thread pool exhaustion and blocking I/O in request threads.".to_string());
    }
    if stack.has_lombok {
        hints.push("- **Lombok**: Generated equals/hashCode/toString may touch lazy associations.".to_string());
    }

    hints.join("\n")
}
