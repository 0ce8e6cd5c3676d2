//! AST Engine - 两阶段并行扫描
//!
//! 🛰️ 雷达扫描：检测性能反模式
//!
//! 1. 枚举 `.java` 与 application 配置文件 (排序，跳过构建目录)
//! 2. Phase 1: 并行解析 + 索引，归并为全局 SymbolTable / CallGraph
//! 3. Phase 2: 基于冻结的全局上下文并行执行全部规则
//! 4. 配置文件规则 (连接池、线程数、JPA 开关)
//! 5. 抑制过滤、排序，输出 `ScanReport`

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::call_graph::{extract_call_graph, CallGraph};
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::import_index::ImportIndex;
use crate::project_detector::{detect_stack, DetectedStack};
use crate::scanner::app_config::AppConfigAnalyzer;
use crate::scanner::rule_handlers::{RuleContext, RuleEngine};
use crate::scanner::tree_sitter_java::{index_file, JavaQueries, ParsedFile};
use crate::scanner::{sort_findings, Finding, RuleMeta};
use crate::symbol_table::SymbolTable;

/// 未参与分析的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub config_files: usize,
    pub classes: usize,
    pub call_edges: usize,
    pub unresolved_edges: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub root: PathBuf,
    pub stack: DetectedStack,
    pub stats: ScanStats,
    pub skipped: Vec<SkippedFile>,
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn count(&self, severity: crate::scanner::Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// 文件枚举结果
#[derive(Default)]
struct Collected {
    java: Vec<PathBuf>,
    app_configs: Vec<PathBuf>,
    skipped: Vec<SkippedFile>,
}

enum Loaded {
    Parsed(ParsedFile),
    Skipped(SkippedFile),
}

/// Phase 1 + Phase 2 的产出
struct PipelineOutput {
    findings: Vec<Finding>,
    classes: usize,
    call_edges: usize,
    unresolved_edges: usize,
}

pub struct Scanner {
    config: ScanConfig,
    queries: JavaQueries,
    engine: RuleEngine,
    app_config: AppConfigAnalyzer,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Result<Self> {
        Ok(Self {
            config,
            queries: JavaQueries::compile()?,
            engine: RuleEngine::with_default_rules(),
            app_config: AppConfigAnalyzer::new(),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// 全部规则: 源码规则在前，应用配置规则在后
    pub fn catalog(&self) -> Vec<&'static RuleMeta> {
        let mut rules = self.engine.catalog();
        rules.extend(self.app_config.catalog());
        rules
    }

    /// 全项目雷达扫描，技术栈从构建文件检测
    pub fn scan(&self, root: &Path) -> Result<ScanReport> {
        check_root(root)?;
        let stack = detect_stack(root);
        info!(
            "Detected stack: build={:?} spring={} reactive={}",
            stack.build_tool,
            stack.is_spring(),
            stack.is_reactive
        );
        self.scan_with_stack(root, stack)
    }

    pub fn scan_with_stack(&self, root: &Path, stack: DetectedStack) -> Result<ScanReport> {
        check_root(root)?;
        match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| ScanError::ThreadPool(e.to_string()))?;
                pool.install(|| self.scan_in_pool(root, stack))
            }
            None => self.scan_in_pool(root, stack),
        }
    }

    fn scan_in_pool(&self, root: &Path, stack: DetectedStack) -> Result<ScanReport> {
        let Collected {
            java: paths,
            app_configs,
            mut skipped,
        } = self.collect_files(root)?;
        info!(
            "Found {} Java files and {} config files under {}",
            paths.len(),
            app_configs.len(),
            root.display()
        );

        let loaded: Vec<Loaded> = paths
            .par_iter()
            .map(|path| self.load_file(root, path))
            .collect::<Result<_>>()?;

        let mut files = Vec::with_capacity(loaded.len());
        for item in loaded {
            match item {
                Loaded::Parsed(file) => files.push(file),
                Loaded::Skipped(skip) => {
                    warn!("Skipping {}: {}", skip.path, skip.reason);
                    skipped.push(skip);
                }
            }
        }
        let config_findings = self.scan_app_configs(root, &app_configs, &mut skipped)?;
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        let mut output = self.run_pipeline(&files, &stack);
        if !config_findings.is_empty() {
            output.findings.extend(config_findings);
            sort_findings(&mut output.findings);
        }
        let stats = ScanStats {
            files_scanned: files.len(),
            files_skipped: skipped.len(),
            config_files: app_configs.len(),
            classes: output.classes,
            call_edges: output.call_edges,
            unresolved_edges: output.unresolved_edges,
        };
        info!(
            "Scan finished: {} files, {} skipped, {} findings",
            stats.files_scanned,
            stats.files_skipped,
            output.findings.len()
        );

        Ok(ScanReport {
            root: root.to_path_buf(),
            stack,
            stats,
            skipped,
            findings: output.findings,
        })
    }

    /// 分析内存中的源码 (单文件或小型多文件片段)
    pub fn analyze_sources(&self, sources: &[(&str, &str)], stack: &DetectedStack) -> Result<Vec<Finding>> {
        let files = sources
            .iter()
            .map(|(name, code)| ParsedFile::from_source(name, code))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.run_pipeline(&files, stack).findings)
    }

    pub fn analyze_source(&self, file_name: &str, code: &str) -> Result<Vec<Finding>> {
        self.analyze_sources(&[(file_name, code)], &DetectedStack::default())
    }

    // ========================================================================
    // 文件枚举
    // ========================================================================

    fn collect_files(&self, root: &Path) -> Result<Collected> {
        let mut collected = Collected::default();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !self.config.is_excluded_dir(&e.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry.map_err(|e| ScanError::Walk {
                path: e.path().unwrap_or(root).to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_java = path.extension().is_some_and(|ext| ext == "java");
            if !is_java && !AppConfigAnalyzer::is_config_file(path) {
                continue;
            }

            let size = entry
                .metadata()
                .map_err(|e| ScanError::Walk {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
                .len();
            if size > self.config.max_file_bytes {
                collected.skipped.push(SkippedFile {
                    path: relative_path(root, path),
                    reason: format!("file too large ({size} bytes > {})", self.config.max_file_bytes),
                });
                continue;
            }
            if is_java {
                collected.java.push(path.to_path_buf());
            } else {
                collected.app_configs.push(path.to_path_buf());
            }
        }
        Ok(collected)
    }

    /// application*.yml / application*.properties 上的配置规则
    fn scan_app_configs(
        &self,
        root: &Path,
        paths: &[PathBuf],
        skipped: &mut Vec<SkippedFile>,
    ) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for path in paths {
            let rel_path = relative_path(root, path);
            let bytes = fs::read(path).map_err(|e| ScanError::io(path, e))?;
            let Ok(text) = String::from_utf8(bytes) else {
                warn!("Skipping {}: invalid UTF-8", rel_path);
                skipped.push(SkippedFile {
                    path: rel_path,
                    reason: "invalid UTF-8".to_string(),
                });
                continue;
            };
            debug!("Checking config {}", rel_path);
            findings.extend(self.app_config.analyze(&rel_path, &text, &self.config));
        }
        Ok(findings)
    }

    fn load_file(&self, root: &Path, path: &Path) -> Result<Loaded> {
        let rel_path = relative_path(root, path);
        let bytes = fs::read(path).map_err(|e| ScanError::io(path, e))?;
        let Ok(source) = String::from_utf8(bytes) else {
            return Ok(Loaded::Skipped(SkippedFile {
                path: rel_path,
                reason: "invalid UTF-8".to_string(),
            }));
        };

        let file = ParsedFile::parse(path, &rel_path, source)?;
        if let Some(line) = file.first_error_line() {
            return Ok(Loaded::Skipped(SkippedFile {
                path: rel_path,
                reason: format!("syntax error at line {line}"),
            }));
        }
        debug!("Parsed {}", rel_path);
        Ok(Loaded::Parsed(file))
    }

    // ========================================================================
    // 两阶段流水线
    // ========================================================================

    fn run_pipeline(&self, files: &[ParsedFile], stack: &DetectedStack) -> PipelineOutput {
        // Phase 1a: 结构索引 → 全局 SymbolTable
        let (imports, fragments): (Vec<ImportIndex>, Vec<SymbolTable>) = files
            .par_iter()
            .map(|file| {
                let index = index_file(file);
                (index.imports, index.symbols)
            })
            .unzip();
        let symbols = fragments
            .into_par_iter()
            .reduce(SymbolTable::new, SymbolTable::merge);
        info!("Phase 1: indexed {} classes", symbols.class_count());

        // Phase 1b: 调用点 → 全局 CallGraph
        let mut graph = files
            .par_iter()
            .zip(imports.par_iter())
            .map(|(file, imports)| extract_call_graph(file, imports, &symbols, &self.queries))
            .reduce(CallGraph::new, CallGraph::merge);
        graph.register_layers(&symbols);
        info!(
            "Phase 1: call graph has {} edges ({} unresolved)",
            graph.edge_count(),
            graph.unresolved_edge_count()
        );

        // Phase 2: 规则
        let mut findings: Vec<Finding> = files
            .par_iter()
            .zip(imports.par_iter())
            .flat_map_iter(|(file, imports)| {
                let ctx = RuleContext::new(file, imports, &symbols, &graph, stack, &self.config, &self.queries);
                self.engine.run(&ctx)
            })
            .collect();
        sort_findings(&mut findings);

        PipelineOutput {
            findings,
            classes: symbols.class_count(),
            call_edges: graph.edge_count(),
            unresolved_edges: graph.unresolved_edge_count(),
        }
    }
}

fn check_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    Ok(())
}

/// 相对扫描根目录、`/` 分隔的路径
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
