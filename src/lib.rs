//! java-perf-radar: Java 性能反模式静态扫描
//!
//! 两阶段扫描：Phase 1 建立全局符号表与调用图，Phase 2 在冻结的上下文上执行规则。

pub mod ast_engine;
pub mod call_graph;
pub mod config;
pub mod error;
pub mod import_index;
pub mod project_detector;
pub mod report;
pub mod scanner;
pub mod symbol_table;

pub use ast_engine::{ScanReport, Scanner};
pub use config::ScanConfig;
pub use error::{Result, ScanError};
