//! 扫描错误类型
//!
//! 单文件解析失败不会走到这里，它们作为 `SkippedFile` 记录在报告中。
//! 这里只放会终止整次扫描的错误。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("scan root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {}: {message}", path.display())]
    Walk { path: PathBuf, message: String },

    #[error("failed to compile query `{name}`: {message}")]
    Query { name: &'static str, message: String },

    #[error("tree-sitter parser error: {0}")]
    Parser(String),

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("manifest parse error: {0}")]
    Manifest(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }
}
