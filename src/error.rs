//! # 统一错误处理模块
//!
//! 定义 automag 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// automag 统一错误类型
#[derive(Error, Debug)]
pub enum AutomagError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Value of mode = {0} not understood")]
    UnsupportedMode(String),

    // ─────────────────────────────────────────────────────────────
    // 工作流错误
    // ─────────────────────────────────────────────────────────────
    #[error("Cannot link stage {stage} ({from} fireworks) to the next stage ({to} fireworks)")]
    LinkMismatch { stage: usize, from: usize, to: usize },

    #[error("Invalid workflow '{name}': {reason}")]
    InvalidWorkflow { name: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 拟合错误
    // ─────────────────────────────────────────────────────────────
    #[error("System of {rank} independent equation(s) in {unknowns} unknowns")]
    RankDeficient { rank: usize, unknowns: usize },

    #[error("Not enough data for fit: {0}")]
    InsufficientData(String),

    // ─────────────────────────────────────────────────────────────
    // 外部命令错误
    // ─────────────────────────────────────────────────────────────
    #[error("External command '{command}' not found in PATH")]
    CommandNotFound { command: String },

    #[error("External command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("No matching files found with pattern: {pattern}")]
    NoFilesFound { pattern: String },

    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, AutomagError>;

impl AutomagError {
    /// 构造读取错误
    pub fn read(path: &std::path::Path, source: std::io::Error) -> Self {
        AutomagError::FileReadError {
            path: path.display().to_string(),
            source,
        }
    }

    /// 构造写入错误
    pub fn write(path: &std::path::Path, source: std::io::Error) -> Self {
        AutomagError::FileWriteError {
            path: path.display().to_string(),
            source,
        }
    }
}
