//! # 批量处理模块
//!
//! 扫描并并行解析计算目录。
//!
//! ## 功能
//! - 收集包含 OUTCAR 的目录
//! - 并行解析 OUTCAR / INCAR / 收敛标记
//! - 进度反馈与统计
//!
//! ## 依赖关系
//! - 被 `commands/analyze/runs.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod runner;
pub mod summary;

pub use collector::RunCollector;
pub use runner::{BatchResult, BatchRunner, ProcessResult};
pub use summary::{summarize_runs, RunSummary};
