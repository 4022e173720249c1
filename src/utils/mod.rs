//! # 工具函数模块
//!
//! 终端输出、进度显示与 Slurm 交互。
//!
//! ## 依赖关系
//! - 被 `commands/`, `batch/` 使用
//! - 子模块: output, progress, slurm

pub mod output;
pub mod progress;
pub mod slurm;
