//! # 进度显示
//!
//! 批量解析计算目录时用进度条，等待 VASP 或 Slurm 作业时用 spinner。
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs`, `commands/run.rs`, `commands/specific.rs` 使用
//! - 使用 `indicatif` crate

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {elapsed_precise} {msg}";

/// 目录计数进度条
pub fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// 长时间阻塞的外部命令（VASP、squeue 轮询）
pub fn create_spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"]);
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
