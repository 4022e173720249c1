//! # ucf 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/ucf.rs`

use clap::Args;
use std::path::PathBuf;

/// ucf 子命令参数
#[derive(Args, Debug)]
pub struct UcfArgs {
    /// Stage input JSON (configuration_label, cutoff_radius,
    /// distances_between_neighbors, coupling_constants)
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Folder written by `coll`
    #[arg(long, default_value = "trials")]
    pub trials_dir: PathBuf,

    /// Override configuration_label from the input file
    #[arg(long)]
    pub configuration: Option<String>,

    /// Output file
    #[arg(short, long, default_value = "vamp.ucf")]
    pub output: PathBuf,
}
