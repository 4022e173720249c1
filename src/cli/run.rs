//! # run 子命令 CLI 定义
//!
//! 在本机按依赖顺序运行工作流 JSON。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/run.rs`

use clap::Args;
use std::path::PathBuf;

/// run 子命令参数
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow JSON files, or directories containing them
    #[arg(required = true)]
    pub workflows: Vec<PathBuf>,

    /// Root of the launch directories
    #[arg(long, default_value = "launches")]
    pub launch_root: PathBuf,

    /// Directory receiving result files (default: $HOME)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Shell command running VASP (default: $AUTOMAG_VASP_COMMAND or `mpirun vasp_std`)
    #[arg(long)]
    pub vasp_command: Option<String>,

    /// POTCAR library with one `<element>/POTCAR` per species (default: $AUTOMAG_POTCAR_DIR)
    #[arg(long)]
    pub potcar_dir: Option<PathBuf>,

    /// Number of independent fireworks run at the same time
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,
}
