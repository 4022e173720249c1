//! # 提交类子命令 CLI 定义
//!
//! `conv`, `lin-response`, `coll` 三个子命令都读取一个阶段输入 JSON，
//! 构建工作流并交给 launchpad。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/conv.rs`, `commands/lin_response.rs`, `commands/coll.rs`

use clap::{Args, ValueEnum};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────
// Launchpad 选择
// ─────────────────────────────────────────────────────────────

/// 工作流提交目标
#[derive(Args, Debug, Clone)]
pub struct LaunchpadArgs {
    /// FireWorks launchpad file; when given, workflows are added with `lpad`
    #[arg(long, env = "AUTOMAG_LAUNCHPAD")]
    pub lpad: Option<PathBuf>,

    /// Directory receiving workflow JSON files when no launchpad is given
    #[arg(long, default_value = "workflows")]
    pub out_dir: PathBuf,
}

// ─────────────────────────────────────────────────────────────
// conv
// ─────────────────────────────────────────────────────────────

/// 收敛测试类型
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ConvMode {
    /// Sweep ENCUT
    Encut,
    /// Sweep SIGMA x k-point length
    Kgrid,
}

impl ConvMode {
    pub fn name(&self) -> &'static str {
        match self {
            ConvMode::Encut => "encut",
            ConvMode::Kgrid => "kgrid",
        }
    }
}

impl std::fmt::Display for ConvMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// conv 子命令参数
#[derive(Args, Debug)]
pub struct ConvArgs {
    /// Stage input JSON (poscar_file, params, sweep values)
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Convergence test to submit
    #[arg(long, value_enum)]
    pub mode: ConvMode,

    #[command(flatten)]
    pub launchpad: LaunchpadArgs,
}

// ─────────────────────────────────────────────────────────────
// lin-response
// ─────────────────────────────────────────────────────────────

/// 线性响应的计算步骤
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LinStep {
    /// Unperturbed single point producing CHGCAR and WAVECAR
    Bare,
    /// Non-self-consistent perturbations reading the bare charge density
    Nsc,
    /// Self-consistent perturbations
    Sc,
}

/// lin-response 子命令参数
#[derive(Args, Debug)]
pub struct LinResponseArgs {
    /// Stage input JSON (poscar_file, params, dummy_atom, perturbations)
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Which step to submit
    #[arg(long, value_enum)]
    pub step: LinStep,

    /// Launch directory of the bare run (required for the nsc step)
    #[arg(long)]
    pub bare_dir: Option<PathBuf>,

    #[command(flatten)]
    pub launchpad: LaunchpadArgs,
}

// ─────────────────────────────────────────────────────────────
// coll
// ─────────────────────────────────────────────────────────────

/// coll 子命令参数
#[derive(Args, Debug)]
pub struct CollArgs {
    /// Stage input JSON (poscar_file, params, magnetic_atoms, spin_value)
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Folder receiving settingNNN.vasp and configurationsNNN.txt (must not exist)
    #[arg(long, default_value = "trials")]
    pub trials_dir: PathBuf,

    /// Folder with pre-generated enumlib `vasp.N` supercells
    #[arg(long)]
    pub enumlib_dir: Option<PathBuf>,

    /// Composition of the enumlib supercells, e.g. Fe12O18
    #[arg(long, requires = "enumlib_dir")]
    pub composition: Option<String>,

    /// Element split into two spin sublattices in the enumlib supercells
    #[arg(long, requires = "enumlib_dir")]
    pub magnetic_atom: Option<String>,

    /// Only write the trials folder, do not submit
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[command(flatten)]
    pub launchpad: LaunchpadArgs,
}
