//! # analyze 子命令 CLI 定义
//!
//! 分析功能统一入口，包含多个子命令：
//! - `runs`: 扫描计算目录
//! - `convergence`: 收敛测试结果
//! - `stability`: 共线配置的稳定性排序
//! - `couplings`: Heisenberg 耦合常数拟合
//! - `hubbard`: 线性响应 U
//! - `critical`: 由磁化曲线估计临界温度
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/analyze/` 相应模块

use super::submit::ConvMode;
use clap::{Args, Subcommand};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────
// Analyze 主命令
// ─────────────────────────────────────────────────────────────

/// analyze 主命令参数
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(subcommand)]
    pub command: AnalyzeCommands,
}

/// analyze 子命令
#[derive(Subcommand, Debug)]
pub enum AnalyzeCommands {
    /// Scan calculation folders and summarize their OUTCARs
    Runs(RunsArgs),

    /// Tabulate convergence test energies per atom
    Convergence(ConvergenceArgs),

    /// Rank collinear configurations and export states/energies for the coupling fit
    Stability(StabilityArgs),

    /// Fit Heisenberg coupling constants
    Couplings(CouplingsArgs),

    /// Compute the linear-response Hubbard U from charges.txt
    Hubbard(HubbardArgs),

    /// Estimate the critical temperature from a Vampire magnetization curve
    Critical(CriticalArgs),
}

// ─────────────────────────────────────────────────────────────
// runs
// ─────────────────────────────────────────────────────────────

/// runs 子命令参数
#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Root directory containing calculation folders
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Glob pattern for folder names (comma-separated)
    #[arg(long, default_value = "*")]
    pub pattern: String,

    /// Recurse into subdirectories
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Minimum |magmom| on magnetic sites for a configuration to count as kept
    #[arg(long, default_value_t = 0.0)]
    pub hs_cutoff: f64,

    /// Save the summary to CSV
    #[arg(long)]
    pub output_csv: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────
// convergence
// ─────────────────────────────────────────────────────────────

/// convergence 子命令参数
#[derive(Args, Debug)]
pub struct ConvergenceArgs {
    /// Stage input JSON used for the convergence test
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Convergence test to analyze
    #[arg(long, value_enum)]
    pub mode: ConvMode,

    /// Results file (default: <CalcFold or $HOME>/<formula>_<mode>.txt)
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Save the table to CSV
    #[arg(long)]
    pub output_csv: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────
// stability
// ─────────────────────────────────────────────────────────────

/// stability 子命令参数
#[derive(Args, Debug)]
pub struct StabilityArgs {
    /// Stage input JSON used by `coll`
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Folder written by `coll`
    #[arg(long, default_value = "trials")]
    pub trials_dir: PathBuf,

    /// Results file (default: <CalcFold or $HOME>/<formula>_singlepoint.txt)
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Override hs_cutoff from the input file
    #[arg(long)]
    pub hs_cutoff: Option<f64>,

    /// Folder receiving statesNNN.txt, energiesNNN.txt and settingNNN.vasp
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Save the ranking to CSV
    #[arg(long)]
    pub output_csv: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────
// couplings
// ─────────────────────────────────────────────────────────────

/// couplings 子命令参数
#[derive(Args, Debug)]
pub struct CouplingsArgs {
    /// Stage input JSON (cutoff_radius, control_group_size, magnetic_atoms)
    #[arg(default_value = "input.json")]
    pub input: PathBuf,

    /// Folder with settingNNN.vasp, statesNNN.txt and energiesNNN.txt
    #[arg(long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Write distances_between_neighbors and coupling_constants back into the input file
    #[arg(long, default_value_t = false)]
    pub update_input: bool,

    /// Save the full fit as JSON
    #[arg(long)]
    pub output_json: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────
// hubbard
// ─────────────────────────────────────────────────────────────

/// hubbard 子命令参数
#[derive(Args, Debug)]
pub struct HubbardArgs {
    /// Columns α, nscf, scf (default: <CalcFold or $HOME>/charges.txt)
    #[arg(long)]
    pub charges: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────
// critical
// ─────────────────────────────────────────────────────────────

/// critical 子命令参数
#[derive(Args, Debug)]
pub struct CriticalArgs {
    /// Vampire output file: temperature in the first column, magnetization in the last
    #[arg(default_value = "output")]
    pub file: PathBuf,

    /// Critical exponent of the Bloch curve
    #[arg(long, default_value_t = crate::fitting::DEFAULT_CRITICAL_EXPONENT)]
    pub exponent: f64,

    /// Save temperature, magnetization and fitted curve to CSV
    #[arg(long)]
    pub output_csv: Option<PathBuf>,
}
