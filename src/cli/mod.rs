//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `conv`: ENCUT / SIGMA × k 点收敛测试
//! - `lin-response`: 线性响应 Hubbard U
//! - `coll`: 枚举共线磁性配置并提交单点计算
//! - `run`: 在本地运行工作流 JSON
//! - `specific`: 基于模板目录向 Slurm 提交计算
//! - `analyze`: 分析功能（嵌套子命令）
//!   - `runs`, `convergence`, `stability`, `couplings`, `hubbard`, `critical`
//! - `ucf`: 写出 Vampire 晶胞文件
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: submit, run, specific, analyze, ucf

pub mod analyze;
pub mod run;
pub mod specific;
pub mod submit;
pub mod ucf;

use clap::{ArgAction, Parser, Subcommand};

/// automag - 磁性材料 VASP 工作流工具
#[derive(Parser)]
#[command(name = "automag")]
#[command(version)]
#[command(about = "Automated magnetic workflows for VASP: convergence, Hubbard U, collinear configurations and Monte Carlo input", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Submit ENCUT or SIGMA x k-point convergence tests
    Conv(submit::ConvArgs),

    /// Submit linear-response Hubbard U calculations (bare, nsc or sc step)
    LinResponse(submit::LinResponseArgs),

    /// Enumerate collinear magnetic configurations and submit single-point runs
    Coll(submit::CollArgs),

    /// Run workflow JSON files on this machine
    Run(run::RunArgs),

    /// Copy a template folder, override INCAR tags and submit with sbatch
    Specific(specific::SpecificArgs),

    /// Analyze workflow results
    Analyze(analyze::AnalyzeArgs),

    /// Write the Vampire unit cell file for a magnetic configuration
    Ucf(ucf::UcfArgs),
}
