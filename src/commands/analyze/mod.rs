//! # analyze 命令实现
//!
//! 分析功能统一入口，包含多个子命令：
//! - `runs`: 计算目录摘要
//! - `convergence`: 收敛测试
//! - `stability`: 共线配置稳定性
//! - `couplings`: Heisenberg 耦合常数
//! - `hubbard`: 线性响应 U
//! - `critical`: 临界温度
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 子模块: runs, convergence, stability, couplings, hubbard, critical

pub mod convergence;
pub mod couplings;
pub mod critical;
pub mod hubbard;
pub mod runs;
pub mod stability;

use crate::cli::analyze::{AnalyzeArgs, AnalyzeCommands};
use crate::config::Environment;
use crate::error::{AutomagError, Result};
use crate::models::Crystal;

use std::path::{Path, PathBuf};

/// 执行 analyze 命令
pub fn execute(args: AnalyzeArgs) -> Result<()> {
    match args.command {
        AnalyzeCommands::Runs(a) => runs::execute(a),
        AnalyzeCommands::Convergence(a) => convergence::execute(a),
        AnalyzeCommands::Stability(a) => stability::execute(a),
        AnalyzeCommands::Couplings(a) => couplings::execute(a),
        AnalyzeCommands::Hubbard(a) => hubbard::execute(a),
        AnalyzeCommands::Critical(a) => critical::execute(a),
    }
}

/// 结果文件路径：显式给出，或 `<results_dir>/<约化化学式>_<模式>.txt`
pub(crate) fn results_path(explicit: Option<&Path>, crystal: &Crystal, mode: &str) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let dir = Environment::from_env().results_dir()?;
            Ok(dir.join(format!("{}_{}.txt", crystal.reduced_formula(), mode)))
        }
    }
}

/// 写出 CSV 表格
pub(crate) fn save_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(AutomagError::CsvError)?;
    wtr.write_record(header).map_err(AutomagError::CsvError)?;
    for row in rows {
        wtr.write_record(row).map_err(AutomagError::CsvError)?;
    }
    wtr.flush().map_err(|e| AutomagError::write(path, e))?;
    Ok(())
}
