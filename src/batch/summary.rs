//! # 计算目录摘要
//!
//! 读取单个计算目录的 OUTCAR、INCAR 与收敛标记，生成一行摘要。
//!
//! ## 依赖关系
//! - 被 `commands/analyze/runs.rs` 调用
//! - 使用 `batch/runner.rs` 并行处理
//! - 使用 `parsers/outcar.rs`, `parsers/incar.rs`, `models/magnetic.rs`

use super::runner::{BatchResult, BatchRunner, ProcessResult};
use crate::error::{AutomagError, Result};
use crate::models::magnetic::kept_magmoms;
use crate::models::{ConvergenceFlag, VaspRun};
use crate::parsers::{incar, outcar};
use crate::workflow::runner::CONVERGENCE_FILE;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 单个计算目录的摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// 相对于扫描根目录的路径
    pub name: String,
    /// 所属工作流（上一级目录名），用于磁矩保持判断
    pub system: String,
    pub flag: ConvergenceFlag,
    pub run: VaspRun,
    /// INCAR 中的 MAGMOM
    pub initial_magmoms: Option<Vec<f64>>,
    /// 初始与最终磁矩都存在时的保持判断
    pub kept: Option<bool>,
}

impl RunSummary {
    pub fn energy(&self) -> Option<f64> {
        self.run.free_energy
    }
}

fn relative_name(root: &Path, dir: &Path) -> String {
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    if rel.as_os_str().is_empty() {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    } else {
        rel.display().to_string()
    }
}

/// 摘要单个目录
pub fn summarize_run(root: &Path, dir: &Path, hs_cutoff: f64) -> Result<RunSummary> {
    let name = relative_name(root, dir);
    let run = outcar::parse_outcar(&dir.join("OUTCAR"), &name)?;

    // runner 写下的标记优先，否则按 OUTCAR 判断
    let flag = fs::read_to_string(dir.join(CONVERGENCE_FILE))
        .ok()
        .and_then(|s| s.lines().next().and_then(ConvergenceFlag::parse))
        .unwrap_or_else(|| ConvergenceFlag::from_bool(run.converged()));

    let incar_path = dir.join("INCAR");
    let initial_magmoms = if incar_path.exists() {
        let text = fs::read_to_string(&incar_path).map_err(|e| AutomagError::read(&incar_path, e))?;
        incar::read_magmom(&text)
    } else {
        None
    };

    let system = dir
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let kept = match (&initial_magmoms, &run.magmoms) {
        (Some(initial), Some(final_magmoms)) => {
            Some(kept_magmoms(&system, initial, final_magmoms, hs_cutoff))
        }
        _ => None,
    };

    Ok(RunSummary {
        name,
        system,
        flag,
        run,
        initial_magmoms,
        kept,
    })
}

/// 并行摘要所有目录。尚未产生能量的目录记为跳过。
pub fn summarize_runs(root: &Path, dirs: &[PathBuf], jobs: usize, hs_cutoff: f64) -> Result<BatchResult<RunSummary>> {
    BatchRunner::new(jobs).run(dirs, |dir| match summarize_run(root, dir, hs_cutoff) {
        Ok(summary) if summary.run.free_energy.is_none() && !summary.run.is_finished => {
            ProcessResult::Skipped(summary.name)
        }
        Ok(summary) => ProcessResult::Success(summary),
        Err(e) => ProcessResult::Failed(dir.display().to_string(), e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTCAR: &str = "\
   NIONS =       2
  free  energy   TOTEN  =       -10.50000000 eV
 magnetization (x)

# of ion       s       p       d       tot
------------------------------------------
    1        0.010   0.020   3.400   3.430
    2        0.010   0.020  -3.400  -3.370
--------------------------------------------------
tot          0.020   0.040   0.000   0.060

 General timing and accounting informations for this job:
";

    fn make_run(root: &Path, rel: &str, outcar: &str, incar: Option<&str>) -> PathBuf {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("OUTCAR"), outcar).unwrap();
        if let Some(text) = incar {
            fs::write(dir.join("INCAR"), text).unwrap();
        }
        dir
    }

    #[test]
    fn test_summarize_run_with_magmoms() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = make_run(tmp.path(), "afm1/fw1_singlepoint", OUTCAR, Some(" MAGMOM = 4.0 -4.0\n"));
        fs::write(dir.join(CONVERGENCE_FILE), "converged\n").unwrap();

        let summary = summarize_run(tmp.path(), &dir, 0.0).unwrap();
        assert_eq!(summary.name, "afm1/fw1_singlepoint");
        assert_eq!(summary.system, "afm1");
        assert_eq!(summary.flag, ConvergenceFlag::Converged);
        assert_eq!(summary.energy(), Some(-10.5));
        assert_eq!(summary.initial_magmoms, Some(vec![4.0, -4.0]));
        assert_eq!(summary.kept, Some(true));

        let strict = summarize_run(tmp.path(), &dir, 3.4).unwrap();
        assert_eq!(strict.kept, Some(false));
    }

    #[test]
    fn test_summarize_runs_skips_empty_outcar() {
        let tmp = tempfile::tempdir().unwrap();
        let done = make_run(tmp.path(), "fm/fw1_singlepoint", OUTCAR, None);
        let running = make_run(tmp.path(), "fm/fw2_nsc", "   NIONS =       2\n", None);

        let batch = summarize_runs(tmp.path(), &[done, running], 2, 0.0).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.skipped, vec!["fm/fw2_nsc".to_string()]);
        assert_eq!(batch.items[0].kept, None);
    }
}
