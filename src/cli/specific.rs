//! # specific 子命令 CLI 定义
//!
//! 复制模板目录，覆盖 INCAR 标签后用 sbatch 提交。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/specific.rs`

use clap::Args;
use std::path::PathBuf;

/// 解析 `TAG=VALUE`
pub fn parse_assignment(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((tag, value)) if !tag.trim().is_empty() && !value.trim().is_empty() => {
            Ok((tag.trim().to_uppercase(), value.trim().to_string()))
        }
        _ => Err(format!("Expected TAG=VALUE, got '{}'", input)),
    }
}

/// specific 子命令参数
#[derive(Args, Debug)]
pub struct SpecificArgs {
    /// Template folder with jobscript, POSCAR, POTCAR, INCAR and optional KPOINTS
    #[arg(long, default_value = "Specific")]
    pub template: PathBuf,

    /// Calculation folder (default: $AUTOMAG_PATH/CalcFold)
    #[arg(long)]
    pub calcfold: Option<PathBuf>,

    /// INCAR tag override, e.g. --set ENCUT=600 (repeatable)
    #[arg(long = "set", value_parser = parse_assignment)]
    pub overrides: Vec<(String, String)>,

    /// Sweep one tag over comma-separated values, e.g. --sweep ENCUT=500,550,600;
    /// each value runs in <calcfold>/<TAG>/<value>
    #[arg(long, value_parser = parse_assignment)]
    pub sweep: Option<(String, String)>,

    /// Wait until all submitted jobs have left the queue
    #[arg(long, default_value_t = false)]
    pub wait: bool,

    /// Seconds between two squeue polls when waiting
    #[arg(long, default_value_t = 30)]
    pub poll_interval: u64,

    /// Only prepare the folders, do not submit
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    // ─────────────────────────────────────────────────────────────
    // 模板中没有 jobscript 时生成
    // ─────────────────────────────────────────────────────────────
    /// Slurm partition
    #[arg(long)]
    pub partition: Option<String>,

    /// Number of nodes
    #[arg(long, default_value_t = 1)]
    pub nodes: u32,

    /// Number of MPI tasks
    #[arg(long, default_value_t = 32)]
    pub ntasks: u32,

    /// Time limit (e.g., '24:00:00')
    #[arg(long, default_value = "24:00:00")]
    pub time: String,

    /// Modules to load (comma-separated)
    #[arg(long, default_value = "")]
    pub modules: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("encut = 600").unwrap(),
            ("ENCUT".to_string(), "600".to_string())
        );
        assert_eq!(
            parse_assignment("MAGMOM=2*4.0 4*0").unwrap().1,
            "2*4.0 4*0"
        );
        assert!(parse_assignment("ENCUT").is_err());
        assert!(parse_assignment("=600").is_err());
    }
}
