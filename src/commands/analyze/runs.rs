//! # runs 分析子命令实现
//!
//! 扫描包含 OUTCAR 的计算目录，并行解析后按能量排序输出表格。
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `batch/` 收集与并行处理
//! - 使用 `utils/output.rs`

use super::save_csv;
use crate::batch::{summarize_runs, RunCollector, RunSummary};
use crate::cli::analyze::RunsArgs;
use crate::error::{AutomagError, Result};
use crate::models::ConvergenceFlag;
use crate::utils::output;

use tabled::{Table, Tabled};

/// 表格行
#[derive(Debug, Clone, Tabled)]
struct RunRow {
    #[tabled(rename = "Run")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Energy (eV)")]
    energy: String,
    #[tabled(rename = "E/atom (eV)")]
    energy_per_atom: String,
    #[tabled(rename = "Total |M|")]
    total_moment: String,
    #[tabled(rename = "Kept")]
    kept: String,
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

impl From<&RunSummary> for RunRow {
    fn from(s: &RunSummary) -> Self {
        RunRow {
            name: s.name.clone(),
            status: s.flag.to_string(),
            energy: or_dash(s.energy().map(|e| format!("{:.6}", e))),
            energy_per_atom: or_dash(s.run.energy_per_atom().map(|e| format!("{:.6}", e))),
            total_moment: or_dash(
                s.run
                    .magmoms
                    .as_ref()
                    .map(|m| format!("{:.3}", m.iter().map(|x| x.abs()).sum::<f64>())),
            ),
            kept: or_dash(s.kept.map(|k| if k { "yes" } else { "no" }.to_string())),
        }
    }
}

/// 按能量从低到高排序，无能量的排在最后
pub fn sort_by_energy(summaries: &mut [RunSummary]) {
    summaries.sort_by(|a, b| match (a.energy(), b.energy()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}

/// 执行 runs 分析
pub fn execute(args: RunsArgs) -> Result<()> {
    output::print_header("Calculation Summary");

    if !args.root.is_dir() {
        return Err(AutomagError::DirectoryNotFound {
            path: args.root.display().to_string(),
        });
    }

    let dirs = RunCollector::new(args.root.clone())
        .with_pattern(&args.pattern)
        .recursive(args.recursive)
        .collect();
    if dirs.is_empty() {
        return Err(AutomagError::NoFilesFound {
            pattern: format!("{}/{}/OUTCAR", args.root.display(), args.pattern),
        });
    }
    output::print_info(&format!("Found {} calculation folders", dirs.len()));

    let mut result = summarize_runs(&args.root, &dirs, args.jobs, args.hs_cutoff)?;
    for name in &result.skipped {
        output::print_skip(&format!("{} has not produced an energy yet", name));
    }
    for (path, err) in &result.failures {
        output::print_warning(&format!("{}: {}", path, err));
    }
    if result.items.is_empty() {
        output::print_warning("No calculation with an energy found.");
        return Ok(());
    }

    sort_by_energy(&mut result.items);
    let rows: Vec<RunRow> = result.items.iter().map(RunRow::from).collect();
    println!("{}", Table::new(&rows));

    let nonconverged = result
        .items
        .iter()
        .filter(|s| s.flag == ConvergenceFlag::NonConverged)
        .count();
    if nonconverged > 0 {
        output::print_warning(&format!("{} calculation(s) did not converge", nonconverged));
    }

    if let Some(path) = &args.output_csv {
        let csv_rows: Vec<Vec<String>> = result
            .items
            .iter()
            .map(|s| {
                vec![
                    s.name.clone(),
                    s.flag.to_string(),
                    s.energy().map(|e| format!("{:.10}", e)).unwrap_or_default(),
                    s.run.num_atoms.map(|n| n.to_string()).unwrap_or_default(),
                    s.kept.map(|k| k.to_string()).unwrap_or_default(),
                ]
            })
            .collect();
        save_csv(path, &["run", "status", "energy_eV", "num_atoms", "kept"], &csv_rows)?;
        output::print_success(&format!("Summary saved to '{}'", path.display()));
    }

    output::print_done(&format!(
        "{} of {} folders summarized",
        result.items.len(),
        result.total()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VaspRun;

    fn summary(name: &str, energy: Option<f64>) -> RunSummary {
        let mut run = VaspRun::new(name);
        run.free_energy = energy;
        RunSummary {
            name: name.to_string(),
            system: String::new(),
            flag: ConvergenceFlag::Converged,
            run,
            initial_magmoms: None,
            kept: None,
        }
    }

    #[test]
    fn test_sort_by_energy() {
        let mut items = vec![
            summary("b", None),
            summary("fm", Some(-10.0)),
            summary("afm1", Some(-10.5)),
            summary("a", None),
        ];
        sort_by_energy(&mut items);
        let names: Vec<&str> = items.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["afm1", "fm", "a", "b"]);
    }

    #[test]
    fn test_row_formatting() {
        let mut s = summary("afm1", Some(-10.5));
        s.run.num_atoms = Some(2);
        s.run.magmoms = Some(vec![3.43, -3.37]);
        s.kept = Some(true);

        let row = RunRow::from(&s);
        assert_eq!(row.energy, "-10.500000");
        assert_eq!(row.energy_per_atom, "-5.250000");
        assert_eq!(row.total_moment, "6.800");
        assert_eq!(row.kept, "yes");
    }
}
