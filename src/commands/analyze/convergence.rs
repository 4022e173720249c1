//! # convergence 分析子命令实现
//!
//! 读取收敛测试的结果文件，给出每原子能量随 ENCUT 或 k 点长度的变化。
//! kgrid 测试按 SIGMA 分组，每组内按 k 点排序。ΔE 相对于每组最后一个
//! （参数最大的）取值，单位 meV/atom。
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `parsers/results.rs`, `config.rs`

use super::{results_path, save_csv};
use crate::cli::analyze::ConvergenceArgs;
use crate::cli::submit::ConvMode;
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::ResultRecord;
use crate::parsers::results::read_results_file;
use crate::utils::output;

use tabled::{Table, Tabled};

/// 收敛曲线上的一点
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergencePoint {
    /// kgrid 测试的 SIGMA
    pub sigma: Option<f64>,
    /// ENCUT 或 k 点长度
    pub value: f64,
    pub energy_per_atom: f64,
    /// 相对同组最后一点 (meV/atom)
    pub delta_mev: f64,
    pub converged: bool,
}

#[derive(Tabled)]
struct ConvergenceRow {
    #[tabled(rename = "SIGMA")]
    sigma: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "E/atom (eV)")]
    energy: String,
    #[tabled(rename = "ΔE (meV/atom)")]
    delta: String,
}

fn label_error(label: &str) -> AutomagError {
    AutomagError::ParseError {
        format: "results".into(),
        path: "<results>".into(),
        reason: format!("Unexpected label '{}' for a convergence test", label),
    }
}

/// 从标签解析 (sigma, value)：`encut500` 或 `kgrid0.1-30`
fn parse_label(label: &str, mode: ConvMode) -> Result<(Option<f64>, f64)> {
    let rest = label.strip_prefix(mode.name()).ok_or_else(|| label_error(label))?;
    match mode {
        ConvMode::Encut => {
            let value = rest.parse().map_err(|_| label_error(label))?;
            Ok((None, value))
        }
        ConvMode::Kgrid => {
            let (sigma, kpts) = rest.split_once('-').ok_or_else(|| label_error(label))?;
            let sigma = sigma.parse().map_err(|_| label_error(label))?;
            let kpts = kpts.parse().map_err(|_| label_error(label))?;
            Ok((Some(sigma), kpts))
        }
    }
}

/// 构建收敛曲线
pub fn convergence_points(records: &[ResultRecord], mode: ConvMode, num_atoms: usize) -> Result<Vec<ConvergencePoint>> {
    if num_atoms == 0 {
        return Err(AutomagError::InvalidArgument("The structure has no atoms".into()));
    }

    let mut points = records
        .iter()
        .map(|r| {
            let (sigma, value) = parse_label(&r.label, mode)?;
            Ok(ConvergencePoint {
                sigma,
                value,
                energy_per_atom: r.energy / num_atoms as f64,
                delta_mev: 0.0,
                converged: r.is_converged(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    points.sort_by(|a, b| {
        let sa = a.sigma.unwrap_or(0.0);
        let sb = b.sigma.unwrap_or(0.0);
        sa.total_cmp(&sb).then(a.value.total_cmp(&b.value))
    });

    // 每组的参考能量为组内最后一点
    let mut start = 0;
    while start < points.len() {
        let end = points[start..]
            .iter()
            .position(|p| p.sigma != points[start].sigma)
            .map_or(points.len(), |n| start + n);
        let reference = points[end - 1].energy_per_atom;
        for p in &mut points[start..end] {
            p.delta_mev = (p.energy_per_atom - reference) * 1000.0;
        }
        start = end;
    }
    Ok(points)
}

/// 执行 convergence 分析
pub fn execute(args: ConvergenceArgs) -> Result<()> {
    output::print_header(&format!("Convergence Test: {}", args.mode));

    let input = StageInput::from_file(&args.input)?;
    let crystal = input.crystal()?;
    let path = results_path(args.results.as_deref(), &crystal, args.mode.name())?;
    output::print_info(&format!("Reading results from '{}'", path.display()));

    let records = read_results_file(&path)?;
    if records.is_empty() {
        return Err(AutomagError::InsufficientData(format!(
            "{} contains no results",
            path.display()
        )));
    }
    for r in records.iter().filter(|r| !r.is_converged()) {
        output::print_warning(&format!(
            "{} did not converge at the {} stage",
            r.label,
            r.first_nonconverged().unwrap_or("?")
        ));
    }

    let points = convergence_points(&records, args.mode, crystal.len())?;
    let sigma_text = |p: &ConvergencePoint| p.sigma.map(|s| s.to_string()).unwrap_or_else(|| "-".into());

    let rows: Vec<ConvergenceRow> = points
        .iter()
        .map(|p| ConvergenceRow {
            sigma: sigma_text(p),
            value: p.value.to_string(),
            energy: format!("{:.6}", p.energy_per_atom),
            delta: format!("{:.3}", p.delta_mev),
        })
        .collect();
    println!("{}", Table::new(&rows));

    if let Some(csv_path) = &args.output_csv {
        let csv_rows: Vec<Vec<String>> = points
            .iter()
            .map(|p| {
                vec![
                    p.sigma.map(|s| s.to_string()).unwrap_or_default(),
                    p.value.to_string(),
                    format!("{:.10}", p.energy_per_atom),
                    format!("{:.6}", p.delta_mev),
                    p.converged.to_string(),
                ]
            })
            .collect();
        save_csv(
            csv_path,
            &["sigma", "value", "energy_per_atom_eV", "delta_meV", "converged"],
            &csv_rows,
        )?;
        output::print_success(&format!("Table saved to '{}'", csv_path.display()));
    }

    output::print_done(&format!("{} results analyzed", points.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::results::parse_results;

    const ENCUT: &str = "\
encut600         3    singlepoint=converged     Fe2O3         energy=-40.0
encut500         2    singlepoint=converged     Fe2O3         energy=-39.5
encut700         4    singlepoint=NONCONVERGED  Fe2O3         energy=-40.05
";

    const KGRID: &str = "\
kgrid0.1-40      1    singlepoint=converged     Fe2O3         energy=-40.0
kgrid0.05-30     2    singlepoint=converged     Fe2O3         energy=-39.9
kgrid0.1-30      3    singlepoint=converged     Fe2O3         energy=-39.8
kgrid0.05-40     4    singlepoint=converged     Fe2O3         energy=-40.0
";

    #[test]
    fn test_encut_points() {
        let records = parse_results(ENCUT).unwrap();
        let points = convergence_points(&records, ConvMode::Encut, 5).unwrap();

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![500.0, 600.0, 700.0]);
        assert!((points[0].energy_per_atom + 7.9).abs() < 1e-12);
        assert!((points[0].delta_mev - 110.0).abs() < 1e-9);
        assert_eq!(points[2].delta_mev, 0.0);
        assert!(!points[2].converged);
    }

    #[test]
    fn test_kgrid_groups_by_sigma() {
        let records = parse_results(KGRID).unwrap();
        let points = convergence_points(&records, ConvMode::Kgrid, 10).unwrap();

        let keys: Vec<(Option<f64>, f64)> = points.iter().map(|p| (p.sigma, p.value)).collect();
        assert_eq!(
            keys,
            vec![(Some(0.05), 30.0), (Some(0.05), 40.0), (Some(0.1), 30.0), (Some(0.1), 40.0)]
        );
        assert!((points[0].delta_mev - 10.0).abs() < 1e-9);
        assert!((points[2].delta_mev - 20.0).abs() < 1e-9);
        assert_eq!(points[3].delta_mev, 0.0);
    }

    #[test]
    fn test_wrong_mode_label() {
        let records = parse_results(ENCUT).unwrap();
        assert!(convergence_points(&records, ConvMode::Kgrid, 5).is_err());
    }
}
