//! # critical 分析子命令实现
//!
//! 用 Bloch 曲线 `(1 - T/Tc)^β` 拟合 Vampire 的磁化曲线，估计临界温度。
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `fitting.rs`, `parsers/results.rs`

use super::save_csv;
use crate::cli::analyze::CriticalArgs;
use crate::error::{AutomagError, Result};
use crate::fitting::{bloch_curve, critical_temperature};
use crate::parsers::results::read_columns;
use crate::utils::output;

/// 温度取第一列，磁化取最后一列
pub fn magnetization_curve(rows: &[Vec<f64>]) -> Result<(Vec<f64>, Vec<f64>)> {
    if let Some(i) = rows.iter().position(|r| r.len() < 2) {
        return Err(AutomagError::InvalidArgument(format!(
            "row {} needs at least a temperature and a magnetization column",
            i + 1
        )));
    }
    Ok((
        rows.iter().map(|r| r[0]).collect(),
        rows.iter().filter_map(|r| r.last().copied()).collect(),
    ))
}

/// 执行 critical 分析
pub fn execute(args: CriticalArgs) -> Result<()> {
    output::print_header("Critical Temperature");

    let rows = read_columns(&args.file)?;
    let (temperatures, magnetization) = magnetization_curve(&rows)?;
    output::print_info(&format!(
        "{} temperatures read from '{}', β = {}",
        temperatures.len(),
        args.file.display(),
        args.exponent
    ));

    let fit = critical_temperature(&temperatures, &magnetization, args.exponent)?;
    log::debug!("Bloch curve residual at Tc = {}: {:.6e}", fit.tc, fit.residual);

    if let Some(path) = &args.output_csv {
        let csv_rows: Vec<Vec<String>> = temperatures
            .iter()
            .zip(&magnetization)
            .map(|(t, m)| {
                vec![
                    t.to_string(),
                    m.to_string(),
                    format!("{:.6}", bloch_curve(*t, fit.tc, args.exponent)),
                ]
            })
            .collect();
        save_csv(path, &["temperature_K", "magnetization", "bloch_curve"], &csv_rows)?;
        output::print_success(&format!("Curves saved to '{}'", path.display()));
    }

    output::print_value("Tc", &format!("{} K", fit.tc));
    output::print_done(&format!("The estimated critical temperature is {} K.", fit.tc));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnetization_curve_uses_last_column() {
        let rows = vec![vec![0.0, 0.5, 1.0], vec![100.0, 0.4, 0.8]];
        let (t, m) = magnetization_curve(&rows).unwrap();
        assert_eq!(t, vec![0.0, 100.0]);
        assert_eq!(m, vec![1.0, 0.8]);

        assert!(magnetization_curve(&[vec![10.0]]).is_err());
    }
}
