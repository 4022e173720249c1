//! # hubbard 分析子命令实现
//!
//! 读取 `charges.txt`（α, NSCF 电子数, SCF 电子数），分别线性回归，
//! U = 1/χ_scf − 1/χ_nscf。
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `fitting.rs`, `parsers/results.rs`

use crate::cli::analyze::HubbardArgs;
use crate::config::Environment;
use crate::error::{AutomagError, Result};
use crate::fitting::hubbard_u;
use crate::parsers::results::read_columns;
use crate::utils::output;

use tabled::{Table, Tabled};

#[derive(Tabled)]
struct FitRow {
    #[tabled(rename = "Response")]
    name: &'static str,
    #[tabled(rename = "Slope")]
    slope: String,
    #[tabled(rename = "Intercept")]
    intercept: String,
    #[tabled(rename = "r")]
    r_value: String,
}

/// 拆成 α, nscf, scf 三列；多余的列忽略
pub fn split_charges(rows: &[Vec<f64>]) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() < 3) {
        return Err(AutomagError::InvalidArgument(format!(
            "row {} has {} columns, expected alpha, nscf and scf",
            i + 1,
            row.len()
        )));
    }
    Ok((
        rows.iter().map(|r| r[0]).collect(),
        rows.iter().map(|r| r[1]).collect(),
        rows.iter().map(|r| r[2]).collect(),
    ))
}

/// 执行 hubbard 分析
pub fn execute(args: HubbardArgs) -> Result<()> {
    output::print_header("Linear Response U");

    let path = match args.charges {
        Some(path) => path,
        None => Environment::from_env().results_dir()?.join("charges.txt"),
    };
    output::print_info(&format!("Reading charges from '{}'", path.display()));

    let rows = read_columns(&path)?;
    let (alpha, nscf, scf) = split_charges(&rows)?;
    let fit = hubbard_u(&alpha, &nscf, &scf)?;

    let table = vec![
        FitRow {
            name: "NSCF",
            slope: format!("{:.4}", fit.nscf.slope),
            intercept: format!("{:.4}", fit.nscf.intercept),
            r_value: format!("{:.4}", fit.nscf.r_value),
        },
        FitRow {
            name: "SCF",
            slope: format!("{:.4}", fit.scf.slope),
            intercept: format!("{:.4}", fit.scf.intercept),
            r_value: format!("{:.4}", fit.scf.r_value),
        },
    ];
    println!("{}", Table::new(&table));

    output::print_value("U", &format!("{:4.2} eV", fit.u));
    output::print_done("Linear response fit completed");
    Ok(())
}
