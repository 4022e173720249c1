//! # couplings 分析子命令实现
//!
//! 读取 `stability` 写出的 settingNNN.vasp, statesNNN.txt, energiesNNN.txt，
//! 在磁性子晶格上拟合 Heisenberg 耦合常数，并用对照组的 Pearson 相关系数
//! 评估模型。可把近邻距离与耦合常数写回输入文件，供 `ucf` 使用。
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `fitting.rs`, `parsers/results.rs`, `parsers/poscar.rs`

use crate::cli::analyze::CouplingsArgs;
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::fitting::{fit_coupling_constants, CouplingFit};
use crate::parsers::poscar::parse_poscar_file;
use crate::parsers::results::{read_json, write_json};
use crate::utils::output;

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

/// 拟合结果的 JSON 形式
#[derive(Debug, Serialize)]
struct CouplingReport<'a> {
    setting: String,
    cutoff_radius: f64,
    distances_between_neighbors: &'a [f64],
    counts: &'a [usize],
    e0: f64,
    coupling_constants: &'a [f64],
    control_predictions: &'a [f64],
    control_energies: &'a [f64],
    pcc: Option<f64>,
}

#[derive(Tabled)]
struct ShellRow {
    #[tabled(rename = "Shell")]
    shell: usize,
    #[tabled(rename = "Distance (Å)")]
    distance: String,
    #[tabled(rename = "Pairs")]
    count: usize,
    #[tabled(rename = "J (J)")]
    coupling: String,
}

/// 目录中匹配 `prefix*suffix` 的文件；有多个时取最后一个
fn find_input(dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
    let pattern = dir.join(format!("{}*{}", prefix, suffix));
    let pattern = pattern.to_string_lossy();
    let mut found: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| AutomagError::InvalidArgument(e.to_string()))?
        .filter_map(|e| e.ok())
        .filter(|p| p.is_file())
        .collect();
    found.sort();

    match found.len() {
        0 => Err(AutomagError::NoFilesFound {
            pattern: pattern.into_owned(),
        }),
        1 => Ok(found.remove(0)),
        n => {
            let last = found.remove(n - 1);
            output::print_warning(&format!(
                "{} files match '{}', using {}",
                n,
                pattern,
                last.display()
            ));
            Ok(last)
        }
    }
}

/// 把拟合结果写回输入 JSON，保留其余键
pub fn update_input_file(path: &Path, fit: &CouplingFit) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    let mut value: serde_json::Value = serde_json::from_str(&text)?;
    let object = value.as_object_mut().ok_or_else(|| AutomagError::ParseError {
        format: "json".into(),
        path: path.display().to_string(),
        reason: "the input file is not a JSON object".into(),
    })?;

    object.insert(
        "distances_between_neighbors".into(),
        serde_json::to_value(&fit.distances)?,
    );
    object.insert(
        "coupling_constants".into(),
        serde_json::to_value(&fit.coupling_constants)?,
    );

    let text = serde_json::to_string_pretty(&value)?;
    fs::write(path, text + "\n").map_err(|e| AutomagError::write(path, e))
}

/// 执行 couplings 分析
pub fn execute(args: CouplingsArgs) -> Result<()> {
    output::print_header("Heisenberg Coupling Constants");

    let input = StageInput::from_file(&args.input)?;
    let setting_path = find_input(&args.data_dir, "setting", ".vasp")?;
    let states_path = find_input(&args.data_dir, "states", ".txt")?;
    let energies_path = find_input(&args.data_dir, "energies", ".txt")?;

    let setting = parse_poscar_file(&setting_path)?;
    let states: Vec<Vec<i32>> = read_json(&states_path)?;
    let energies: Vec<f64> = read_json(&energies_path)?;
    output::print_info(&format!(
        "{} configurations from {}",
        states.len(),
        setting_path.display()
    ));

    let selector = input.selector();
    let magnetic = setting.retain_atoms(|a| selector.is_magnetic(&a.element));
    if magnetic.is_empty() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} has no magnetic atoms",
            setting_path.display()
        )));
    }
    let neighbors = magnetic.neighbor_list(input.cutoff_radius);
    log::debug!(
        "{} magnetic atoms, {} neighbor pairs within {} Å",
        magnetic.len(),
        neighbors.len(),
        input.cutoff_radius
    );

    let fit = fit_coupling_constants(&neighbors, &states, &energies, input.control_group_size)?;

    let rows: Vec<ShellRow> = fit
        .distances
        .iter()
        .zip(&fit.counts)
        .zip(&fit.coupling_constants)
        .enumerate()
        .map(|(i, ((d, n), j))| ShellRow {
            shell: i + 1,
            distance: format!("{:.2}", d),
            count: *n,
            coupling: format!("{:.8e}", j),
        })
        .collect();
    println!("{}", Table::new(&rows));

    output::print_info(&format!("distances between neighbors: {:?}", fit.distances));
    output::print_info(&format!("counts: {:?}", fit.counts));
    let constants: Vec<String> = fit.coupling_constants.iter().map(|j| format!("{:.8e}", j)).collect();
    output::print_info(&format!("coupling constants: [{}]", constants.join(", ")));
    match fit.pcc {
        Some(pcc) => output::print_value("PCC", &format!("{:.2}", pcc)),
        None => output::print_warning("The control group is too small to compute the PCC"),
    }

    if args.update_input {
        update_input_file(&args.input, &fit)?;
        output::print_success(&format!("Coupling constants written to '{}'", args.input.display()));
    }

    if let Some(path) = &args.output_json {
        let report = CouplingReport {
            setting: setting_path.display().to_string(),
            cutoff_radius: input.cutoff_radius,
            distances_between_neighbors: &fit.distances,
            counts: &fit.counts,
            e0: fit.e0,
            coupling_constants: &fit.coupling_constants,
            control_predictions: &fit.predictions,
            control_energies: &fit.control_energies,
            pcc: fit.pcc,
        };
        write_json(path, &report)?;
        output::print_success(&format!("Fit saved to '{}'", path.display()));
    }

    output::print_done(&format!("{} coupling constants fitted", fit.coupling_constants.len()));
    Ok(())
}
