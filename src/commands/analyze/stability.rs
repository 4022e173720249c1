//! # stability 分析子命令实现
//!
//! 把单点计算结果与 trials 目录中的配置对应起来，按每磁性原子能量排序，
//! 检查磁矩是否保持，并为耦合常数拟合选出保持配置最多的几何设置：
//! ```text
//! statesNNN.txt     [[1, -1, ...], ...]   初始自旋的符号
//! energiesNNN.txt   [-8.123, ...]          eV / 磁性原子
//! settingNNN.vasp   从 trials/ 复制
//! ```
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `parsers/results.rs`, `models/magnetic.rs`, `config.rs`

use super::{results_path, save_csv};
use crate::cli::analyze::StabilityArgs;
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::magnetic::kept_magmoms;
use crate::models::ResultRecord;
use crate::parsers::results::{read_results_file, read_trial_configurations, write_json, ConfigurationEntry};
use crate::utils::output;

use std::collections::HashMap;
use std::fs;
use tabled::{Table, Tabled};

/// 一个已完成计算的配置
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityEntry {
    pub state: String,
    pub setting: usize,
    pub spins: Vec<i32>,
    /// eV / 磁性原子
    pub energy: f64,
    pub kept: bool,
}

/// 配置与结果的对应情况
#[derive(Debug, Default)]
pub struct StabilityAnalysis {
    /// 按 trials 文件中的顺序
    pub entries: Vec<StabilityEntry>,
    /// 未收敛而被排除的配置
    pub nonconverged: Vec<String>,
}

impl StabilityAnalysis {
    /// 能量最低的配置
    pub fn most_stable(&self) -> Option<&StabilityEntry> {
        self.entries.iter().min_by(|a, b| a.energy.total_cmp(&b.energy))
    }
}

/// 用于拟合的设置：编号、状态符号与能量
#[derive(Debug, Clone, PartialEq)]
pub struct FitSelection {
    pub setting: usize,
    pub states: Vec<Vec<i32>>,
    pub energies: Vec<f64>,
}

#[derive(Tabled)]
struct StabilityRow {
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Setting")]
    setting: usize,
    #[tabled(rename = "ΔE (meV/mag. atom)")]
    delta: String,
    #[tabled(rename = "Kept")]
    kept: String,
}

/// 对应配置与结果
///
/// 结果文件中同一标签出现多次时取最后一条。
pub fn analyze(
    settings: &[(usize, Vec<ConfigurationEntry>)],
    records: &[ResultRecord],
    hs_cutoff: f64,
) -> StabilityAnalysis {
    let by_label: HashMap<&str, &ResultRecord> = records.iter().map(|r| (r.label.as_str(), r)).collect();
    let mut analysis = StabilityAnalysis::default();

    for (setting, configurations) in settings {
        for conf in configurations {
            let Some(record) = by_label.get(conf.state.as_str()) else {
                continue;
            };
            if !record.is_converged() {
                analysis.nonconverged.push(conf.state.clone());
                continue;
            }
            let kept = match (&record.initial_magmoms, &record.final_magmoms) {
                (Some(initial), Some(final_magmoms)) => {
                    kept_magmoms(&conf.state, initial, final_magmoms, hs_cutoff)
                }
                _ => false,
            };
            let magnetic = conf.spins.len().max(1) as f64;
            analysis.entries.push(StabilityEntry {
                state: conf.state.clone(),
                setting: *setting,
                spins: conf.spins.clone(),
                energy: record.energy / magnetic,
                kept,
            });
        }
    }
    analysis
}

/// 选出保持磁矩的非 `nm` 配置最多的设置，数量相同时取编号小的
pub fn select_fit_setting(entries: &[StabilityEntry]) -> Option<FitSelection> {
    let mut settings: Vec<usize> = entries.iter().map(|e| e.setting).collect();
    settings.sort_unstable();
    settings.dedup();

    let mut best: Option<FitSelection> = None;
    for setting in settings {
        let usable: Vec<&StabilityEntry> = entries
            .iter()
            .filter(|e| e.setting == setting && e.kept && e.state != "nm")
            .collect();
        let current = best.as_ref().map_or(0, |b| b.states.len());
        if usable.len() > current {
            best = Some(FitSelection {
                setting,
                states: usable
                    .iter()
                    .map(|e| e.spins.iter().map(|s| s.signum()).collect())
                    .collect(),
                energies: usable.iter().map(|e| e.energy).collect(),
            });
        }
    }
    best
}

/// 执行 stability 分析
pub fn execute(args: StabilityArgs) -> Result<()> {
    output::print_header("Collinear Configuration Stability");

    if !args.trials_dir.is_dir() {
        return Err(AutomagError::DirectoryNotFound {
            path: args.trials_dir.display().to_string(),
        });
    }

    let input = StageInput::from_file(&args.input)?;
    let crystal = input.crystal()?;
    let hs_cutoff = args.hs_cutoff.unwrap_or(input.hs_cutoff);
    let path = results_path(args.results.as_deref(), &crystal, "singlepoint")?;
    output::print_info(&format!("Reading results from '{}'", path.display()));

    let records = read_results_file(&path)?;
    let settings = read_trial_configurations(&args.trials_dir)?;
    let analysis = analyze(&settings, &records, hs_cutoff);

    for state in &analysis.nonconverged {
        output::print_warning(&format!(
            "Energy calculation of {} did not converge and will be excluded",
            state
        ));
    }
    for entry in analysis.entries.iter().filter(|e| !e.kept) {
        output::print_warning(&format!("{} did not keep the original magmoms", entry.state));
    }

    let Some(most_stable) = analysis.most_stable() else {
        output::print_warning("No converged configuration found in the results file.");
        return Ok(());
    };
    let minimum = most_stable.energy;

    let rows: Vec<StabilityRow> = analysis
        .entries
        .iter()
        .map(|e| StabilityRow {
            state: e.state.clone(),
            setting: e.setting,
            delta: format!("{:.3}", (e.energy - minimum) * 1000.0),
            kept: if e.kept { "yes" } else { "no" }.to_string(),
        })
        .collect();
    println!("{}", Table::new(&rows));

    output::print_info(&format!("The most stable configuration is {}.", most_stable.state));
    if !most_stable.kept {
        output::print_warning("Values of initial and final magnetic moments significantly differ.");
    }

    match select_fit_setting(&analysis.entries) {
        Some(selection) => {
            fs::create_dir_all(&args.out_dir).map_err(|e| AutomagError::write(&args.out_dir, e))?;
            let states_path = args.out_dir.join(format!("states{:03}.txt", selection.setting));
            let energies_path = args.out_dir.join(format!("energies{:03}.txt", selection.setting));
            write_json(&states_path, &selection.states)?;
            write_json(&energies_path, &selection.energies)?;

            let name = format!("setting{:03}.vasp", selection.setting);
            let src = args.trials_dir.join(&name);
            let dst = args.out_dir.join(&name);
            fs::copy(&src, &dst).map_err(|e| AutomagError::read(&src, e))?;

            output::print_success(&format!(
                "{} configurations of setting {:03} written to '{}'",
                selection.states.len(),
                selection.setting,
                args.out_dir.display()
            ));
        }
        None => output::print_warning("No setting has configurations that kept their magmoms."),
    }

    if let Some(csv_path) = &args.output_csv {
        let csv_rows: Vec<Vec<String>> = analysis
            .entries
            .iter()
            .map(|e| {
                vec![
                    e.state.clone(),
                    e.setting.to_string(),
                    format!("{:.10}", e.energy),
                    format!("{:.6}", (e.energy - minimum) * 1000.0),
                    e.kept.to_string(),
                ]
            })
            .collect();
        save_csv(
            csv_path,
            &["state", "setting", "energy_eV_per_magnetic_atom", "delta_meV", "kept"],
            &csv_rows,
        )?;
        output::print_success(&format!("Ranking saved to '{}'", csv_path.display()));
    }

    output::print_done(&format!("{} configurations analyzed", analysis.entries.len()));
    Ok(())
}
