//! # ucf 命令实现
//!
//! 为 Vampire 写出单胞文件：在 trials 目录中找到 `configuration_label`
//! 对应的设置，只保留磁性原子，按自旋符号分配材料编号，
//! 并用拟合得到的耦合常数写出交换相互作用。
//!
//! ## 依赖关系
//! - 使用 `cli/ucf.rs` 定义的参数
//! - 使用 `config.rs`, `parsers/results.rs`, `parsers/ucf.rs`

use crate::cli::ucf::UcfArgs;
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::Crystal;
use crate::parsers::poscar::parse_poscar_file;
use crate::parsers::results::{read_trial_configurations, ConfigurationEntry};
use crate::parsers::ucf::{materials_from_spins, render_ucf};
use crate::utils::output;

use std::fs;
use std::path::Path;

/// 在 `configurationsNNN.txt` 中查找标签，返回 (设置编号, 配置)
pub fn find_configuration(trials_dir: &Path, label: &str) -> Result<(usize, ConfigurationEntry)> {
    read_trial_configurations(trials_dir)?
        .into_iter()
        .find_map(|(index, entries)| {
            entries
                .into_iter()
                .find(|e| e.state == label)
                .map(|entry| (index, entry))
        })
        .ok_or_else(|| {
            AutomagError::InvalidArgument(format!(
                "Configuration '{}' not found in {}",
                label,
                trials_dir.display()
            ))
        })
}

/// 磁性子晶格与其材料编号
pub fn magnetic_sublattice(
    setting: &Crystal,
    input: &StageInput,
    entry: &ConfigurationEntry,
) -> Result<(Crystal, Vec<usize>)> {
    let selector = input.selector();
    let magnetic = setting.retain_atoms(|a| selector.is_magnetic(&a.element));
    if magnetic.len() != entry.spins.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "Configuration '{}' has {} spins but the setting has {} magnetic atoms",
            entry.state,
            entry.spins.len(),
            magnetic.len()
        )));
    }
    Ok((magnetic, materials_from_spins(&entry.spins)))
}

/// 执行 ucf 命令
pub fn execute(args: UcfArgs) -> Result<()> {
    output::print_header("Vampire Unit Cell File");

    let input = StageInput::from_file(&args.input)?;
    let label = args
        .configuration
        .clone()
        .or_else(|| input.configuration_label.clone())
        .ok_or_else(|| AutomagError::InvalidArgument("configuration_label is missing".into()))?;
    let distances = input.distances_between_neighbors.as_ref().ok_or_else(|| {
        AutomagError::InvalidArgument(
            "distances_between_neighbors is missing, run `analyze couplings --update-input` first".into(),
        )
    })?;
    let couplings = input.coupling_constants.as_ref().ok_or_else(|| {
        AutomagError::InvalidArgument(
            "coupling_constants is missing, run `analyze couplings --update-input` first".into(),
        )
    })?;

    let (index, entry) = find_configuration(&args.trials_dir, &label)?;
    let setting_path = args.trials_dir.join(format!("setting{:03}.vasp", index));
    let setting = parse_poscar_file(&setting_path)?;
    output::print_info(&format!("Configuration {} found in {}", label, setting_path.display()));

    let (magnetic, materials) = magnetic_sublattice(&setting, &input, &entry)?;
    let text = render_ucf(&magnetic, &materials, input.cutoff_radius, distances, couplings)?;
    fs::write(&args.output, text).map_err(|e| AutomagError::write(&args.output, e))?;

    output::print_done(&format!(
        "{} magnetic atoms written to {}",
        magnetic.len(),
        args.output.display()
    ));
    Ok(())
}
