//! # coll 命令实现
//!
//! 枚举共线磁性配置，写出 trials 目录并为每个配置提交单点计算。
//!
//! ## trials 目录
//! ```text
//! trials/setting001.vasp          几何设置
//! trials/configurations001.txt    该设置下的配置：标签 + 磁性原子上的自旋
//! ```
//!
//! ## 配置来源
//! - 默认：输入结构上逐个磁性位点枚举（每个位点 +s / 0 / -s）
//! - `--enumlib-dir`：enumlib 生成的 `vasp.N` 超胞，磁性元素被分成两个等量子格，
//!   第 1 个超胞额外提交 NM 与 FM 配置
//!
//! ## 依赖关系
//! - 使用 `cli/submit.rs` 定义的参数
//! - 使用 `models/magnetic.rs`, `parsers/poscar.rs`, `parsers/results.rs`, `workflow/`
//! - 使用 `glob` 查找 `vasp.N`

use super::{open_launchpad, submit_and_report};
use crate::cli::submit::CollArgs;
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::magnetic::enumerate_configurations;
use crate::models::{Crystal, MagneticSelector, StateClassifier};
use crate::parsers::poscar::{self, insert_elements, parse_composition, parse_poscar_content};
use crate::parsers::results::{format_configuration, ConfigurationEntry};
use crate::utils::output;
use crate::workflow::{SubmitFirework, SubmitMode};

use std::fs;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

/// 一个几何设置及其上的磁性配置 (标签, 磁矩)
#[derive(Debug, Clone)]
pub struct Setting {
    pub crystal: Crystal,
    pub configurations: Vec<(String, Vec<f64>)>,
}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    file: String,
    #[tabled(rename = "Atoms")]
    atoms: usize,
    #[tabled(rename = "Configurations")]
    labels: String,
}

/// 在输入结构上枚举配置并分类
pub fn enumerated_setting(crystal: &Crystal, selector: &MagneticSelector, spin: f64) -> Result<Setting> {
    let mask = selector.mask(crystal);
    let mut classifier = StateClassifier::new(spin);
    let configurations = enumerate_configurations(crystal, selector, spin)?
        .into_iter()
        .map(|magmoms| (classifier.classify(&magmoms, &mask).to_string(), magmoms))
        .collect();
    Ok(Setting {
        crystal: crystal.clone(),
        configurations,
    })
}

/// 目录中的 `vasp.N` 文件，按 N 排序
fn enumlib_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let pattern = dir.join("vasp.*");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| AutomagError::InvalidArgument(e.to_string()))?;

    let mut files: Vec<(usize, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|path| {
            let index = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(|ext| ext.parse::<usize>().ok())?;
            Some((index, path))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);

    if files.is_empty() {
        return Err(AutomagError::NoFilesFound {
            pattern: pattern.into_owned(),
        });
    }
    Ok(files)
}

/// enumlib 超胞的计数行总原子数
fn enumlib_atom_count(content: &str) -> Option<usize> {
    content
        .lines()
        .nth(5)?
        .split_whitespace()
        .map(|s| s.parse::<usize>().ok())
        .sum()
}

/// 读取 enumlib 超胞：磁性元素的前一半 +s，后一半 -s
pub fn enumlib_settings(
    dir: &Path,
    composition: &[(String, usize)],
    magnetic_atom: &str,
    spin: f64,
) -> Result<Vec<Setting>> {
    let base_total: usize = composition.iter().map(|(_, n)| n).sum();
    if base_total == 0 {
        return Err(AutomagError::InvalidArgument("empty composition".into()));
    }

    let mut settings = Vec::new();
    for (index, path) in enumlib_files(dir)? {
        let content = fs::read_to_string(&path).map_err(|e| AutomagError::read(&path, e))?;
        let total = enumlib_atom_count(&content).ok_or_else(|| AutomagError::ParseError {
            format: "enumlib poscar".into(),
            path: path.display().to_string(),
            reason: "Invalid atom count line".into(),
        })?;
        if total % base_total != 0 {
            return Err(AutomagError::ParseError {
                format: "enumlib poscar".into(),
                path: path.display().to_string(),
                reason: format!("{} atoms is not a multiple of the composition ({})", total, base_total),
            });
        }

        let factor = total / base_total;
        let scaled: Vec<(String, usize)> = composition
            .iter()
            .map(|(el, n)| (el.clone(), n * factor))
            .collect();

        let text = insert_elements(&content, &scaled, magnetic_atom)?;
        let crystal = parse_poscar_content(&text, &format!("vasp.{}", index))?;

        let magnetic: Vec<usize> = crystal
            .atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.element == magnetic_atom)
            .map(|(i, _)| i)
            .collect();
        let half = magnetic.len() / 2;

        let mut fm = vec![0.0; crystal.len()];
        let mut afm = vec![0.0; crystal.len()];
        for (k, i) in magnetic.iter().enumerate() {
            fm[*i] = spin;
            afm[*i] = if k < half { spin } else { -spin };
        }

        let mut configurations = Vec::new();
        if index == 1 {
            configurations.push(("nm".to_string(), vec![0.0; crystal.len()]));
            configurations.push(("fm".to_string(), fm));
        }
        configurations.push((format!("afm{}", index), afm));

        log::debug!("{}: {} atoms, factor {}", path.display(), crystal.len(), factor);
        settings.push(Setting {
            crystal,
            configurations,
        });
    }
    Ok(settings)
}

/// 配置文件中的一行：只列出磁性原子
pub fn configuration_entry(label: &str, magmoms: &[f64], mask: &[bool]) -> ConfigurationEntry {
    ConfigurationEntry {
        state: label.to_string(),
        spins: magmoms
            .iter()
            .zip(mask)
            .filter(|(_, m)| **m)
            .map(|(s, _)| s.round() as i32)
            .collect(),
    }
}

/// 写出 settingNNN.vasp 与 configurationsNNN.txt
pub fn write_trials(dir: &Path, settings: &[Setting], selector: &MagneticSelector) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| AutomagError::write(dir, e))?;

    for (i, setting) in settings.iter().enumerate() {
        let poscar_path = dir.join(format!("setting{:03}.vasp", i + 1));
        fs::write(&poscar_path, poscar::to_poscar_string(&setting.crystal))
            .map_err(|e| AutomagError::write(&poscar_path, e))?;

        let mask = selector.mask(&setting.crystal);
        let text: String = setting
            .configurations
            .iter()
            .map(|(label, magmoms)| format_configuration(&configuration_entry(label, magmoms, &mask)))
            .collect();
        let conf_path = dir.join(format!("configurations{:03}.txt", i + 1));
        fs::write(&conf_path, text).map_err(|e| AutomagError::write(&conf_path, e))?;
    }
    Ok(())
}

/// 执行 coll 命令
pub fn execute(args: CollArgs) -> Result<()> {
    output::print_header("Collinear Magnetic Configurations");

    let input = StageInput::from_file(&args.input)?;
    let crystal = input.crystal()?;
    let selector = input.selector();
    let spin = input.spin_value;

    if args.trials_dir.exists() {
        return Err(AutomagError::InvalidArgument(format!(
            "Cannot create a folder named {}: an object with the same name already exists",
            args.trials_dir.display()
        )));
    }

    let settings = match &args.enumlib_dir {
        Some(dir) => {
            let composition = match &args.composition {
                Some(formula) => parse_composition(formula)?,
                None => poscar::species_runs(&crystal),
            };
            let magnetic_atom = match &args.magnetic_atom {
                Some(el) => el.clone(),
                None => crystal
                    .species()
                    .into_iter()
                    .find(|el| selector.is_magnetic(el))
                    .ok_or_else(|| {
                        AutomagError::InvalidArgument("No magnetic element in the structure".into())
                    })?,
            };
            if !selector.is_magnetic(&magnetic_atom) {
                output::print_warning(&format!(
                    "{} is not among the magnetic atoms of the input file",
                    magnetic_atom
                ));
            }
            output::print_info(&format!(
                "Reading enumlib supercells from '{}' ({} split into two sublattices)",
                dir.display(),
                magnetic_atom
            ));
            enumlib_settings(dir, &composition, &magnetic_atom, spin)?
        }
        None => vec![enumerated_setting(&crystal, &selector, spin)?],
    };

    let total: usize = settings.iter().map(|s| s.configurations.len()).sum();
    if total == 0 {
        output::print_warning("No magnetic configuration found: is any atom magnetic?");
        return Ok(());
    }

    write_trials(&args.trials_dir, &settings, &selector)?;

    let rows: Vec<SettingRow> = settings
        .iter()
        .enumerate()
        .map(|(i, s)| SettingRow {
            file: format!("setting{:03}.vasp", i + 1),
            atoms: s.crystal.len(),
            labels: s
                .configurations
                .iter()
                .map(|(label, _)| label.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();
    println!("{}", Table::new(&rows));
    output::print_success(&format!(
        "{} configurations in {} setting(s) written to '{}'",
        total,
        settings.len(),
        args.trials_dir.display()
    ));

    if args.dry_run {
        output::print_skip("Dry run, nothing submitted");
        return Ok(());
    }

    let launchpad = open_launchpad(&args.launchpad);
    let read_enthalpy = input.params.contains_key("pstress");
    let mut submitted = 0;
    let mut filename = String::new();
    for setting in &settings {
        for (label, magmoms) in &setting.configurations {
            let submit = SubmitFirework::new(
                setting.crystal.clone(),
                SubmitMode::SinglePoint,
                input.params.clone(),
                magmoms.clone(),
            )?
            .configuration(label.clone())
            .read_enthalpy(read_enthalpy);
            filename = submit.output_filename();
            submitted += submit_and_report(&submit, launchpad.as_ref())?;
        }
    }

    output::print_done(&format!(
        "{} workflows submitted, results will be appended to {}",
        submitted, filename
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::results::parse_configurations;

    const POSCAR: &str = "MnO\n1.0\n4.0 0.0 0.0\n0.0 4.0 0.0\n0.0 0.0 8.0\nMn Co O\n1 1 2\nDirect\n\
0.0 0.0 0.0\n0.0 0.0 0.5\n0.5 0.5 0.25\n0.5 0.5 0.75\n";

    const ENUMLIB: &str = "enumlib\n1.0\n4.0 0.0 0.0\n0.0 4.0 0.0\n0.0 0.0 8.0\n  2   2   6\nDirect\n\
0.0 0.0 0.0\n0.5 0.0 0.0\n0.0 0.5 0.0\n0.5 0.5 0.0\n\
0.25 0.25 0.25\n0.75 0.25 0.25\n0.25 0.75 0.25\n0.75 0.75 0.25\n0.25 0.25 0.75\n0.75 0.25 0.75\n";

    #[test]
    fn test_enumerated_setting_labels() {
        let crystal = parse_poscar_content(POSCAR, "test").unwrap();
        let selector = MagneticSelector::from_option(None);
        let setting = enumerated_setting(&crystal, &selector, 4.0).unwrap();

        let labels: Vec<&str> = setting.configurations.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["fm", "fim1", "afm1", "fim2"]);
        assert_eq!(setting.configurations[2].1, vec![4.0, -4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_single_species_cell_has_antiferromagnetic_state() {
        let content = "Fe2O3\n1.0\n5.0 0.0 0.0\n0.0 5.0 0.0\n0.0 0.0 13.7\nFe O\n2 3\nDirect\n\
0.0 0.0 0.35\n0.0 0.0 0.85\n0.3 0.0 0.25\n0.0 0.3 0.25\n0.7 0.7 0.25\n";
        let crystal = parse_poscar_content(content, "Fe2O3").unwrap();
        let setting = enumerated_setting(&crystal, &MagneticSelector::from_option(None), 4.0).unwrap();

        let afm = setting
            .configurations
            .iter()
            .find(|(label, _)| label == "afm1")
            .map(|(_, magmoms)| magmoms.clone());
        assert_eq!(setting.configurations[0].0, "fm");
        assert_eq!(afm, Some(vec![4.0, -4.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_write_trials() {
        let tmp = tempfile::tempdir().unwrap();
        let crystal = parse_poscar_content(POSCAR, "test").unwrap();
        let selector = MagneticSelector::from_option(None);
        let setting = enumerated_setting(&crystal, &selector, 4.0).unwrap();
        let dir = tmp.path().join("trials");

        write_trials(&dir, &[setting], &selector).unwrap();

        let text = fs::read_to_string(dir.join("configurations001.txt")).unwrap();
        let entries = parse_configurations(&text).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].state, "afm1");
        assert_eq!(entries[2].spins, vec![4, -4]);

        let back = poscar::parse_poscar_file(&dir.join("setting001.vasp")).unwrap();
        assert_eq!(back.symbols(), crystal.symbols());
    }

    #[test]
    fn test_enumlib_settings() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("vasp.2"), ENUMLIB).unwrap();
        fs::write(tmp.path().join("vasp.1"), ENUMLIB).unwrap();
        fs::write(tmp.path().join("vasp.notes"), "ignored").unwrap();

        let composition = vec![("Fe".to_string(), 2), ("O".to_string(), 3)];
        let settings = enumlib_settings(tmp.path(), &composition, "Fe", 4.0).unwrap();

        assert_eq!(settings.len(), 2);
        let labels: Vec<&str> = settings[0].configurations.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["nm", "fm", "afm1"]);
        assert!(settings[0].configurations[0].1.iter().all(|m| *m == 0.0));
        assert_eq!(settings[1].configurations.len(), 1);
        assert_eq!(settings[1].configurations[0].0, "afm2");

        let afm = &settings[1].configurations[0].1;
        assert_eq!(&afm[..4], &[4.0, 4.0, -4.0, -4.0]);
        assert!(afm[4..].iter().all(|m| *m == 0.0));
        assert_eq!(settings[0].crystal.formula(), "Fe4O6");
    }

    #[test]
    fn test_enumlib_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let composition = vec![("Fe".to_string(), 2)];
        assert!(matches!(
            enumlib_settings(tmp.path(), &composition, "Fe", 4.0),
            Err(AutomagError::NoFilesFound { .. })
        ));
    }
}
