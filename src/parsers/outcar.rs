//! # VASP OUTCAR 解析器
//!
//! 解析 VASP 计算输出文件 OUTCAR，提取能量、焓、收敛情况和最终磁矩。
//!
//! ## 依赖关系
//! - 被 `workflow/runner.rs`, `batch/`, `commands/analyze/` 使用
//! - 使用 `models/calculation.rs`

use crate::error::{AutomagError, Result};
use crate::models::VaspRun;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 磁矩块的读取状态
enum MagState {
    Idle,
    /// 已读到 "magnetization (x)"，等待表头分隔线
    Header,
    /// 正在读取每个离子的磁矩
    Rows(Vec<f64>),
}

/// 解析 VASP OUTCAR 文件
pub fn parse_outcar(path: &Path, name: &str) -> Result<VaspRun> {
    let file = File::open(path).map_err(|e| AutomagError::read(path, e))?;
    parse_outcar_reader(BufReader::new(file), name)
}

/// 从字符串内容解析 OUTCAR
pub fn parse_outcar_content(content: &str, name: &str) -> Result<VaspRun> {
    parse_outcar_reader(content.as_bytes(), name)
}

fn parse_outcar_reader<R: BufRead>(reader: R, name: &str) -> Result<VaspRun> {
    let mut result = VaspRun::new(name);

    let mut nsw: Option<i64> = None;
    let mut ibrion: Option<i64> = None;
    let mut mag_state = MagState::Idle;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };

        // 磁矩块
        match &mut mag_state {
            MagState::Header => {
                if line.trim_start().starts_with("---") {
                    mag_state = MagState::Rows(Vec::new());
                }
                continue;
            }
            MagState::Rows(values) => {
                let trimmed = line.trim_start();
                if trimmed.starts_with("---") || trimmed.is_empty() {
                    result.magmoms = Some(std::mem::take(values));
                    mag_state = MagState::Idle;
                } else if let Some(tot) = extract_last_number(&line) {
                    values.push(tot);
                }
                continue;
            }
            MagState::Idle => {}
        }

        if line.trim() == "magnetization (x)" {
            mag_state = MagState::Header;
            continue;
        }

        // 检查是否完成
        if line.contains("General timing and accounting informations for this job") {
            result.is_finished = true;
        }

        // "  free  energy   TOTEN  =      -123.456789 eV"
        if line.contains("free  energy   TOTEN") {
            if let Some(val) = extract_number_after(&line, "=") {
                result.free_energy = Some(val);
            }
        }

        // "energy  without entropy=     -123.456789  energy(sigma->0) =     -123.456789"
        if line.contains("energy  without entropy") {
            if let Some(pos) = line.find("energy(sigma->0)") {
                if let Some(val) = extract_number_after(&line[pos..], "=") {
                    result.energy_sigma0 = Some(val);
                }
            }
        }

        // "  enthalpy is  TOTEN    =      -123.456789 eV   P V=  ..."
        if line.contains("enthalpy is") {
            if let Some(val) = line.split_whitespace().nth(4).and_then(|s| s.parse().ok()) {
                result.enthalpy = Some(val);
            }
        }

        // "  volume of cell :      123.456789"
        if line.contains("volume of cell") {
            if let Some(val) = extract_last_number(&line) {
                result.volume = Some(val);
            }
        }

        // "   number of ions     NIONS =      8"
        if line.contains("NIONS =") {
            if let Some(val) = extract_last_number(&line) {
                result.num_atoms = Some(val as usize);
            }
        }

        // "   NSW    =      0    number of steps for IOM"
        if line.trim_start().starts_with("NSW") && nsw.is_none() {
            nsw = extract_number_after(&line, "=").map(|v| v as i64);
        }

        // "   IBRION =     -1    ionic relax: 0-MD 1-quasi-New 2-CG"
        if line.trim_start().starts_with("IBRION") && ibrion.is_none() {
            ibrion = extract_number_after(&line, "=").map(|v| v as i64);
        }

        // 每个离子步结束时只会出现其中之一
        if line.contains("aborting loop because EDIFF is reached") {
            result.electronic_converged = true;
        } else if line.contains("aborting loop EDIFF was not reached") {
            result.electronic_converged = false;
        }

        if line.contains("reached required accuracy") {
            result.ionic_converged = true;
        }
    }

    // 文件在磁矩块中截断
    if let MagState::Rows(values) = mag_state {
        if !values.is_empty() {
            result.magmoms = Some(values);
        }
    }

    result.is_relaxation = matches!((nsw, ibrion), (Some(n), Some(i)) if n > 0 && i >= 0);

    Ok(result)
}

/// 从字符串中提取指定标记之后的数字
fn extract_number_after(s: &str, marker: &str) -> Option<f64> {
    let pos = s.find(marker)?;
    let after = &s[pos + marker.len()..];
    after.split_whitespace().next()?.parse().ok()
}

/// 提取字符串中最后一个数字
fn extract_last_number(s: &str) -> Option<f64> {
    s.split_whitespace()
        .filter_map(|w| w.parse::<f64>().ok())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTCAR: &str = r#" vasp.6.1.1 18Aug20 (build Oct 20 2020) complex
   number of dos      NEDOS =    301   number of ions     NIONS =      3
   NSW    =      0    number of steps for IOM
   IBRION =     -1    ionic relax: 0-MD 1-quasi-New 2-CG
  volume of cell :       23.64
------------------------ aborting loop EDIFF was not reached (unconverged)  ----------------------------
  free  energy   TOTEN  =       -15.000000 eV
  energy  without entropy=      -15.100000  energy(sigma->0) =      -15.050000

 magnetization (x)

# of ion       s       p       d       tot
------------------------------------------
    1        0.012   0.013   2.170   2.195
    2       -0.012  -0.013  -2.170  -2.195
    3        0.000   0.000   0.000   0.000
--------------------------------------------------
tot          0.000   0.000   0.000   0.000

------------------------ aborting loop because EDIFF is reached ----------------------------------------
  free  energy   TOTEN  =       -16.543210 eV
  energy  without entropy=      -16.600000  energy(sigma->0) =      -16.571605

 magnetization (x)

# of ion       s       p       d       tot
------------------------------------------
    1        0.020   0.030   3.700   3.750
    2       -0.020  -0.030  -3.700  -3.750
    3        0.001   0.001   0.000   0.002
--------------------------------------------------
tot          0.000   0.000   0.000   0.002

 General timing and accounting informations for this job:
"#;

    #[test]
    fn test_last_energy_and_magnetization() {
        let run = parse_outcar_content(OUTCAR, "afm1").unwrap();

        assert!(run.is_finished);
        assert_eq!(run.num_atoms, Some(3));
        assert_eq!(run.free_energy, Some(-16.54321));
        assert_eq!(run.energy_sigma0, Some(-16.571605));
        assert_eq!(run.volume, Some(23.64));
        assert_eq!(run.magmoms, Some(vec![3.75, -3.75, 0.002]));
    }

    #[test]
    fn test_singlepoint_convergence() {
        let run = parse_outcar_content(OUTCAR, "afm1").unwrap();
        assert!(!run.is_relaxation);
        assert!(run.electronic_converged);
        assert!(run.converged());
    }

    #[test]
    fn test_relaxation_needs_required_accuracy() {
        let content = OUTCAR
            .replace("NSW    =      0", "NSW    =     99")
            .replace("IBRION =     -1", "IBRION =      2");
        let run = parse_outcar_content(&content, "relax").unwrap();
        assert!(run.is_relaxation);
        assert!(!run.converged());

        let content = format!(
            "{}\n reached required accuracy - stopping structural energy minimisation\n",
            content
        );
        let run = parse_outcar_content(&content, "relax").unwrap();
        assert!(run.converged());
    }

    #[test]
    fn test_enthalpy() {
        let content = "  enthalpy is  TOTEN    =       -20.123456 eV   P V=        1.00000\n";
        let run = parse_outcar_content(content, "p").unwrap();
        assert_eq!(run.enthalpy, Some(-20.123456));
        assert!(!run.is_finished);
    }

    #[test]
    fn test_no_magnetization_block() {
        let content = "  free  energy   TOTEN  =        -1.000000 eV\n";
        let run = parse_outcar_content(content, "nm").unwrap();
        assert_eq!(run.magmoms, None);
    }
}
