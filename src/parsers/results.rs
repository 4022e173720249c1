//! # 结果文件读写
//!
//! 工作流最后一步会向结果文件追加一条记录，格式如下：
//! ```text
//! afm1            12    singlepoint=converged     Fe2O3         energy=-123.456
//!           initial_magmoms=[4.000 -4.000 0.000]  final_magmoms=[3.750 -3.750 0.002]
//! ```
//! 主行不以空格开头，磁矩行以空格开头并紧随其主行。
//!
//! 同时提供配置文件 (`configurationsNNN.txt`)、JSON 列表和数值表格的读写。
//!
//! ## 依赖关系
//! - 被 `workflow/runner.rs`, `commands/` 使用
//! - 使用 `models/calculation.rs`

use crate::error::{AutomagError, Result};
use crate::models::{ConvergenceFlag, EnergyKind, ResultRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

// ─────────────────────────────────────────────────────────────
// 结果记录
// ─────────────────────────────────────────────────────────────

/// 格式化磁矩数组，按最短可还原形式写出
fn format_array(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{}", v)).collect();
    format!("[{}]", items.join(" "))
}

/// 将一条记录格式化为结果文件中的文本（含换行）
pub fn format_record(record: &ResultRecord) -> String {
    let mut line = format!("{:<12}  {:>4}    ", record.label, record.fw_id);

    for (name, flag) in &record.stages {
        line.push_str(&format!("{:>6}={:<12}  ", name, flag.to_string()));
    }

    line.push_str(&format!("{:<12}  ", record.formula));
    line.push_str(&format!("{}={}\n", record.kind, record.energy));

    if let Some(ref initial) = record.initial_magmoms {
        let empty = vec![0.0; initial.len()];
        let final_magmoms = record.final_magmoms.as_ref().unwrap_or(&empty);
        line.push_str(&format!(
            "          initial_magmoms={}  final_magmoms={}\n",
            format_array(initial),
            format_array(final_magmoms)
        ));
    }

    line
}

/// 向结果文件追加一条记录
pub fn append_record(path: &Path, record: &ResultRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| AutomagError::write(parent, e))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AutomagError::write(path, e))?;

    file.write_all(format_record(record).as_bytes())
        .map_err(|e| AutomagError::write(path, e))
}

fn results_error(reason: impl Into<String>) -> AutomagError {
    AutomagError::ParseError {
        format: "results".to_string(),
        path: "<results>".to_string(),
        reason: reason.into(),
    }
}

/// 提取 `key=[...]` 中的数组
fn extract_array(line: &str, key: &str) -> Option<Vec<f64>> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let open = rest.find('[')?;
    let close = rest.find(']')?;
    if close < open {
        return None;
    }
    rest[open + 1..close]
        .split_whitespace()
        .map(|s| s.parse().ok())
        .collect()
}

fn parse_main_line(line: &str) -> Result<ResultRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(results_error(format!("Too few fields: '{}'", line)));
    }

    let label = tokens[0].to_string();
    let fw_id: u32 = tokens[1]
        .parse()
        .map_err(|_| results_error(format!("Invalid fw_id '{}'", tokens[1])))?;

    let last = tokens[tokens.len() - 1];
    let (kind, value) = last
        .split_once('=')
        .ok_or_else(|| results_error(format!("Missing energy in '{}'", line)))?;
    let kind = match kind {
        "energy" => EnergyKind::Energy,
        "enthalpy" => EnergyKind::Enthalpy,
        other => return Err(results_error(format!("Unknown energy kind '{}'", other))),
    };
    let energy: f64 = value
        .parse()
        .map_err(|_| results_error(format!("Invalid energy '{}'", value)))?;

    let mut stages = Vec::new();
    let mut formula = String::new();
    for token in &tokens[2..tokens.len() - 1] {
        match token.split_once('=') {
            Some((name, flag)) => {
                let flag = ConvergenceFlag::parse(flag)
                    .ok_or_else(|| results_error(format!("Invalid flag '{}'", flag)))?;
                stages.push((name.to_string(), flag));
            }
            None => formula = token.to_string(),
        }
    }

    Ok(ResultRecord {
        label,
        fw_id,
        stages,
        formula,
        kind,
        energy,
        initial_magmoms: None,
        final_magmoms: None,
    })
}

/// 解析结果文件内容
pub fn parse_results(content: &str) -> Result<Vec<ResultRecord>> {
    let mut records: Vec<ResultRecord> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(' ') {
            let record = records
                .last_mut()
                .ok_or_else(|| results_error("Magnetic moment line before any result"))?;
            record.initial_magmoms = extract_array(line, "initial_magmoms=");
            record.final_magmoms = extract_array(line, "final_magmoms=");
        } else {
            records.push(parse_main_line(line)?);
        }
    }

    Ok(records)
}

/// 读取结果文件
pub fn read_results_file(path: &Path) -> Result<Vec<ResultRecord>> {
    let content = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    parse_results(&content).map_err(|e| match e {
        AutomagError::ParseError { format, reason, .. } => AutomagError::ParseError {
            format,
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

// ─────────────────────────────────────────────────────────────
// 配置文件
// ─────────────────────────────────────────────────────────────

/// 配置文件中的一行：状态标签 + 磁性原子上的自旋
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationEntry {
    pub state: String,
    pub spins: Vec<i32>,
}

/// 格式化配置文件中的一行（含换行）
pub fn format_configuration(entry: &ConfigurationEntry) -> String {
    let spins: Vec<String> = entry.spins.iter().map(|s| format!("{:2}", s)).collect();
    format!("{:>6}  {}\n", entry.state, spins.join(" "))
}

/// 解析配置文件内容
pub fn parse_configurations(content: &str) -> Result<Vec<ConfigurationEntry>> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let state = match tokens.next() {
            Some(s) => s.to_string(),
            None => continue,
        };
        let spins = tokens
            .map(|t| {
                t.parse::<i32>()
                    .map_err(|_| results_error(format!("Invalid spin '{}' for {}", t, state)))
            })
            .collect::<Result<Vec<_>>>()?;
        entries.push(ConfigurationEntry { state, spins });
    }
    Ok(entries)
}

/// 读取 trials 目录：从 `configurations001.txt` 起依次读取，直到编号中断
pub fn read_trial_configurations(dir: &Path) -> Result<Vec<(usize, Vec<ConfigurationEntry>)>> {
    let mut settings = Vec::new();
    for index in 1.. {
        let path = dir.join(format!("configurations{:03}.txt", index));
        if !path.is_file() {
            break;
        }
        let content = fs::read_to_string(&path).map_err(|e| AutomagError::read(&path, e))?;
        settings.push((index, parse_configurations(&content)?));
    }
    if settings.is_empty() {
        return Err(AutomagError::NoFilesFound {
            pattern: dir.join("configurations001.txt").display().to_string(),
        });
    }
    Ok(settings)
}

// ─────────────────────────────────────────────────────────────
// JSON 与数值表格
// ─────────────────────────────────────────────────────────────

/// 写入 JSON 文件
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    fs::write(path, text).map_err(|e| AutomagError::write(path, e))
}

/// 读取 JSON 文件
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// 读取空白分隔的数值表格，跳过空行和 `#` 注释行
pub fn parse_columns(content: &str) -> Result<Vec<Vec<f64>>> {
    let mut rows = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| results_error(format!("Line {}: {}", i + 1, e)))?;
        rows.push(row);
    }
    Ok(rows)
}

/// 读取数值表格文件
pub fn read_columns(path: &Path) -> Result<Vec<Vec<f64>>> {
    let content = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    parse_columns(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ResultRecord {
        ResultRecord {
            label: "afm1".to_string(),
            fw_id: 12,
            stages: vec![("singlepoint".to_string(), ConvergenceFlag::Converged)],
            formula: "Fe2O3".to_string(),
            kind: EnergyKind::Energy,
            energy: -123.456,
            initial_magmoms: Some(vec![4.0, -4.0, 0.0]),
            final_magmoms: Some(vec![3.75, -3.75, 0.002]),
        }
    }

    #[test]
    fn test_format_record_layout() {
        let text = format_record(&record());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("afm1            12    singlepoint=converged"));
        assert!(lines[0].ends_with("energy=-123.456"));
        assert!(lines[1].starts_with("          initial_magmoms=[4 -4 0]"));
        assert!(lines[1].ends_with("final_magmoms=[3.75 -3.75 0.002]"));
    }

    #[test]
    fn test_final_magmoms_keep_full_precision() {
        let mut near_threshold = record();
        near_threshold.final_magmoms = Some(vec![0.9996, -3.9994, 1.0e-4]);

        let parsed = parse_results(&format_record(&near_threshold)).unwrap();
        assert_eq!(parsed[0].final_magmoms, Some(vec![0.9996, -3.9994, 1.0e-4]));
    }

    #[test]
    fn test_parse_results_pairs_moment_lines() {
        let mut second = record();
        second.label = "fm".to_string();
        second.stages = vec![
            ("relax".to_string(), ConvergenceFlag::Converged),
            ("singlepoint".to_string(), ConvergenceFlag::NonConverged),
        ];
        second.initial_magmoms = None;
        second.final_magmoms = None;

        let text = format!("{}{}", format_record(&record()), format_record(&second));
        let parsed = parse_results(&text).unwrap();

        assert_eq!(parsed, vec![record(), second]);
        assert!(!parsed[1].is_converged());
        assert_eq!(parsed[1].first_nonconverged(), Some("singlepoint"));
    }

    #[test]
    fn test_parse_results_rejects_orphan_moment_line() {
        let text = "          initial_magmoms=[1.0]  final_magmoms=[1.0]\n";
        assert!(parse_results(text).is_err());
    }

    #[test]
    fn test_parse_enthalpy_record() {
        let text = "relax          3     relax=converged     Fe          enthalpy=-8.25\n";
        let parsed = parse_results(text).unwrap();
        assert_eq!(parsed[0].kind, EnergyKind::Enthalpy);
        assert_eq!(parsed[0].energy, -8.25);
        assert_eq!(parsed[0].formula, "Fe");
    }

    #[test]
    fn test_configurations() {
        let entries = vec![
            ConfigurationEntry {
                state: "fm".to_string(),
                spins: vec![4, 4],
            },
            ConfigurationEntry {
                state: "afm1".to_string(),
                spins: vec![4, -4],
            },
        ];
        let text: String = entries.iter().map(format_configuration).collect();
        assert_eq!(text, "    fm   4  4\n  afm1   4 -4\n");
        assert_eq!(parse_configurations(&text).unwrap(), entries);
    }

    #[test]
    fn test_read_trial_configurations_stops_at_gap() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("configurations001.txt"), "    fm   4  4\n").unwrap();
        fs::write(tmp.path().join("configurations002.txt"), "  afm2   4 -4\n").unwrap();
        fs::write(tmp.path().join("configurations004.txt"), "  afm4   4 -4\n").unwrap();

        let settings = read_trial_configurations(tmp.path()).unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings[1].0, 2);
        assert_eq!(settings[1].1[0].state, "afm2");

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_trial_configurations(empty.path()),
            Err(AutomagError::NoFilesFound { .. })
        ));
    }

    #[test]
    fn test_parse_columns() {
        let rows = parse_columns("# alpha nscf scf\n-0.05 7.1 7.05\n\n0.05 7.0 7.02\n").unwrap();
        assert_eq!(rows, vec![vec![-0.05, 7.1, 7.05], vec![0.05, 7.0, 7.02]]);
        assert!(parse_columns("1.0 abc\n").is_err());
    }
}
