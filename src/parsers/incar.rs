//! # VASP INCAR / KPOINTS 处理
//!
//! 将计算参数表渲染为 INCAR 与 KPOINTS 文本，替换模板中的标签，
//! 并读取 INCAR 中的 MAGMOM。
//!
//! ## 参数约定
//! 参数表的键使用小写（与工作流 JSON 一致），渲染时转为大写。
//! 以下伪参数不会直接写入 INCAR：
//! - `xc`: 交换关联泛函，映射为 `GGA` 标签
//! - `setups`: 赝势选择，由 POTCAR 库负责
//! - `kpts`: 写入 KPOINTS 文件
//!
//! ## 依赖关系
//! - 被 `workflow/`, `commands/specific.rs`, `batch/` 使用
//! - 无内部模块依赖

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个参数的取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// INCAR 中的文本形式
    pub fn to_incar(&self) -> String {
        match self {
            ParamValue::Bool(true) => ".TRUE.".to_string(),
            ParamValue::Bool(false) => ".FALSE.".to_string(),
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Float(v) => format_float(*v),
            ParamValue::Str(s) => s.clone(),
            ParamValue::List(items) => items
                .iter()
                .map(|v| v.to_incar())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// 计算参数表
pub type CalcParams = BTreeMap<String, ParamValue>;

/// 不直接写入 INCAR 的伪参数
const PSEUDO_KEYS: &[&str] = &["xc", "setups", "kpts", "gamma"];

/// 整数值的浮点数输出为 `4.0`，其余保留最短表示
fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// xc 泛函到 GGA 标签
fn gga_tag(xc: &str) -> Option<&'static str> {
    match xc.to_uppercase().as_str() {
        "PBE" => Some("PE"),
        "PBESOL" => Some("PS"),
        "RPBE" => Some("RP"),
        "PW91" => Some("91"),
        "AM05" => Some("AM"),
        _ => None,
    }
}

/// 将参数表渲染为 INCAR 文本
///
/// `magmoms` 非空时写入压缩后的 MAGMOM。
pub fn render_incar(params: &CalcParams, magmoms: Option<&[f64]>) -> String {
    let mut lines = vec!["INCAR created by automag".to_string()];

    if let Some(ParamValue::Str(xc)) = params.get("xc") {
        match gga_tag(xc) {
            Some(tag) => lines.push(format!(" GGA = {}", tag)),
            None => log::debug!("xc = {} has no GGA tag, using POTCAR default", xc),
        }
    }

    for (key, value) in params {
        if PSEUDO_KEYS.contains(&key.as_str()) {
            continue;
        }
        lines.push(format!(" {} = {}", key.to_uppercase(), value.to_incar()));
    }

    if let Some(m) = magmoms {
        if !m.is_empty() {
            lines.push(format!(" MAGMOM = {}", compress_magmom(m)));
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// 压缩连续相同的磁矩，例如 `[4, 4, 0]` -> `2*4.0000 1*0.0000`
pub fn compress_magmom(magmoms: &[f64]) -> String {
    let mut runs: Vec<(usize, f64)> = Vec::new();
    for &m in magmoms {
        match runs.last_mut() {
            Some((n, v)) if *v == m => *n += 1,
            _ => runs.push((1, m)),
        }
    }
    runs.iter()
        .map(|(n, v)| format!("{}*{:.4}", n, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 展开 MAGMOM 取值，支持 `n*value` 写法
pub fn expand_magmom(value: &str) -> Option<Vec<f64>> {
    let mut out = Vec::new();
    for token in value.split_whitespace() {
        if let Some((n, v)) = token.split_once('*') {
            let n: usize = n.parse().ok()?;
            let v: f64 = v.parse().ok()?;
            out.extend(std::iter::repeat(v).take(n));
        } else {
            out.push(token.parse().ok()?);
        }
    }
    Some(out)
}

/// 读取 INCAR 中的 MAGMOM（忽略注释）
pub fn read_magmom(incar: &str) -> Option<Vec<f64>> {
    let pattern = Regex::new(r"(?i)^\s*MAGMOM\s*=\s*([^#!]*)").ok()?;
    incar
        .lines()
        .filter_map(|line| pattern.captures(line))
        .last()
        .and_then(|caps| expand_magmom(caps[1].trim()))
}

/// 将参数表渲染为 KPOINTS 文本
///
/// - 整数或浮点数：全自动网格，数值为 R_k 长度
/// - 三个整数：Gamma 中心网格
pub fn render_kpoints(params: &CalcParams) -> Option<String> {
    match params.get("kpts")? {
        ParamValue::Int(_) | ParamValue::Float(_) => {
            let length = params.get("kpts")?.to_incar();
            Some(format!("Automatic mesh\n0\nAuto\n  {}\n", length))
        }
        ParamValue::List(items) if items.len() == 3 => {
            let grid = items
                .iter()
                .map(|v| v.to_incar())
                .collect::<Vec<_>>()
                .join(" ");
            Some(format!("Automatic mesh\n0\nGamma\n  {}\n  0 0 0\n", grid))
        }
        _ => None,
    }
}

/// 用覆盖参数替换 INCAR 模板中的同名标签
///
/// 只替换模板中已存在的标签，其余行原样保留。
pub fn update_template(template: &str, overrides: &BTreeMap<String, String>) -> String {
    let upper: BTreeMap<String, &String> = overrides
        .iter()
        .map(|(k, v)| (k.to_uppercase(), v))
        .collect();

    let mut out = String::new();
    for line in template.lines() {
        let tag = line.split('=').next().unwrap_or("").trim().to_uppercase();
        match upper.get(&tag) {
            Some(value) if line.contains('=') => {
                out.push_str(&format!("{} = {}\n", tag, value));
            }
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CalcParams {
        let json = r#"{
            "xc": "PBE", "setups": "recommended", "prec": "Accurate",
            "encut": 820, "ediff": 1e-6, "lwave": false, "kpts": 20,
            "ldaul": [2, -1], "sigma": 0.05
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_param_value_untagged() {
        let p = params();
        assert_eq!(p["encut"], ParamValue::Int(820));
        assert_eq!(p["ediff"], ParamValue::Float(1e-6));
        assert_eq!(p["lwave"], ParamValue::Bool(false));
        assert_eq!(p["ldaul"].to_incar(), "2 -1");
    }

    #[test]
    fn test_render_incar() {
        let text = render_incar(&params(), Some(&[4.0, 4.0, -4.0, 0.0]));

        assert!(text.contains(" GGA = PE\n"));
        assert!(text.contains(" ENCUT = 820\n"));
        assert!(text.contains(" LWAVE = .FALSE.\n"));
        assert!(text.contains(" LDAUL = 2 -1\n"));
        assert!(text.contains(" MAGMOM = 2*4.0000 1*-4.0000 1*0.0000\n"));
        assert!(!text.contains("KPTS"));
        assert!(!text.contains("SETUPS"));
    }

    #[test]
    fn test_magmom_compression_expands_back() {
        let magmoms = vec![4.0, 4.0, 4.0, -4.0, 0.0, 0.0];
        let text = compress_magmom(&magmoms);
        assert_eq!(expand_magmom(&text), Some(magmoms));
    }

    #[test]
    fn test_read_magmom() {
        let incar = "ISPIN = 2\n  magmom = 2*5.0 -5.0 16*0.0  # afm\n";
        let m = read_magmom(incar).unwrap();
        assert_eq!(m.len(), 19);
        assert_eq!(m[2], -5.0);
        assert!(read_magmom("ISPIN = 1\n").is_none());
    }

    #[test]
    fn test_render_kpoints() {
        let text = render_kpoints(&params()).unwrap();
        assert_eq!(text, "Automatic mesh\n0\nAuto\n  20\n");

        let mut p = CalcParams::new();
        p.insert("kpts".into(), ParamValue::List(vec![ParamValue::Int(4), ParamValue::Int(4), ParamValue::Int(2)]));
        assert!(render_kpoints(&p).unwrap().contains("Gamma\n  4 4 2\n"));
    }

    #[test]
    fn test_update_template() {
        let template = "PREC = Normal\nENCUT = 400\nISMEAR = 0 ! comment\n";
        let mut overrides = BTreeMap::new();
        overrides.insert("encut".to_string(), "520".to_string());

        let out = update_template(template, &overrides);
        assert_eq!(out, "PREC = Normal\nENCUT = 520\nISMEAR = 0 ! comment\n");
    }
}
