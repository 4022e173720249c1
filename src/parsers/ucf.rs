//! # Vampire 晶胞文件 (.ucf) 写入
//!
//! 根据磁性子晶格、每个原子的材料编号和按近邻壳层划分的耦合常数，
//! 生成 Vampire 的 unit cell file。
//!
//! ## 依赖关系
//! - 被 `commands/ucf.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{AutomagError, Result};
use crate::models::Crystal;
use std::collections::BTreeSet;

/// 按 `{: W.Pe}` 的习惯格式化科学计数法：
/// 正数前留一个空格，指数至少两位并带符号，例如 ` 1.0000e-21`
pub fn format_sci(value: f64, precision: usize, width: usize) -> String {
    // 去掉负零
    let value = value + 0.0;
    let raw = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    let sign = if mantissa.starts_with('-') { "" } else { " " };
    let text = format!("{}{}e{}{:02}", sign, mantissa, if exponent < 0 { '-' } else { '+' }, exponent.abs());
    format!("{:>width$}", text, width = width)
}

/// 近邻壳层的分界：`[0, 相邻距离中点..., 100]`
pub fn shell_thresholds(distances: &[f64]) -> Vec<f64> {
    let mut thresholds = vec![0.0];
    thresholds.extend(distances.windows(2).map(|w| (w[0] + w[1]) / 2.0));
    thresholds.push(100.0);
    thresholds
}

/// 将分数坐标折回 [0, 1)
fn wrap_fraction(x: f64) -> f64 {
    let x = x + 0.0;
    if x < 0.0 {
        x + 1.0
    } else if x >= 1.0 {
        x - 1.0
    } else {
        x
    }
}

/// 由自旋得到材料编号：非负为 0，负为 1
pub fn materials_from_spins(spins: &[i32]) -> Vec<usize> {
    spins.iter().map(|s| if *s >= 0 { 0 } else { 1 }).collect()
}

/// 生成 ucf 文本
///
/// `magnetic` 只包含磁性原子；`materials` 与其原子一一对应；
/// `distances` 与 `couplings` 一一对应。
pub fn render_ucf(
    magnetic: &Crystal,
    materials: &[usize],
    cutoff: f64,
    distances: &[f64],
    couplings: &[f64],
) -> Result<String> {
    if materials.len() != magnetic.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} materials given for {} magnetic atoms",
            materials.len(),
            magnetic.len()
        )));
    }
    if distances.len() != couplings.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} neighbor distances but {} coupling constants",
            distances.len(),
            couplings.len()
        )));
    }

    let lattice = &magnetic.lattice;
    let lengths = lattice.lengths();
    let mut out = String::new();

    out.push_str("# Unit cell size:\n");
    out.push_str(&format!(
        "{:19.16}  {:19.16}  {:19.16}\n",
        lengths[0], lengths[1], lengths[2]
    ));

    out.push_str("# Unit cell vectors:\n");
    for (vector, modulus) in lattice.matrix.iter().zip(lengths.iter()) {
        let v: Vec<String> = vector
            .iter()
            .map(|x| format_sci(x / modulus, 8, 10))
            .collect();
        out.push_str(&format!("{}\n", v.join("   ")));
    }

    let num_materials = materials.iter().collect::<BTreeSet<_>>().len();
    out.push_str("# Atoms num_atoms num_materials; id cx cy cz mat cat hcat\n");
    out.push_str(&format!("{} {}\n", magnetic.len(), num_materials));
    for (i, (atom, material)) in magnetic.atoms.iter().zip(materials).enumerate() {
        let p = atom.position.map(wrap_fraction);
        out.push_str(&format!(
            "{:2}   {:18.16}  {:18.16}  {:18.16}  {} 0 0\n",
            i, p[0], p[1], p[2], material
        ));
    }

    let neighbors = magnetic.neighbor_list(cutoff);
    let thresholds = shell_thresholds(distances);

    out.push_str("# Interactions n exctype; id i j dx dy dz Jij\n");
    out.push_str(&format!("{} isotropic\n", neighbors.len()));
    for (i, neighbor) in neighbors.iter().enumerate() {
        for (bounds, coupling) in thresholds.windows(2).zip(couplings) {
            if bounds[0] < neighbor.distance && neighbor.distance < bounds[1] {
                out.push_str(&format!(
                    "{:3}   {:2}  {:2}  {:2} {:2} {:2}   {}\n",
                    i,
                    neighbor.center,
                    neighbor.point,
                    neighbor.image[0],
                    neighbor.image[1],
                    neighbor.image[2],
                    format_sci(*coupling, 4, 6)
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};

    fn chain() -> Crystal {
        let lattice = Lattice::from_vectors([[2.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]]);
        Crystal::new(
            "chain",
            lattice,
            vec![Atom::new("Fe", [0.0, 0.0, 0.0]), Atom::new("Fe", [-0.5, 0.0, 0.0])],
        )
    }

    #[test]
    fn test_format_sci() {
        assert_eq!(format_sci(1.0, 8, 10), " 1.00000000e+00");
        assert_eq!(format_sci(-0.0, 8, 10), " 0.00000000e+00");
        assert_eq!(format_sci(-8.4683e-22, 4, 6), "-8.4683e-22");
    }

    #[test]
    fn test_shell_thresholds() {
        assert_eq!(shell_thresholds(&[2.0, 3.0]), vec![0.0, 2.5, 100.0]);
        assert_eq!(shell_thresholds(&[2.0]), vec![0.0, 100.0]);
    }

    #[test]
    fn test_render_ucf() {
        let text = render_ucf(&chain(), &[0, 1], 2.5, &[1.0, 2.0], &[-1e-21, 2e-22]).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[1], " 2.0000000000000000  10.0000000000000000  10.0000000000000000");
        assert_eq!(lines[3], " 1.00000000e+00    0.00000000e+00    0.00000000e+00");
        assert_eq!(lines[7], "2 2");
        assert_eq!(lines[9], " 1   0.5000000000000000  0.0000000000000000  0.0000000000000000  1 0 0");

        // 每个原子两侧各有 1.0 Å 的近邻和 2.0 Å 的自身镜像
        assert_eq!(lines[11], "8 isotropic");
        let interactions = &lines[12..];
        assert_eq!(interactions.len(), 8);
        assert_eq!(interactions.iter().filter(|l| l.ends_with("-1.0000e-21")).count(), 4);
        assert_eq!(interactions.iter().filter(|l| l.ends_with(" 2.0000e-22")).count(), 4);
    }

    #[test]
    fn test_render_ucf_rejects_mismatch() {
        assert!(render_ucf(&chain(), &[0], 2.5, &[1.0], &[1.0]).is_err());
        assert!(render_ucf(&chain(), &[0, 0], 2.5, &[1.0, 2.0], &[1.0]).is_err());
    }

    #[test]
    fn test_materials_from_spins() {
        assert_eq!(materials_from_spins(&[4, -4, 0]), vec![0, 1, 0]);
    }
}
