//! # 磁性配置数据模型
//!
//! 判断磁性原子、逐位点生成共线磁性配置并进行分类，检查计算后磁矩是否保持。
//!
//! ## 依赖关系
//! - 被 `workflow/builder.rs`, `commands/` 使用
//! - 使用 `models/structure.rs`

use crate::error::{AutomagError, Result};
use crate::models::Crystal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 过渡金属元素（d 区）
const TRANSITION_METALS: &[&str] = &[
    "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", //
    "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", //
    "La", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", //
    "Ac", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn",
];

/// 是否为过渡金属
pub fn is_transition_metal(symbol: &str) -> bool {
    TRANSITION_METALS.contains(&symbol)
}

/// 磁性原子的判定规则
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum MagneticSelector {
    /// 默认：过渡金属为磁性原子
    #[default]
    TransitionMetals,
    /// 指定的元素列表
    Elements(Vec<String>),
}

impl MagneticSelector {
    pub fn from_option(elements: Option<&[String]>) -> Self {
        match elements {
            Some(list) if !list.is_empty() => MagneticSelector::Elements(list.to_vec()),
            _ => MagneticSelector::TransitionMetals,
        }
    }

    pub fn is_magnetic(&self, symbol: &str) -> bool {
        match self {
            MagneticSelector::TransitionMetals => is_transition_metal(symbol),
            MagneticSelector::Elements(list) => list.iter().any(|e| e == symbol),
        }
    }

    /// 结构中每个原子是否磁性
    pub fn mask(&self, crystal: &Crystal) -> Vec<bool> {
        crystal
            .atoms
            .iter()
            .map(|a| self.is_magnetic(&a.element))
            .collect()
    }

    /// 默认配置：磁性原子取 `spin`，其余为 0
    pub fn default_configuration(&self, crystal: &Crystal, spin: f64) -> Vec<f64> {
        self.mask(crystal)
            .into_iter()
            .map(|m| if m { spin } else { 0.0 })
            .collect()
    }
}

/// 磁性状态类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MagneticState {
    Ferromagnetic,
    NonMagnetic,
    Antiferromagnetic(usize),
    Ferrimagnetic(usize),
}

impl std::fmt::Display for MagneticState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MagneticState::Ferromagnetic => write!(f, "fm"),
            MagneticState::NonMagnetic => write!(f, "nm"),
            MagneticState::Antiferromagnetic(n) => write!(f, "afm{}", n),
            MagneticState::Ferrimagnetic(n) => write!(f, "fim{}", n),
        }
    }
}

/// 按顺序为配置分配 fm / nm / afmN / fimN 标签
#[derive(Debug)]
pub struct StateClassifier {
    spin: f64,
    afm_count: usize,
    fim_count: usize,
}

impl StateClassifier {
    pub fn new(spin: f64) -> Self {
        StateClassifier {
            spin,
            afm_count: 1,
            fim_count: 1,
        }
    }

    /// `mask` 标记磁性原子
    pub fn classify(&mut self, magmoms: &[f64], mask: &[bool]) -> MagneticState {
        let total: f64 = magmoms.iter().sum();
        let abs_total: f64 = magmoms.iter().map(|m| m.abs()).sum();
        let n_magnetic = mask.iter().filter(|m| **m).count() as f64;

        if (total - self.spin * n_magnetic).abs() < 1e-8 {
            MagneticState::Ferromagnetic
        } else if abs_total == 0.0 {
            MagneticState::NonMagnetic
        } else if total.abs() < 1e-8 {
            let state = MagneticState::Antiferromagnetic(self.afm_count);
            self.afm_count += 1;
            state
        } else {
            let state = MagneticState::Ferrimagnetic(self.fim_count);
            self.fim_count += 1;
            state
        }
    }
}

/// 逐位点枚举时允许的磁性原子上限（3^n 种组合）
pub const MAX_ENUMERATED_SITES: usize = 10;

/// 逐个磁性位点枚举共线磁性配置
///
/// 每个磁性原子取 `[+s, 0, -s]` 之一，非磁性原子取 0。
/// 丢弃全零配置以及互为整体翻转的重复配置。
pub fn enumerate_configurations(
    crystal: &Crystal,
    selector: &MagneticSelector,
    spin: f64,
) -> Result<Vec<Vec<f64>>> {
    let mask = selector.mask(crystal);
    let n_magnetic = mask.iter().filter(|m| **m).count();
    if n_magnetic > MAX_ENUMERATED_SITES {
        return Err(AutomagError::InvalidArgument(format!(
            "{} magnetic sites give 3^{} configurations; use enumlib supercells (--enumlib-dir) instead",
            n_magnetic, n_magnetic
        )));
    }

    let choices: Vec<Vec<f64>> = mask
        .iter()
        .map(|m| if *m { vec![spin, 0.0, -spin] } else { vec![0.0] })
        .collect();

    let mut seen: HashSet<Vec<i32>> = HashSet::new();
    let mut configurations: Vec<Vec<f64>> = Vec::new();
    for configuration in cartesian_product(&choices) {
        let signs = sign_vector(&configuration);
        if signs.iter().all(|s| *s == 0) {
            continue;
        }
        let flipped: Vec<i32> = signs.iter().map(|s| -s).collect();
        if seen.contains(&flipped) || !seen.insert(signs) {
            continue;
        }
        configurations.push(configuration);
    }
    Ok(configurations)
}

/// 多个取值列表的笛卡尔积，顺序与 itertools.product 一致
pub fn cartesian_product<T: Clone>(lists: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut result: Vec<Vec<T>> = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::with_capacity(result.len() * list.len());
        for prefix in &result {
            for item in list {
                let mut combo = prefix.clone();
                combo.push(item.clone());
                next.push(combo);
            }
        }
        result = next;
    }
    result
}

/// 判断计算后磁矩是否保持了初始的符号模式
///
/// 最终磁矩向零截断后，其符号必须与初始一致或整体相反；
/// 同时初始非零位点的最终磁矩绝对值必须大于 `hs_cutoff`（`nm` 例外）。
pub fn kept_magmoms(label: &str, initial: &[f64], final_magmoms: &[f64], hs_cutoff: f64) -> bool {
    if initial.len() != final_magmoms.len() {
        return false;
    }

    let high_spin = label == "nm"
        || initial
            .iter()
            .zip(final_magmoms)
            .filter(|(i, _)| **i != 0.0)
            .all(|(_, f)| f.abs() > hs_cutoff);

    let sign = |x: f64| -> i8 {
        if x > 0.0 {
            1
        } else if x < 0.0 {
            -1
        } else {
            0
        }
    };

    let initial_signs: Vec<i8> = initial.iter().map(|x| sign(*x)).collect();
    let final_signs: Vec<i8> = final_magmoms.iter().map(|x| sign(x.trunc())).collect();
    let flipped: Vec<i8> = final_signs.iter().map(|s| -s).collect();

    high_spin && (initial_signs == final_signs || initial_signs == flipped)
}

/// 符号向量，用于 Heisenberg 拟合
pub fn sign_vector(magmoms: &[f64]) -> Vec<i32> {
    magmoms
        .iter()
        .map(|m| {
            if *m > 0.0 {
                1
            } else if *m < 0.0 {
                -1
            } else {
                0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};

    fn fe2o3_like() -> Crystal {
        let lattice = Lattice::from_vectors([[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]]);
        let atoms = vec![
            Atom::new("Fe", [0.0, 0.0, 0.0]),
            Atom::new("Fe", [0.5, 0.5, 0.5]),
            Atom::new("O", [0.5, 0.0, 0.0]),
        ];
        Crystal::new("test", lattice, atoms)
    }

    #[test]
    fn test_default_configuration() {
        let crystal = fe2o3_like();
        let conf = MagneticSelector::TransitionMetals.default_configuration(&crystal, 4.0);
        assert_eq!(conf, vec![4.0, 4.0, 0.0]);

        let only_o = MagneticSelector::Elements(vec!["O".into()]);
        assert_eq!(only_o.default_configuration(&crystal, 4.0), vec![0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_classifier_counters() {
        let mask = [true, true, true, true, false];
        let mut classifier = StateClassifier::new(4.0);

        let fm = classifier.classify(&[4.0, 4.0, 4.0, 4.0, 0.0], &mask);
        let afm1 = classifier.classify(&[4.0, -4.0, 4.0, -4.0, 0.0], &mask);
        let fim1 = classifier.classify(&[4.0, 4.0, 4.0, -4.0, 0.0], &mask);
        let afm2 = classifier.classify(&[4.0, 4.0, -4.0, -4.0, 0.0], &mask);
        let nm = classifier.classify(&[0.0; 5], &mask);

        assert_eq!(fm.to_string(), "fm");
        assert_eq!(afm1.to_string(), "afm1");
        assert_eq!(fim1.to_string(), "fim1");
        assert_eq!(afm2.to_string(), "afm2");
        assert_eq!(nm.to_string(), "nm");
    }

    #[test]
    fn test_enumerate_single_magnetic_species() {
        let crystal = fe2o3_like();
        let confs = enumerate_configurations(&crystal, &MagneticSelector::TransitionMetals, 4.0).unwrap();

        // 3^2 - 全零 = 8，翻转对半 = 4
        assert_eq!(
            confs,
            vec![
                vec![4.0, 4.0, 0.0],
                vec![4.0, 0.0, 0.0],
                vec![4.0, -4.0, 0.0],
                vec![0.0, 4.0, 0.0],
            ]
        );

        let mask = MagneticSelector::TransitionMetals.mask(&crystal);
        let mut classifier = StateClassifier::new(4.0);
        let labels: Vec<String> = confs
            .iter()
            .map(|c| classifier.classify(c, &mask).to_string())
            .collect();
        assert!(labels.contains(&"fm".to_string()));
        assert!(labels.contains(&"afm1".to_string()));
    }

    #[test]
    fn test_enumerate_two_magnetic_species() {
        let lattice = Lattice::from_vectors([[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]]);
        let atoms = vec![
            Atom::new("Mn", [0.0, 0.0, 0.0]),
            Atom::new("Co", [0.5, 0.5, 0.5]),
        ];
        let crystal = Crystal::new("MnCo", lattice, atoms);
        let confs = enumerate_configurations(&crystal, &MagneticSelector::TransitionMetals, 4.0).unwrap();

        assert_eq!(confs.len(), 4);
        assert!(confs.contains(&vec![4.0, 4.0]));
        assert!(confs.contains(&vec![4.0, -4.0]));
    }

    #[test]
    fn test_enumerate_four_sites_without_flips() {
        let lattice = Lattice::from_vectors([[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]]);
        let atoms = (0..4).map(|i| Atom::new("Ni", [0.25 * i as f64, 0.0, 0.0])).collect();
        let crystal = Crystal::new("Ni4", lattice, atoms);
        let confs = enumerate_configurations(&crystal, &MagneticSelector::TransitionMetals, 2.0).unwrap();

        assert_eq!(confs.len(), (81 - 1) / 2);
        for c in &confs {
            let flipped: Vec<f64> = c.iter().map(|m| -m).collect();
            assert!(!confs.contains(&flipped));
        }
    }

    #[test]
    fn test_enumerate_rejects_large_cells() {
        let lattice = Lattice::from_vectors([[20.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]]);
        let atoms = (0..=MAX_ENUMERATED_SITES)
            .map(|i| Atom::new("Fe", [0.05 * i as f64, 0.0, 0.0]))
            .collect();
        let crystal = Crystal::new("Fe11", lattice, atoms);
        assert!(enumerate_configurations(&crystal, &MagneticSelector::TransitionMetals, 4.0).is_err());
    }

    #[test]
    fn test_cartesian_product_order() {
        let p = cartesian_product(&[vec![1, 2], vec![10, 20]]);
        assert_eq!(p, vec![vec![1, 10], vec![1, 20], vec![2, 10], vec![2, 20]]);
    }

    #[test]
    fn test_kept_magmoms() {
        let initial = [4.0, -4.0, 0.0];
        assert!(kept_magmoms("afm1", &initial, &[3.8, -3.7, 0.02], 0.0));
        assert!(kept_magmoms("afm1", &initial, &[-3.8, 3.7, -0.3], 0.0));
        // 翻转了一个自旋
        assert!(!kept_magmoms("afm1", &initial, &[3.8, 3.7, 0.0], 0.0));
        // 低自旋
        assert!(!kept_magmoms("afm1", &initial, &[3.8, -1.2, 0.0], 2.0));
        // 截断后为零的小磁矩不影响非磁性位点
        assert!(kept_magmoms("afm1", &initial, &[3.8, -3.7, 0.9], 0.0));
    }
}
