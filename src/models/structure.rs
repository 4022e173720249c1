//! # 结构与磁性子晶格
//!
//! 工作流各阶段共用的结构表示：晶胞、按 POSCAR 顺序排列的原子，
//! 以及耦合常数拟合与 UCF 输出所需的周期性近邻搜索。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `workflow/`, `fitting.rs` 使用
//! - 只依赖 serde

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 晶胞
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// 每行一个晶格向量，单位 Å
    pub matrix: [[f64; 3]; 3],
}

impl Lattice {
    pub fn from_vectors(matrix: [[f64; 3]; 3]) -> Self {
        Lattice { matrix }
    }

    /// 晶格向量长度 (a, b, c)
    pub fn lengths(&self) -> [f64; 3] {
        let mut abc = [0.0; 3];
        for (i, v) in self.matrix.iter().enumerate() {
            abc[i] = norm(*v);
        }
        abc
    }

    /// (a, b, c, α, β, γ)，角度单位为度
    pub fn parameters(&self) -> (f64, f64, f64, f64, f64, f64) {
        let [a_vec, b_vec, c_vec] = self.matrix;
        let [a, b, c] = self.lengths();

        let alpha = (dot(b_vec, c_vec) / (b * c)).acos().to_degrees();
        let beta = (dot(a_vec, c_vec) / (a * c)).acos().to_degrees();
        let gamma = (dot(a_vec, b_vec) / (a * b)).acos().to_degrees();

        (a, b, c, alpha, beta, gamma)
    }

    /// 有符号体积
    pub fn volume(&self) -> f64 {
        let [a, b, c] = self.matrix;
        dot(a, cross(b, c))
    }

    pub fn to_cartesian(&self, frac: [f64; 3]) -> [f64; 3] {
        let m = self.matrix;
        [
            frac[0] * m[0][0] + frac[1] * m[1][0] + frac[2] * m[2][0],
            frac[0] * m[0][1] + frac[1] * m[1][1] + frac[2] * m[2][1],
            frac[0] * m[0][2] + frac[1] * m[1][2] + frac[2] * m[2][2],
        ]
    }

    /// 笛卡尔坐标转分数坐标，奇异晶格时原样返回
    pub fn to_fractional(&self, cart: [f64; 3]) -> [f64; 3] {
        let [a, b, c] = self.matrix;
        let det = self.volume();
        if det.abs() < 1e-10 {
            return cart;
        }

        // 倒格子行向量 (不含 2π)
        let ra = cross(b, c);
        let rb = cross(c, a);
        let rc = cross(a, b);
        [
            dot(ra, cart) / det,
            dot(rb, cart) / det,
            dot(rc, cart) / det,
        ]
    }

    /// 三个方向的晶面间距，用于确定近邻搜索的镜像范围
    fn plane_spacings(&self) -> [f64; 3] {
        let [a, b, c] = self.matrix;
        let vol = self.volume().abs();
        [
            vol / norm(cross(b, c)),
            vol / norm(cross(c, a)),
            vol / norm(cross(a, b)),
        ]
    }
}

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号
    pub element: String,

    /// 分数坐标 [x, y, z]
    pub position: [f64; 3],
}

impl Atom {
    pub fn new(element: impl Into<String>, position: [f64; 3]) -> Self {
        Atom {
            element: element.into(),
            position,
        }
    }
}

/// 周期性近邻对
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// 中心原子索引
    pub center: usize,
    /// 近邻原子索引
    pub point: usize,
    /// 近邻所在的晶胞镜像
    pub image: [i32; 3],
    /// 距离 (Å)
    pub distance: f64,
}

/// 晶体结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 晶格
    pub lattice: Lattice,

    /// 原子列表
    pub atoms: Vec<Atom>,
}

impl Crystal {
    pub fn new(name: impl Into<String>, lattice: Lattice, atoms: Vec<Atom>) -> Self {
        Crystal {
            name: name.into(),
            lattice,
            atoms,
        }
    }

    /// 原子数
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// 按首次出现顺序排列的元素种类
    pub fn species(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for atom in &self.atoms {
            if !order.contains(&atom.element) {
                order.push(atom.element.clone());
            }
        }
        order
    }

    fn element_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// 计算化学式
    pub fn formula(&self) -> String {
        format_formula(&self.element_counts(), 1)
    }

    /// 约化化学式，超胞与原胞相同，例如 Fe12O18 -> Fe2O3
    pub fn reduced_formula(&self) -> String {
        let counts = self.element_counts();
        let divisor = counts.values().fold(0, |g, n| gcd(g, *n)).max(1);
        format_formula(&counts, divisor)
    }

    /// 元素符号列表
    pub fn symbols(&self) -> Vec<&str> {
        self.atoms.iter().map(|a| a.element.as_str()).collect()
    }

    /// 只保留满足条件的原子
    pub fn retain_atoms<F>(&self, keep: F) -> Crystal
    where
        F: Fn(&Atom) -> bool,
    {
        let atoms = self.atoms.iter().filter(|a| keep(a)).cloned().collect();
        Crystal::new(self.name.clone(), self.lattice.clone(), atoms)
    }

    /// 截断半径内的所有周期性近邻对（不含自身零距离）
    ///
    /// 分数坐标先折回 [0, 1)，`image` 是相对折回后位置的平移。
    /// 每对原子在两个方向上都会出现，按 (center, point, image) 排序。
    pub fn neighbor_list(&self, cutoff: f64) -> Vec<Neighbor> {
        // 折回后坐标差在 (-1, 1) 内，需多扫描一层镜像
        let ranges: Vec<i32> = self
            .lattice
            .plane_spacings()
            .iter()
            .map(|h| (cutoff / h).ceil() as i32 + 1)
            .collect();
        let wrapped: Vec<[f64; 3]> = self
            .atoms
            .iter()
            .map(|a| a.position.map(|x| x.rem_euclid(1.0)))
            .collect();

        let mut neighbors = Vec::new();
        for (i, center) in wrapped.iter().enumerate() {
            for (j, point) in wrapped.iter().enumerate() {
                for na in -ranges[0]..=ranges[0] {
                    for nb in -ranges[1]..=ranges[1] {
                        for nc in -ranges[2]..=ranges[2] {
                            let frac = [
                                point[0] + na as f64 - center[0],
                                point[1] + nb as f64 - center[1],
                                point[2] + nc as f64 - center[2],
                            ];
                            let d = norm(self.lattice.to_cartesian(frac));
                            if d > 1e-8 && d <= cutoff + 1e-8 {
                                neighbors.push(Neighbor {
                                    center: i,
                                    point: j,
                                    image: [na, nb, nc],
                                    distance: d,
                                });
                            }
                        }
                    }
                }
            }
        }
        neighbors
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn format_formula(counts: &BTreeMap<&str, usize>, divisor: usize) -> String {
    counts
        .iter()
        .map(|(el, count)| match count / divisor {
            1 => el.to_string(),
            n => format!("{}{}", el, n),
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(a: f64) -> Lattice {
        Lattice::from_vectors([[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]])
    }

    #[test]
    fn test_volume_sign_follows_handedness() {
        assert!((cubic(5.0).volume() - 125.0).abs() < 1e-9);
        let left = Lattice::from_vectors([[0.0, 2.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 2.0]]);
        assert!((left.volume() + 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_hexagonal_parameters() {
        let h = 5.035 * 3f64.sqrt() / 2.0;
        let lattice = Lattice::from_vectors([[5.035, 0.0, 0.0], [-2.5175, h, 0.0], [0.0, 0.0, 13.75]]);
        let (a, b, c, alpha, beta, gamma) = lattice.parameters();

        assert!((a - b).abs() < 1e-9 && (a - 5.035).abs() < 1e-9);
        assert!((c - 13.75).abs() < 1e-9);
        assert!((alpha - 90.0).abs() < 1e-6 && (beta - 90.0).abs() < 1e-6);
        assert!((gamma - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_fractional_cartesian_inverse() {
        let lattice = Lattice::from_vectors([[4.0, 0.0, 0.0], [1.0, 3.0, 0.0], [0.5, 0.5, 6.0]]);
        let frac = [0.25, 0.5, 0.75];
        let back = lattice.to_fractional(lattice.to_cartesian(frac));
        for k in 0..3 {
            assert!((back[k] - frac[k]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_crystal_formula_and_species() {
        let atoms = vec![
            Atom::new("Fe", [0.0, 0.0, 0.0]),
            Atom::new("O", [0.5, 0.0, 0.0]),
            Atom::new("Fe", [0.5, 0.5, 0.5]),
            Atom::new("O", [0.0, 0.5, 0.0]),
            Atom::new("O", [0.0, 0.0, 0.5]),
        ];
        let crystal = Crystal::new("Fe2O3", cubic(5.0), atoms);

        assert_eq!(crystal.formula(), "Fe2O3");
        assert_eq!(crystal.reduced_formula(), "Fe2O3");
        assert_eq!(crystal.species(), vec!["Fe".to_string(), "O".to_string()]);
    }

    #[test]
    fn test_reduced_formula_of_supercell() {
        let atoms: Vec<Atom> = (0..4)
            .map(|i| Atom::new("Fe", [0.1 * i as f64, 0.0, 0.0]))
            .chain((0..6).map(|i| Atom::new("O", [0.0, 0.1 * i as f64, 0.0])))
            .collect();
        let crystal = Crystal::new("Fe4O6", cubic(5.0), atoms);

        assert_eq!(crystal.formula(), "Fe4O6");
        assert_eq!(crystal.reduced_formula(), "Fe2O3");
    }

    #[test]
    fn test_neighbor_list_simple_cubic() {
        let crystal = Crystal::new("Po", cubic(3.0), vec![Atom::new("Po", [0.0, 0.0, 0.0])]);
        let neighbors = crystal.neighbor_list(3.1);

        // 简单立方: 6 个最近邻
        assert_eq!(neighbors.len(), 6);
        assert!(neighbors.iter().all(|n| (n.distance - 3.0).abs() < 1e-10));
    }

    #[test]
    fn test_neighbor_list_bcc_two_shells() {
        let atoms = vec![
            Atom::new("Fe", [0.0, 0.0, 0.0]),
            Atom::new("Fe", [0.5, 0.5, 0.5]),
        ];
        let crystal = Crystal::new("Fe", cubic(2.87), atoms);
        let neighbors = crystal.neighbor_list(3.0);

        let first: Vec<_> = neighbors.iter().filter(|n| n.distance < 2.6).collect();
        let second: Vec<_> = neighbors.iter().filter(|n| n.distance > 2.6).collect();

        // 每个原子 8 个第一近邻、6 个第二近邻
        assert_eq!(first.len(), 16);
        assert_eq!(second.len(), 12);
    }

    #[test]
    fn test_neighbor_list_ignores_unwrapped_coordinates() {
        let lattice = Lattice::from_vectors([[3.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]]);
        let inside = Crystal::new(
            "Fe2",
            lattice.clone(),
            vec![Atom::new("Fe", [0.6, 0.0, 0.0]), Atom::new("Fe", [0.9, 0.0, 0.0])],
        );
        let outside = Crystal::new(
            "Fe2",
            lattice,
            vec![Atom::new("Fe", [-0.4, 0.0, 0.0]), Atom::new("Fe", [0.9, 0.0, 1.0])],
        );

        let a = inside.neighbor_list(2.5);
        let b = outside.neighbor_list(2.5);
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), a.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!((x.center, x.point, x.image), (y.center, y.point, y.image));
            assert!((x.distance - y.distance).abs() < 1e-10);
        }
    }

    #[test]
    fn test_retain_atoms() {
        let atoms = vec![
            Atom::new("Mn", [0.0, 0.0, 0.0]),
            Atom::new("O", [0.5, 0.5, 0.5]),
        ];
        let crystal = Crystal::new("MnO", cubic(4.0), atoms);
        let magnetic = crystal.retain_atoms(|a| a.element == "Mn");
        assert_eq!(magnetic.len(), 1);
        assert_eq!(magnetic.atoms[0].element, "Mn");
    }
}
