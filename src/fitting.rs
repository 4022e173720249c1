//! # 拟合模块
//!
//! - 基于 SVD 的最小二乘（带秩检查）
//! - Pearson 相关系数与一元线性回归（线性响应 U）
//! - Bloch 曲线拟合临界温度
//! - Heisenberg 模型方程组与耦合常数拟合
//!
//! ## 依赖关系
//! - 被 `commands/analyze/` 使用
//! - 使用 `models/structure.rs`
//! - 使用 `nalgebra` 做矩阵分解

use crate::error::{AutomagError, Result};
use crate::models::Neighbor;
use nalgebra::{DMatrix, DVector};

/// eV 到 J 的换算
pub const EV_TO_JOULE: f64 = 1.60218e-19;

/// 临界指数的默认值
pub const DEFAULT_CRITICAL_EXPONENT: f64 = 0.34;

/// 判断两个近邻距离属于同一壳层的容差 (Å)
pub const DISTANCE_TOLERANCE: f64 = 0.05;

// ─────────────────────────────────────────────────────────────
// 最小二乘
// ─────────────────────────────────────────────────────────────

/// 最小二乘结果
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub solution: Vec<f64>,
    pub rank: usize,
    /// 残差平方和
    pub residual: f64,
}

/// 求解 `A x ≈ b` 的最小范数最小二乘解
///
/// 秩的判定阈值为 `σ_max · max(m, n) · ε`。
pub fn least_squares(rows: &[Vec<f64>], rhs: &[f64]) -> Result<LeastSquares> {
    let nrows = rows.len();
    if nrows == 0 {
        return Err(AutomagError::InsufficientData("empty system of equations".into()));
    }
    if nrows != rhs.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} equations but {} right-hand side values",
            nrows,
            rhs.len()
        )));
    }
    let ncols = rows[0].len();
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(AutomagError::InvalidArgument("rows of unequal length".into()));
    }

    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    let a = DMatrix::from_row_slice(nrows, ncols, &flat);
    let b = DVector::from_column_slice(rhs);

    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let eps = max_sv * nrows.max(ncols) as f64 * f64::EPSILON;
    let rank = svd.rank(eps);

    let x = svd
        .solve(&b, eps)
        .map_err(|e| AutomagError::Other(format!("SVD solve failed: {}", e)))?;
    let residual = (&a * &x - &b).norm_squared();

    Ok(LeastSquares {
        solution: x.iter().copied().collect(),
        rank,
        residual,
    })
}

// ─────────────────────────────────────────────────────────────
// 相关与回归
// ─────────────────────────────────────────────────────────────

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Pearson 相关系数；方差为零时返回 `None`
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

/// 一元线性回归结果
#[derive(Debug, Clone, Copy)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// 普通最小二乘直线拟合
pub fn linregress(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    if x.len() != y.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} x values but {} y values",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(AutomagError::InsufficientData(
            "at least two points are needed for a linear fit".into(),
        ));
    }

    let (mx, my) = (mean(x), mean(y));
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    if sxx == 0.0 {
        return Err(AutomagError::InsufficientData("all x values are identical".into()));
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: my - slope * mx,
        r_value: pearson(x, y).unwrap_or(0.0),
    })
}

/// 线性响应 U 的结果
#[derive(Debug, Clone, Copy)]
pub struct HubbardFit {
    pub nscf: LinearFit,
    pub scf: LinearFit,
    pub u: f64,
}

/// 由微扰 α 与非自洽、自洽 d 电子数计算 U = 1/χ − 1/χ₀
pub fn hubbard_u(alpha: &[f64], nscf: &[f64], scf: &[f64]) -> Result<HubbardFit> {
    let nscf = linregress(alpha, nscf)?;
    let scf = linregress(alpha, scf)?;
    if nscf.slope == 0.0 || scf.slope == 0.0 {
        return Err(AutomagError::InsufficientData("response slope is zero".into()));
    }
    Ok(HubbardFit {
        nscf,
        scf,
        u: 1.0 / scf.slope - 1.0 / nscf.slope,
    })
}

// ─────────────────────────────────────────────────────────────
// 临界温度
// ─────────────────────────────────────────────────────────────

/// `(1 - T/Tc)^β`，`T >= Tc` 时为 0
pub fn bloch_curve(temperature: f64, tc: f64, exponent: f64) -> f64 {
    let base = 1.0 - temperature / tc;
    if base > 0.0 {
        base.powf(exponent)
    } else {
        0.0
    }
}

/// 临界温度拟合结果
#[derive(Debug, Clone, Copy)]
pub struct CriticalFit {
    pub tc: f64,
    pub residual: f64,
}

/// 在整数 Tc = 1, 2, ... (< max T) 上扫描，取残差最小者（并列取最早）
///
/// Tc 至少为 1，即使 max T 不超过 1。
pub fn critical_temperature(temperatures: &[f64], magnetization: &[f64], exponent: f64) -> Result<CriticalFit> {
    if temperatures.len() != magnetization.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} temperatures but {} magnetization values",
            temperatures.len(),
            magnetization.len()
        )));
    }
    if temperatures.is_empty() {
        return Err(AutomagError::InsufficientData("no temperatures to fit".into()));
    }
    let t_max = temperatures.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let residual = |tc: f64| -> f64 {
        temperatures
            .iter()
            .zip(magnetization)
            .map(|(t, m)| (m - bloch_curve(*t, tc, exponent)).powi(2))
            .sum()
    };

    // 温度不超过 1 K 时没有可扫描的 Tc，停在下限 1
    let mut best = CriticalFit {
        tc: 1.0,
        residual: residual(1.0),
    };
    let mut trial = 2.0;
    while trial < t_max {
        let r = residual(trial);
        if r < best.residual {
            best = CriticalFit { tc: trial, residual: r };
        }
        trial += 1.0;
    }
    Ok(best)
}

// ─────────────────────────────────────────────────────────────
// Heisenberg 模型
// ─────────────────────────────────────────────────────────────

/// 近邻距离保留两位小数后去重排序，并统计每个壳层的近邻数
pub fn unique_distances(neighbors: &[Neighbor]) -> (Vec<f64>, Vec<usize>) {
    let mut rounded: Vec<f64> = neighbors
        .iter()
        .map(|n| (n.distance * 100.0).round_ties_even() / 100.0)
        .collect();
    rounded.sort_by(|a, b| a.total_cmp(b));

    let mut distances: Vec<f64> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for d in rounded {
        match distances.last() {
            Some(last) if *last == d => {
                if let Some(c) = counts.last_mut() {
                    *c += 1;
                }
            }
            _ => {
                distances.push(d);
                counts.push(1);
            }
        }
    }
    (distances, counts)
}

fn same_shell(d: f64, shell: f64) -> bool {
    (d - shell).abs() <= DISTANCE_TOLERANCE + 1e-5 * shell.abs()
}

/// 一个配置对应的方程：`[1, -(Σ s_i s_j) ⌊/⌋ 2, ...]`
pub fn heisenberg_row(neighbors: &[Neighbor], spins: &[i32], shells: &[f64]) -> Vec<f64> {
    let mut row = Vec::with_capacity(shells.len() + 1);
    row.push(1.0);
    for &shell in shells {
        let count: i64 = neighbors
            .iter()
            .filter(|n| same_shell(n.distance, shell))
            .map(|n| (spins[n.center] * spins[n.point]) as i64)
            .sum();
        row.push((-count).div_euclid(2) as f64);
    }
    row
}

/// 耦合常数拟合结果
#[derive(Debug, Clone)]
pub struct CouplingFit {
    pub distances: Vec<f64>,
    pub counts: Vec<usize>,
    /// 参考能量 E0 (eV)
    pub e0: f64,
    /// 耦合常数 (J)
    pub coupling_constants: Vec<f64>,
    /// 对照组的模型预测与 DFT 能量
    pub predictions: Vec<f64>,
    pub control_energies: Vec<f64>,
    /// 对照组上的 Pearson 相关系数
    pub pcc: Option<f64>,
}

/// 拟合 Heisenberg 耦合常数
///
/// 前 `round(n · (1 - control_fraction))` 个配置用于拟合，其余作为对照组。
pub fn fit_coupling_constants(
    neighbors: &[Neighbor],
    states: &[Vec<i32>],
    energies: &[f64],
    control_fraction: f64,
) -> Result<CouplingFit> {
    if states.len() != energies.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "{} states but {} energies",
            states.len(),
            energies.len()
        )));
    }
    if !(0.0..1.0).contains(&control_fraction) {
        return Err(AutomagError::InvalidArgument(format!(
            "control group size must be in [0, 1), got {}",
            control_fraction
        )));
    }

    let (distances, counts) = unique_distances(neighbors);
    if distances.is_empty() {
        return Err(AutomagError::InsufficientData(
            "no magnetic neighbors within the cutoff radius".into(),
        ));
    }

    let num_atoms = neighbors
        .iter()
        .map(|n| n.center.max(n.point) + 1)
        .max()
        .unwrap_or(0);
    if let Some(bad) = states.iter().find(|s| s.len() < num_atoms) {
        return Err(AutomagError::InvalidArgument(format!(
            "state with {} spins for {} magnetic atoms",
            bad.len(),
            num_atoms
        )));
    }

    let split = (states.len() as f64 * (1.0 - control_fraction)).round_ties_even() as usize;
    let rows: Vec<Vec<f64>> = states
        .iter()
        .map(|s| heisenberg_row(neighbors, s, &distances))
        .collect();

    let unknowns = distances.len() + 1;
    let fit = least_squares(&rows[..split], &energies[..split])?;
    if fit.rank != unknowns {
        return Err(AutomagError::RankDeficient {
            rank: fit.rank,
            unknowns,
        });
    }
    log::debug!("Heisenberg fit residual: {:.6e}", fit.residual);

    let predictions: Vec<f64> = rows[split..]
        .iter()
        .map(|r| r.iter().zip(&fit.solution).map(|(a, x)| a * x).sum())
        .collect();
    let control_energies = energies[split..].to_vec();
    let pcc = pearson(&predictions, &control_energies);

    Ok(CouplingFit {
        distances,
        counts,
        e0: fit.solution[0],
        coupling_constants: fit.solution[1..].iter().map(|j| j * EV_TO_JOULE).collect(),
        predictions,
        control_energies,
        pcc,
    })
}
