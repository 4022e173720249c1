//! # VASP 计算结果数据模型
//!
//! 存储从 OUTCAR 提取的信息，以及结果文件中的每一条记录。
//!
//! ## 依赖关系
//! - 被 `parsers/outcar.rs`, `parsers/results.rs` 使用
//! - 被 `workflow/runner.rs`, `commands/analyze/` 使用

use serde::{Deserialize, Serialize};

/// 单次 VASP 计算的 OUTCAR 解析结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaspRun {
    /// 计算名称（通常为目录名）
    pub name: String,

    /// 计算是否正常结束
    pub is_finished: bool,

    /// 电子步是否收敛（最后一个离子步）
    pub electronic_converged: bool,

    /// 离子步是否收敛（仅在结构优化时有意义）
    pub ionic_converged: bool,

    /// 是否为结构优化 (NSW > 0 且 IBRION >= 0)
    pub is_relaxation: bool,

    /// 自由能 TOTEN (eV)
    pub free_energy: Option<f64>,

    /// energy(sigma->0) (eV)
    pub energy_sigma0: Option<f64>,

    /// 焓 (eV)
    pub enthalpy: Option<f64>,

    /// 体积 (Å³)
    pub volume: Option<f64>,

    /// 原子数
    pub num_atoms: Option<usize>,

    /// 最终磁矩（magnetization (x) 的 tot 列）
    pub magmoms: Option<Vec<f64>>,
}

impl VaspRun {
    pub fn new(name: impl Into<String>) -> Self {
        VaspRun {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 电子步与离子步都收敛
    pub fn converged(&self) -> bool {
        if self.is_relaxation {
            self.electronic_converged && self.ionic_converged
        } else {
            self.electronic_converged
        }
    }

    /// 计算每原子自由能
    pub fn energy_per_atom(&self) -> Option<f64> {
        match (self.free_energy, self.num_atoms) {
            (Some(e), Some(n)) if n > 0 => Some(e / n as f64),
            _ => None,
        }
    }
}

/// 收敛标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceFlag {
    Converged,
    NonConverged,
}

impl ConvergenceFlag {
    pub fn from_bool(converged: bool) -> Self {
        if converged {
            ConvergenceFlag::Converged
        } else {
            ConvergenceFlag::NonConverged
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "converged" => Some(ConvergenceFlag::Converged),
            "NONCONVERGED" => Some(ConvergenceFlag::NonConverged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConvergenceFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceFlag::Converged => write!(f, "converged"),
            ConvergenceFlag::NonConverged => write!(f, "NONCONVERGED"),
        }
    }
}

/// 能量的类型（自由能或焓）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyKind {
    Energy,
    Enthalpy,
}

impl std::fmt::Display for EnergyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnergyKind::Energy => write!(f, "energy"),
            EnergyKind::Enthalpy => write!(f, "enthalpy"),
        }
    }
}

/// 结果文件中的一条记录（主行 + 可选的磁矩行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// 配置或参数标签，例如 `afm1`, `encut500`
    pub label: String,

    /// 工作流第一个 firework 的 id
    pub fw_id: u32,

    /// 每个阶段的 (名称, 收敛标记)
    pub stages: Vec<(String, ConvergenceFlag)>,

    /// 化学式
    pub formula: String,

    /// 能量类型
    pub kind: EnergyKind,

    /// 能量或焓 (eV)
    pub energy: f64,

    /// 初始磁矩
    pub initial_magmoms: Option<Vec<f64>>,

    /// 最终磁矩
    pub final_magmoms: Option<Vec<f64>>,
}

impl ResultRecord {
    /// 所有阶段均收敛
    pub fn is_converged(&self) -> bool {
        self.stages
            .iter()
            .all(|(_, flag)| *flag == ConvergenceFlag::Converged)
    }

    /// 第一个未收敛阶段的名称
    pub fn first_nonconverged(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|(_, flag)| *flag == ConvergenceFlag::NonConverged)
            .map(|(name, _)| name.as_str())
    }
}
