//! # 配置模块
//!
//! 读取每个阶段的 JSON 输入文件，并从环境变量获取运行环境。
//!
//! ## 输入文件示例
//! ```json
//! {
//!   "poscar_file": "Fe2O3-alpha.vasp",
//!   "params": {"xc": "PBE", "encut": 820, "ediff": 1e-6, "kpts": 20},
//!   "magnetic_atoms": ["Fe"],
//!   "perturbations": [-0.08, -0.05, 0.05, 0.08]
//! }
//! ```
//!
//! ## 环境变量
//! - `AUTOMAG_PATH`: 根目录，结果目录为 `$AUTOMAG_PATH/CalcFold`
//! - `HOME`: 工作流写入结果文件的默认目录
//! - `USER`: 查询 squeue 时使用
//! - `AUTOMAG_VASP_COMMAND`: 本地运行 VASP 的命令
//! - `AUTOMAG_POTCAR_DIR`: POTCAR 库目录
//!
//! ## 依赖关系
//! - 被 `commands/`, `workflow/runner.rs` 使用
//! - 使用 `parsers/poscar.rs`, `models/magnetic.rs`

use crate::error::{AutomagError, Result};
use crate::models::{Crystal, MagneticSelector};
use crate::parsers::incar::CalcParams;
use crate::parsers::poscar;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// 本地运行 VASP 的默认命令
pub const DEFAULT_VASP_COMMAND: &str = "mpirun vasp_std";

/// 默认的磁矩大小
pub const DEFAULT_SPIN_VALUE: f64 = 4.0;

fn default_spin_value() -> f64 {
    DEFAULT_SPIN_VALUE
}

fn default_cutoff_radius() -> f64 {
    3.8
}

fn default_control_group_size() -> f64 {
    0.4
}

/// 单个阶段的输入参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageInput {
    /// 结构文件，相对路径以输入文件所在目录为基准
    #[serde(default)]
    pub poscar_file: Option<PathBuf>,

    /// 计算参数
    #[serde(default)]
    pub params: CalcParams,

    /// 磁性元素（默认过渡金属）
    #[serde(default)]
    pub magnetic_atoms: Option<Vec<String>>,

    /// 显式磁矩配置
    #[serde(default)]
    pub configuration: Option<Vec<f64>>,

    // ── 收敛测试 ──
    #[serde(default)]
    pub encut_values: Option<Vec<f64>>,
    #[serde(default)]
    pub sigma_values: Option<Vec<f64>>,
    #[serde(default)]
    pub kpts_values: Option<Vec<f64>>,

    // ── 线性响应 ──
    #[serde(default)]
    pub dummy_atom: Option<String>,
    #[serde(default)]
    pub dummy_position: Option<usize>,
    #[serde(default)]
    pub perturbations: Option<Vec<f64>>,

    // ── 共线配置 ──
    #[serde(default = "default_spin_value")]
    pub spin_value: f64,
    #[serde(default)]
    pub hs_cutoff: f64,

    // ── Monte Carlo ──
    #[serde(default = "default_cutoff_radius")]
    pub cutoff_radius: f64,
    #[serde(default = "default_control_group_size")]
    pub control_group_size: f64,
    #[serde(default)]
    pub distances_between_neighbors: Option<Vec<f64>>,
    #[serde(default)]
    pub coupling_constants: Option<Vec<f64>>,
    #[serde(default)]
    pub configuration_label: Option<String>,

    /// 输入文件所在目录
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl StageInput {
    /// 从 JSON 文件读取
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
        let mut input: StageInput = serde_json::from_str(&text)?;
        input.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::debug!("Loaded stage input from {}", path.display());
        Ok(input)
    }

    /// 结构文件的完整路径
    pub fn poscar_path(&self) -> Result<PathBuf> {
        let file = self.poscar_file.as_ref().ok_or_else(|| {
            AutomagError::InvalidArgument("poscar_file is missing from the input file".into())
        })?;
        if file.is_absolute() {
            Ok(file.clone())
        } else {
            Ok(self.base_dir.join(file))
        }
    }

    /// 读取结构
    pub fn crystal(&self) -> Result<Crystal> {
        poscar::parse_poscar_file(&self.poscar_path()?)
    }

    pub fn selector(&self) -> MagneticSelector {
        MagneticSelector::from_option(self.magnetic_atoms.as_deref())
    }

    /// 初始磁矩：显式配置，或磁性原子取 `spin_value`
    pub fn magmoms(&self, crystal: &Crystal) -> Result<Vec<f64>> {
        match &self.configuration {
            Some(conf) if conf.len() != crystal.len() => Err(AutomagError::InvalidArgument(format!(
                "configuration has {} moments but the structure has {} atoms",
                conf.len(),
                crystal.len()
            ))),
            Some(conf) => Ok(conf.clone()),
            None => Ok(self.selector().default_configuration(crystal, self.spin_value)),
        }
    }

    /// ENCUT 取值，默认 500..=1000 步长 10
    pub fn encut_values(&self) -> Vec<f64> {
        self.encut_values
            .clone()
            .unwrap_or_else(|| (500..=1000).step_by(10).map(f64::from).collect())
    }

    /// SIGMA 取值，默认 0.05 到 0.20
    pub fn sigma_values(&self) -> Vec<f64> {
        self.sigma_values
            .clone()
            .unwrap_or_else(|| vec![0.05, 0.1, 0.15, 0.2])
    }

    /// k 点长度取值，默认 20..=100 步长 10
    pub fn kpts_values(&self) -> Vec<f64> {
        self.kpts_values
            .clone()
            .unwrap_or_else(|| (20..=100).step_by(10).map(f64::from).collect())
    }

    pub fn require_perturbations(&self) -> Result<Vec<f64>> {
        match &self.perturbations {
            Some(p) if !p.is_empty() => Ok(p.clone()),
            _ => Err(AutomagError::InvalidArgument(
                "perturbations must be given for linear response".into(),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 运行环境
// ─────────────────────────────────────────────────────────────

/// 从环境变量得到的运行环境
#[derive(Debug, Clone)]
pub struct Environment {
    pub automag_path: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub user: Option<String>,
    pub vasp_command: String,
    pub potcar_dir: Option<PathBuf>,
}

impl Environment {
    pub fn from_env() -> Self {
        let path = |key: &str| env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        Environment {
            automag_path: path("AUTOMAG_PATH"),
            home: path("HOME"),
            user: env::var("USER").ok().filter(|u| !u.is_empty()),
            vasp_command: env::var("AUTOMAG_VASP_COMMAND")
                .ok()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VASP_COMMAND.to_string()),
            potcar_dir: path("AUTOMAG_POTCAR_DIR"),
        }
    }

    /// `$AUTOMAG_PATH/CalcFold`
    pub fn calc_fold(&self) -> Result<PathBuf> {
        self.automag_path
            .as_ref()
            .map(|p| p.join("CalcFold"))
            .ok_or_else(|| AutomagError::MissingEnv("AUTOMAG_PATH".into()))
    }

    /// 工作流写入结果文件的目录
    pub fn output_dir(&self) -> Result<PathBuf> {
        self.home
            .clone()
            .ok_or_else(|| AutomagError::MissingEnv("HOME".into()))
    }

    /// 分析时读取结果文件的目录：优先 CalcFold，其次 HOME
    pub fn results_dir(&self) -> Result<PathBuf> {
        self.calc_fold().or_else(|_| self.output_dir())
    }

    pub fn user(&self) -> Result<String> {
        self.user
            .clone()
            .ok_or_else(|| AutomagError::MissingEnv("USER".into()))
    }
}

// ─────────────────────────────────────────────────────────────
// 日志
// ─────────────────────────────────────────────────────────────

/// 初始化日志：默认 warn，`-v` 为 info，`-vv` 及以上为 debug。
/// `RUST_LOG` 优先。
pub fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POSCAR: &str = "FeO\n1.0\n3.0 0.0 0.0\n0.0 3.0 0.0\n0.0 0.0 3.0\nFe O\n1 1\nDirect\n0.0 0.0 0.0\n0.5 0.5 0.5\n";

    #[test]
    fn test_defaults() {
        let input: StageInput = serde_json::from_str(r#"{"params": {"encut": 520}}"#).unwrap();

        assert_eq!(input.spin_value, 4.0);
        assert_eq!(input.hs_cutoff, 0.0);
        assert_eq!(input.cutoff_radius, 3.8);
        assert_eq!(input.encut_values().len(), 51);
        assert_eq!(input.encut_values()[0], 500.0);
        assert_eq!(input.sigma_values(), vec![0.05, 0.1, 0.15, 0.2]);
        assert_eq!(input.kpts_values().last(), Some(&100.0));
        assert!(input.require_perturbations().is_err());
        assert!(input.poscar_path().is_err());
    }

    #[test]
    fn test_from_file_resolves_poscar() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("FeO.vasp"), POSCAR).unwrap();

        let input_path = dir.path().join("input.json");
        let mut f = fs::File::create(&input_path).unwrap();
        write!(f, r#"{{"poscar_file": "FeO.vasp", "params": {{}}, "spin_value": 5.0}}"#).unwrap();

        let input = StageInput::from_file(&input_path).unwrap();
        let crystal = input.crystal().unwrap();
        assert_eq!(crystal.len(), 2);
        assert_eq!(input.magmoms(&crystal).unwrap(), vec![5.0, 0.0]);
    }

    #[test]
    fn test_explicit_configuration_length() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("FeO.vasp"), POSCAR).unwrap();
        let input: StageInput = serde_json::from_str(
            r#"{"poscar_file": "FeO.vasp", "configuration": [4.0, 0.0, 0.0]}"#,
        )
        .unwrap();
        let input = StageInput {
            base_dir: dir.path().to_path_buf(),
            ..input
        };
        let crystal = input.crystal().unwrap();
        assert!(input.magmoms(&crystal).is_err());
    }
}
