//! # 工作流构建
//!
//! 根据提交模式把一组计算参数展开为若干工作流，每个工作流由若干阶段组成：
//! ```text
//! [relax] -> singlepoint -> [nsc/sc × N] -> write_output
//! ```
//! 相邻阶段之间的连接按位置约定生成：
//! - 单节点阶段连到下一阶段的所有节点
//! - 多节点阶段连到下一阶段的单个节点
//! - 节点数相同的阶段一一对应
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `workflow/task.rs`, `workflow/launchpad.rs`
//! - 使用 `models/`, `parsers/incar.rs`, `parsers/poscar.rs`

use super::launchpad::LaunchPad;
use super::task::{Firework, MagmomSource, StructureSource, Task, VaspTask, WriteOutputTask};
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::magnetic::cartesian_product;
use crate::models::Crystal;
use crate::parsers::incar::{CalcParams, ParamValue};
use crate::parsers::poscar::species_runs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 结构优化相关、在单点计算中移除的标签
const RELAX_ONLY_KEYS: &[&str] = &["ediffg", "ibrion", "isif", "nsw", "potim", "ismear", "sigma"];

// ─────────────────────────────────────────────────────────────
// 工作流
// ─────────────────────────────────────────────────────────────

/// 工作流：firework 列表 + 邻接表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub fws: Vec<Firework>,
    pub links: BTreeMap<u32, Vec<u32>>,
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Workflow {
    /// 由阶段列表构建工作流
    pub fn from_stages(name: impl Into<String>, stages: Vec<Vec<Firework>>) -> Result<Self> {
        let name = name.into();
        if stages.iter().any(|s| s.is_empty()) {
            return Err(AutomagError::InvalidWorkflow {
                name,
                reason: "empty stage".into(),
            });
        }

        let links = build_links(&stages)?;
        let fws: Vec<Firework> = stages.into_iter().flatten().collect();

        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = fws.iter().find(|fw| !seen.insert(fw.fw_id)) {
            return Err(AutomagError::InvalidWorkflow {
                name,
                reason: format!("duplicate fw_id {}", dup.fw_id),
            });
        }

        Ok(Workflow {
            fws,
            links,
            name,
            metadata: BTreeMap::new(),
        })
    }

    pub fn firework(&self, fw_id: u32) -> Option<&Firework> {
        self.fws.iter().find(|fw| fw.fw_id == fw_id)
    }

    /// 每个节点的上游节点，按 fw_id 排序
    pub fn parents(&self) -> BTreeMap<u32, Vec<u32>> {
        let mut parents: BTreeMap<u32, Vec<u32>> =
            self.fws.iter().map(|fw| (fw.fw_id, Vec::new())).collect();
        for (parent, children) in &self.links {
            for child in children {
                parents.entry(*child).or_default().push(*parent);
            }
        }
        for list in parents.values_mut() {
            list.sort_unstable();
        }
        parents
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// 按位置约定连接相邻阶段，最后一阶段的节点映射到空列表
pub fn build_links(stages: &[Vec<Firework>]) -> Result<BTreeMap<u32, Vec<u32>>> {
    let mut links = BTreeMap::new();

    for (i, pair) in stages.windows(2).enumerate() {
        let (current, next) = (&pair[0], &pair[1]);
        let next_ids: Vec<u32> = next.iter().map(|fw| fw.fw_id).collect();

        if current.len() == 1 {
            links.insert(current[0].fw_id, next_ids);
        } else if next.len() == 1 {
            for fw in current {
                links.insert(fw.fw_id, next_ids.clone());
            }
        } else if current.len() == next.len() {
            for (fw, child) in current.iter().zip(&next_ids) {
                links.insert(fw.fw_id, vec![*child]);
            }
        } else {
            return Err(AutomagError::LinkMismatch {
                stage: i,
                from: current.len(),
                to: next.len(),
            });
        }
    }

    if let Some(last) = stages.last() {
        for fw in last {
            links.insert(fw.fw_id, Vec::new());
        }
    }

    Ok(links)
}

// ─────────────────────────────────────────────────────────────
// 提交模式
// ─────────────────────────────────────────────────────────────

/// 提交模式及其可变参数
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitMode {
    Encut(Vec<f64>),
    Kgrid { sigmas: Vec<f64>, kpts: Vec<f64> },
    Perturbations(Vec<f64>),
    Relax,
    SinglePoint,
}

impl SubmitMode {
    /// 从模式名与阶段输入构造
    pub fn from_input(mode: &str, input: &StageInput) -> Result<Self> {
        match mode {
            "encut" => Ok(SubmitMode::Encut(input.encut_values())),
            "kgrid" => Ok(SubmitMode::Kgrid {
                sigmas: input.sigma_values(),
                kpts: input.kpts_values(),
            }),
            "perturbations" => Ok(SubmitMode::Perturbations(input.require_perturbations()?)),
            "relax" => Ok(SubmitMode::Relax),
            "singlepoint" => Ok(SubmitMode::SinglePoint),
            other => Err(AutomagError::UnsupportedMode(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubmitMode::Encut(_) => "encut",
            SubmitMode::Kgrid { .. } => "kgrid",
            SubmitMode::Perturbations(_) => "perturbations",
            SubmitMode::Relax => "relax",
            SubmitMode::SinglePoint => "singlepoint",
        }
    }
}

/// 整数值用整数写入参数表，例如 ENCUT = 500
fn number(v: f64) -> ParamValue {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        ParamValue::Int(v as i64)
    } else {
        ParamValue::Float(v)
    }
}

/// 把一组结构与参数按模式展开为工作流
#[derive(Debug, Clone)]
pub struct SubmitFirework {
    crystal: Crystal,
    mode: SubmitMode,
    params: CalcParams,
    magmoms: Vec<f64>,
    configuration: Option<String>,
    bare_dir: Option<PathBuf>,
    self_consistent: bool,
    read_enthalpy: bool,
}

impl SubmitFirework {
    pub fn new(crystal: Crystal, mode: SubmitMode, params: CalcParams, magmoms: Vec<f64>) -> Result<Self> {
        if magmoms.len() != crystal.len() {
            return Err(AutomagError::InvalidArgument(format!(
                "{} magnetic moments for {} atoms",
                magmoms.len(),
                crystal.len()
            )));
        }
        Ok(SubmitFirework {
            crystal,
            mode,
            params,
            magmoms,
            configuration: None,
            bare_dir: None,
            self_consistent: false,
            read_enthalpy: false,
        })
    }

    /// 配置标签，用作无可变参数时的工作流名称
    pub fn configuration(mut self, label: impl Into<String>) -> Self {
        self.configuration = Some(label.into());
        self
    }

    /// 微扰计算从该目录读取 CHGCAR 与 WAVECAR
    pub fn bare_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.bare_dir = dir;
        self
    }

    /// 自洽微扰计算（不设置 ICHARG = 11）
    pub fn self_consistent(mut self, sc: bool) -> Self {
        self.self_consistent = sc;
        self
    }

    pub fn read_enthalpy(mut self, enthalpy: bool) -> Self {
        self.read_enthalpy = enthalpy;
        self
    }

    /// 能量收敛测试标记
    pub fn energy_convergence(&self) -> bool {
        matches!(self.mode, SubmitMode::Encut(_))
    }

    /// 结果文件名，超胞与原胞共用同一个文件
    pub fn output_filename(&self) -> String {
        format!("{}_{}.txt", self.crystal.reduced_formula(), self.mode.name())
    }

    /// 展开可变参数，得到 (参数表, 工作流名称) 列表
    pub fn workflows(&self) -> Vec<(CalcParams, String)> {
        match &self.mode {
            SubmitMode::Encut(values) => values
                .iter()
                .map(|v| {
                    let mut params = self.params.clone();
                    params.insert("encut".into(), number(*v));
                    (params, format!("encut{}", v))
                })
                .collect(),
            SubmitMode::Kgrid { sigmas, kpts } => {
                cartesian_product(&[sigmas.clone(), kpts.clone()])
                    .into_iter()
                    .map(|pair| {
                        let mut params = self.params.clone();
                        params.insert("sigma".into(), ParamValue::Float(pair[0]));
                        params.insert("kpts".into(), number(pair[1]));
                        (params, format!("kgrid{}-{}", pair[0], pair[1]))
                    })
                    .collect()
            }
            _ => {
                let name = self
                    .configuration
                    .clone()
                    .unwrap_or_else(|| self.mode.name().to_string());
                vec![(self.params.clone(), name)]
            }
        }
    }

    fn explicit_magmoms(&self) -> Option<MagmomSource> {
        Some(MagmomSource::Explicit(self.magmoms.clone()))
    }

    fn is_magnetic(&self) -> bool {
        self.magmoms.iter().any(|m| *m != 0.0)
    }

    /// 单点计算参数：移除结构优化标签，使用四面体方法
    pub fn singlepoint_params(params: &CalcParams) -> CalcParams {
        let mut out: CalcParams = params
            .iter()
            .filter(|(k, _)| !RELAX_ONLY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.insert("ismear".into(), ParamValue::Int(-5));
        out.insert("sigma".into(), ParamValue::Float(0.05));
        out.insert("nelm".into(), ParamValue::Int(200));
        out
    }

    /// 线性响应微扰参数：第一个元素组上加 α，其余为 0
    fn perturbation_params(&self, params: &CalcParams, alpha: f64) -> CalcParams {
        let runs = species_runs(&self.crystal);
        let mut out = params.clone();

        let ldaul = (0..runs.len())
            .map(|i| ParamValue::Int(if i == 0 { 2 } else { -1 }))
            .collect();
        let shift: Vec<ParamValue> = (0..runs.len())
            .map(|i| ParamValue::Float(if i == 0 { alpha } else { 0.0 }))
            .collect();

        out.insert("ldau".into(), ParamValue::Bool(true));
        out.insert("ldautype".into(), ParamValue::Int(3));
        out.insert("ldaul".into(), ParamValue::List(ldaul));
        out.insert("ldauu".into(), ParamValue::List(shift.clone()));
        out.insert("ldauj".into(), ParamValue::List(shift));
        if self.self_consistent {
            out.remove("icharg");
        } else {
            out.insert("icharg".into(), ParamValue::Int(11));
        }
        out
    }

    /// 构建单个工作流
    pub fn build_workflow(&self, params: &CalcParams, name: &str) -> Result<Workflow> {
        let mut stages: Vec<Vec<Firework>> = Vec::new();
        let mut next_id = 1u32;
        let mut take_id = || {
            let id = next_id;
            next_id += 1;
            id
        };

        let encoded = StructureSource::Encoded(self.crystal.clone());

        // 单点计算
        let singlepoint = if self.mode == SubmitMode::Relax {
            let relax = VaspTask {
                calc_params: params.clone(),
                structure: encoded.clone(),
                magmoms: self.explicit_magmoms(),
                bare_dir: None,
            };
            stages.push(vec![Firework::vasp(take_id(), "relax", relax)]);

            VaspTask {
                calc_params: Self::singlepoint_params(params),
                structure: StructureSource::PreviousStage,
                magmoms: if self.is_magnetic() {
                    Some(MagmomSource::Previous)
                } else {
                    self.explicit_magmoms()
                },
                bare_dir: None,
            }
        } else {
            VaspTask {
                calc_params: params.clone(),
                structure: encoded.clone(),
                magmoms: self.explicit_magmoms(),
                bare_dir: None,
            }
        };
        stages.push(vec![Firework::vasp(take_id(), "singlepoint", singlepoint)]);

        // 线性响应微扰
        if let SubmitMode::Perturbations(values) = &self.mode {
            let step = if self.self_consistent { "sc" } else { "nsc" };
            let stage = values
                .iter()
                .map(|alpha| {
                    let task = VaspTask {
                        calc_params: self.perturbation_params(params, *alpha),
                        structure: encoded.clone(),
                        magmoms: self.explicit_magmoms(),
                        bare_dir: self.bare_dir.clone(),
                    };
                    Firework::vasp(take_id(), step, task)
                })
                .collect();
            stages.push(stage);
        }

        // 汇总输出
        let output = WriteOutputTask {
            system: name.to_string(),
            filename: self.output_filename(),
            read_enthalpy: self.read_enthalpy,
            energy_convergence: self.energy_convergence(),
            initial_magmoms: Some(self.magmoms.clone()),
        };
        stages.push(vec![Firework::write_output(take_id(), output)]);

        let mut wf = Workflow::from_stages(name, stages)?;
        wf.metadata
            .insert("mode".into(), serde_json::Value::from(self.mode.name()));
        Ok(wf)
    }

    /// 构建所有工作流
    pub fn build(&self) -> Result<Vec<Workflow>> {
        self.workflows()
            .iter()
            .map(|(params, name)| self.build_workflow(params, name))
            .collect()
    }

    /// 构建并提交到 launchpad，返回每个工作流的标识
    pub fn submit(&self, launchpad: &dyn LaunchPad) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for wf in self.build()? {
            let id = launchpad.add_wf(&wf)?;
            log::info!("Added workflow {} ({} fireworks): {}", wf.name, wf.fws.len(), id);
            ids.push(id);
        }
        Ok(ids)
    }
}

/// 取出 VASP 任务（测试与运行时共用）
pub fn vasp_task(fw: &Firework) -> Option<&VaspTask> {
    fw.tasks().iter().find_map(|t| match t {
        Task::VaspCalculationTask(task) => Some(task),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};
    use crate::workflow::task::QueueAdapter;

    fn crystal() -> Crystal {
        let lattice = Lattice::from_vectors([[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]]);
        Crystal::new(
            "FeO",
            lattice,
            vec![
                Atom::new("Zn", [0.0, 0.0, 0.0]),
                Atom::new("Fe", [0.5, 0.5, 0.0]),
                Atom::new("O", [0.5, 0.5, 0.5]),
            ],
        )
    }

    fn params() -> CalcParams {
        serde_json::from_str(
            r#"{"xc": "PBE", "encut": 520, "ibrion": 2, "isif": 3, "nsw": 99,
                "ediffg": -0.01, "potim": 0.5, "ismear": 1, "sigma": 0.2, "kpts": 20}"#,
        )
        .unwrap()
    }

    fn fw(id: u32) -> Firework {
        Firework::vasp(
            id,
            "x",
            VaspTask {
                calc_params: CalcParams::new(),
                structure: StructureSource::PreviousStage,
                magmoms: None,
                bare_dir: None,
            },
        )
    }

    #[test]
    fn test_links_fan_out_fan_in_pairwise() {
        let stages = vec![vec![fw(1)], vec![fw(2), fw(3)], vec![fw(4), fw(5)], vec![fw(6)]];
        let links = build_links(&stages).unwrap();

        assert_eq!(links[&1], vec![2, 3]);
        assert_eq!(links[&2], vec![4]);
        assert_eq!(links[&3], vec![5]);
        assert_eq!(links[&4], vec![6]);
        assert_eq!(links[&5], vec![6]);
        assert!(links[&6].is_empty());
    }

    #[test]
    fn test_links_mismatch() {
        let stages = vec![vec![fw(1)], vec![fw(2), fw(3)], vec![fw(4), fw(5), fw(6)]];
        match build_links(&stages) {
            Err(AutomagError::LinkMismatch { stage, from, to }) => {
                assert_eq!((stage, from, to), (1, 2, 3));
            }
            other => panic!("expected link mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(Workflow::from_stages("dup", vec![vec![fw(1)], vec![fw(1)]]).is_err());
    }

    #[test]
    fn test_encut_workflows() {
        let sub = SubmitFirework::new(crystal(), SubmitMode::Encut(vec![500.0, 510.0]), params(), vec![0.0, 4.0, 0.0]).unwrap();
        let wfs = sub.workflows();

        assert_eq!(wfs.len(), 2);
        assert_eq!(wfs[0].1, "encut500");
        assert_eq!(wfs[1].0["encut"], ParamValue::Int(510));
        assert!(sub.energy_convergence());
        assert_eq!(sub.output_filename(), format!("{}_encut.txt", crystal().reduced_formula()));
    }

    #[test]
    fn test_kgrid_product() {
        let mode = SubmitMode::Kgrid {
            sigmas: vec![0.05, 0.1],
            kpts: vec![20.0, 30.0, 40.0],
        };
        let sub = SubmitFirework::new(crystal(), mode, params(), vec![0.0; 3]).unwrap();
        let wfs = sub.workflows();

        assert_eq!(wfs.len(), 6);
        assert_eq!(wfs[0].1, "kgrid0.05-20");
        assert_eq!(wfs[5].1, "kgrid0.1-40");
        assert_eq!(wfs[5].0["sigma"], ParamValue::Float(0.1));
        assert_eq!(wfs[5].0["kpts"], ParamValue::Int(40));
    }

    #[test]
    fn test_singlepoint_workflow() {
        let sub = SubmitFirework::new(crystal(), SubmitMode::SinglePoint, params(), vec![0.0, 4.0, 0.0])
            .unwrap()
            .configuration("fm");
        let wfs = sub.build().unwrap();
        assert_eq!(wfs.len(), 1);

        let wf = &wfs[0];
        assert_eq!(wf.name, "fm");
        assert_eq!(wf.fws.len(), 2);
        assert_eq!(wf.links[&1], vec![2]);

        let output = wf.firework(2).unwrap();
        assert_eq!(output.spec.queue_adapter, Some(QueueAdapter::output_stage()));
        match &output.tasks()[0] {
            Task::WriteOutputTask(t) => {
                assert_eq!(t.system, "fm");
                assert_eq!(t.initial_magmoms, Some(vec![0.0, 4.0, 0.0]));
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_relax_workflow() {
        let sub = SubmitFirework::new(crystal(), SubmitMode::Relax, params(), vec![0.0, 4.0, 0.0]).unwrap();
        let wf = &sub.build().unwrap()[0];

        assert_eq!(wf.name, "relax");
        assert_eq!(wf.fws.len(), 3);
        assert_eq!(wf.fws[0].name, "relax");

        let relax = vasp_task(&wf.fws[0]).unwrap();
        assert_eq!(relax.calc_params["nsw"], ParamValue::Int(99));

        let sp = vasp_task(&wf.fws[1]).unwrap();
        assert_eq!(sp.structure, StructureSource::PreviousStage);
        assert_eq!(sp.magmoms, Some(MagmomSource::Previous));
        for key in ["ediffg", "ibrion", "isif", "nsw", "potim"] {
            assert!(!sp.calc_params.contains_key(key), "{} not removed", key);
        }
        assert_eq!(sp.calc_params["ismear"], ParamValue::Int(-5));
        assert_eq!(sp.calc_params["sigma"], ParamValue::Float(0.05));
        assert_eq!(sp.calc_params["nelm"], ParamValue::Int(200));
        assert_eq!(sp.calc_params["encut"], ParamValue::Int(520));
    }

    #[test]
    fn test_relax_nonmagnetic_keeps_explicit_moments() {
        let sub = SubmitFirework::new(crystal(), SubmitMode::Relax, params(), vec![0.0; 3]).unwrap();
        let wf = &sub.build().unwrap()[0];
        let sp = vasp_task(&wf.fws[1]).unwrap();
        assert_eq!(sp.magmoms, Some(MagmomSource::Explicit(vec![0.0; 3])));
    }

    #[test]
    fn test_perturbation_workflow() {
        let sub = SubmitFirework::new(
            crystal(),
            SubmitMode::Perturbations(vec![-0.05, 0.05]),
            params(),
            vec![0.0, 4.0, 0.0],
        )
        .unwrap()
        .bare_dir(Some(PathBuf::from("/scratch/bare")));
        let wf = &sub.build().unwrap()[0];

        // singlepoint -> nsc × 2 -> write_output
        assert_eq!(wf.fws.len(), 4);
        assert_eq!(wf.links[&1], vec![2, 3]);
        assert_eq!(wf.links[&2], vec![4]);
        assert_eq!(wf.links[&3], vec![4]);

        let nsc = vasp_task(&wf.fws[2]).unwrap();
        assert_eq!(wf.fws[2].name, "nsc");
        assert_eq!(nsc.bare_dir, Some(PathBuf::from("/scratch/bare")));
        assert_eq!(nsc.calc_params["icharg"], ParamValue::Int(11));
        assert_eq!(nsc.calc_params["ldaul"].to_incar(), "2 -1 -1");
        assert_eq!(nsc.calc_params["ldauu"].to_incar(), "0.05 0.0 0.0");

        let sc = sub.clone().self_consistent(true).build().unwrap();
        let task = vasp_task(&sc[0].fws[1]).unwrap();
        assert!(!task.calc_params.contains_key("icharg"));
        assert_eq!(sc[0].fws[1].name, "sc");
    }

    #[test]
    fn test_unknown_mode() {
        let input = StageInput::default();
        match SubmitMode::from_input("bands", &input) {
            Err(AutomagError::UnsupportedMode(m)) => assert_eq!(m, "bands"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let sub = SubmitFirework::new(crystal(), SubmitMode::SinglePoint, params(), vec![0.0; 3]).unwrap();
        let wf = sub.build().unwrap().remove(0);
        let json = wf.to_json().unwrap();

        assert!(json.contains("\"fws\""));
        assert!(json.contains("\"links\""));
        assert_eq!(Workflow::from_json(&json).unwrap(), wf);
    }
}
