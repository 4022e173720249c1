//! # 工作流任务定义
//!
//! 每个 firework 携带一个或多个任务：
//! - `VaspCalculationTask`: 在启动目录中准备输入并运行 VASP
//! - `WriteOutputTask`: 汇总上游计算，向结果文件追加一条记录
//!
//! 序列化格式与 FireWorks 的 JSON 布局一致，任务类型写在 `_fw_name` 中。
//!
//! ## 依赖关系
//! - 被 `workflow/builder.rs`, `workflow/runner.rs` 使用
//! - 使用 `models/structure.rs`, `parsers/incar.rs`

use crate::models::Crystal;
use crate::parsers::incar::CalcParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 计算所用结构的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSource {
    /// 结构随任务一起编码
    Encoded(Crystal),
    /// 使用上一阶段的 CONTCAR
    PreviousStage,
}

/// 初始磁矩的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagmomSource {
    Explicit(Vec<f64>),
    /// 上一阶段 OUTCAR 中的最终磁矩（取整）
    Previous,
}

/// 运行一次 VASP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaspTask {
    pub calc_params: CalcParams,
    pub structure: StructureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magmoms: Option<MagmomSource>,
    /// 从该目录复制 CHGCAR 与 WAVECAR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bare_dir: Option<PathBuf>,
}

/// 向结果文件追加一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutputTask {
    /// 记录的标签
    pub system: String,
    /// 结果文件名（位于结果目录下）
    pub filename: String,
    pub read_enthalpy: bool,
    #[serde(default)]
    pub energy_convergence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_magmoms: Option<Vec<f64>>,
}

/// firework 中的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_fw_name")]
pub enum Task {
    VaspCalculationTask(VaspTask),
    WriteOutputTask(WriteOutputTask),
}

/// 队列参数覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAdapter {
    pub ntasks: u32,
    pub walltime: String,
}

impl QueueAdapter {
    /// 汇总任务只需要一个核心
    pub fn output_stage() -> Self {
        QueueAdapter {
            ntasks: 1,
            walltime: "00:30:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireworkSpec {
    #[serde(rename = "_tasks")]
    pub tasks: Vec<Task>,

    /// 是否把本 firework 的作业信息传给下游
    #[serde(rename = "_pass_job_info", default)]
    pub pass_job_info: bool,

    #[serde(rename = "_queueadapter", default, skip_serializing_if = "Option::is_none")]
    pub queue_adapter: Option<QueueAdapter>,
}

/// 工作流中的一个节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firework {
    pub fw_id: u32,
    pub name: String,
    pub spec: FireworkSpec,
}

impl Firework {
    /// 运行 VASP 的 firework，会把作业信息传给下游
    pub fn vasp(fw_id: u32, name: impl Into<String>, task: VaspTask) -> Self {
        Firework {
            fw_id,
            name: name.into(),
            spec: FireworkSpec {
                tasks: vec![Task::VaspCalculationTask(task)],
                pass_job_info: true,
                queue_adapter: None,
            },
        }
    }

    /// 汇总输出的 firework
    pub fn write_output(fw_id: u32, task: WriteOutputTask) -> Self {
        Firework {
            fw_id,
            name: "write_output".to_string(),
            spec: FireworkSpec {
                tasks: vec![Task::WriteOutputTask(task)],
                pass_job_info: false,
                queue_adapter: Some(QueueAdapter::output_stage()),
            },
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.spec.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firework_json_layout() {
        let task = VaspTask {
            calc_params: CalcParams::new(),
            structure: StructureSource::PreviousStage,
            magmoms: Some(MagmomSource::Previous),
            bare_dir: None,
        };
        let fw = Firework::vasp(2, "singlepoint", task);
        let value = serde_json::to_value(&fw).unwrap();

        assert_eq!(value["fw_id"], 2);
        assert_eq!(value["spec"]["_pass_job_info"], true);
        assert_eq!(value["spec"]["_tasks"][0]["_fw_name"], "VaspCalculationTask");
        assert_eq!(value["spec"]["_tasks"][0]["structure"], "previous_stage");
        assert_eq!(value["spec"]["_tasks"][0]["magmoms"], "previous");
        assert!(value["spec"].get("_queueadapter").is_none());

        let back: Firework = serde_json::from_value(value).unwrap();
        assert_eq!(back, fw);
    }

    #[test]
    fn test_write_output_firework() {
        let fw = Firework::write_output(
            3,
            WriteOutputTask {
                system: "afm1".into(),
                filename: "Fe2O3_singlepoint.txt".into(),
                read_enthalpy: false,
                energy_convergence: false,
                initial_magmoms: Some(vec![4.0, -4.0]),
            },
        );
        let value = serde_json::to_value(&fw).unwrap();
        assert_eq!(value["spec"]["_queueadapter"]["ntasks"], 1);
        assert_eq!(value["spec"]["_queueadapter"]["walltime"], "00:30:00");
        assert_eq!(value["spec"]["_tasks"][0]["_fw_name"], "WriteOutputTask");
        assert_eq!(value["spec"]["_tasks"][0]["system"], "afm1");
    }
}
