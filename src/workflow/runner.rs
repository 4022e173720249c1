//! # 本地运行工作流
//!
//! 按依赖顺序（Kahn 拓扑排序）在本机执行工作流中的每个 firework，
//! 适用于小规模计算或没有 FireWorks 数据库的环境。
//!
//! ## 目录布局
//! ```text
//! <launch_root>/<workflow>/fw1_singlepoint/
//! <launch_root>/<workflow>/fw2_write_output/
//! ```
//!
//! ## 作业信息
//! 每个 firework 收到所有上游的作业信息 (fw_id, name, launch_dir)，
//! 设置了 `_pass_job_info` 的节点把自己追加进去再传给下游。
//!
//! ## 依赖关系
//! - 被 `commands/run.rs` 使用
//! - 使用 `workflow/builder.rs`, `workflow/task.rs`
//! - 使用 `parsers/` 读写 VASP 文件与结果文件

use super::builder::Workflow;
use super::task::{Firework, MagmomSource, StructureSource, Task, VaspTask, WriteOutputTask};
use crate::error::{AutomagError, Result};
use crate::models::{ConvergenceFlag, EnergyKind, ResultRecord};
use crate::parsers::incar::{render_incar, render_kpoints, ParamValue};
use crate::parsers::{outcar, poscar, results};
use rayon::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// 收敛标记文件
pub const CONVERGENCE_FILE: &str = "is_converged";

/// 一个 firework 的作业信息
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub fw_id: u32,
    pub name: String,
    pub launch_dir: PathBuf,
}

/// 本地运行配置
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// 启动目录的根
    pub launch_root: PathBuf,
    /// 结果文件目录
    pub output_dir: PathBuf,
    /// 运行 VASP 的 shell 命令
    pub vasp_command: String,
    /// POTCAR 库目录：`<dir>/<element>/POTCAR`
    pub potcar_dir: Option<PathBuf>,
    /// 并行执行的 firework 数
    pub jobs: usize,
}

/// 本地工作流执行器
pub struct LocalRunner {
    config: RunnerConfig,
}

impl LocalRunner {
    pub fn new(config: RunnerConfig) -> Self {
        LocalRunner { config }
    }

    /// 运行一个工作流，返回按执行顺序排列的作业信息
    pub fn run(&self, wf: &Workflow) -> Result<Vec<JobInfo>> {
        let waves = topological_waves(wf)?;
        let parents = wf.parents();
        let wf_dir = self.config.launch_root.join(&wf.name);

        // 每个节点传给下游的作业信息
        let mut passed: BTreeMap<u32, Vec<JobInfo>> = BTreeMap::new();
        let mut executed = Vec::new();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs.max(1))
            .build()
            .map_err(|e| AutomagError::Other(format!("Cannot create thread pool: {}", e)))?;

        for wave in waves {
            let inputs: Vec<(&Firework, Vec<JobInfo>)> = wave
                .iter()
                .filter_map(|id| wf.firework(*id))
                .map(|fw| {
                    let mut info: Vec<JobInfo> = Vec::new();
                    let upstream = parents
                        .get(&fw.fw_id)
                        .into_iter()
                        .flatten()
                        .flat_map(|p| passed.get(p).cloned().unwrap_or_default());
                    // 汇合节点会从多个上游收到同一个祖先
                    for job in upstream {
                        if !info.iter().any(|j| j.fw_id == job.fw_id) {
                            info.push(job);
                        }
                    }
                    (fw, info)
                })
                .collect();

            let outcomes: Vec<Result<JobInfo>> = if self.config.jobs > 1 && inputs.len() > 1 {
                pool.install(|| {
                    inputs
                        .par_iter()
                        .map(|(fw, info)| self.run_firework(&wf_dir, fw, info))
                        .collect()
                })
            } else {
                inputs
                    .iter()
                    .map(|(fw, info)| self.run_firework(&wf_dir, fw, info))
                    .collect()
            };

            for ((fw, mut info), outcome) in inputs.into_iter().zip(outcomes) {
                let own = outcome?;
                if fw.spec.pass_job_info {
                    info.push(own.clone());
                }
                passed.insert(fw.fw_id, info);
                executed.push(own);
            }
        }

        Ok(executed)
    }

    fn run_firework(&self, wf_dir: &Path, fw: &Firework, job_info: &[JobInfo]) -> Result<JobInfo> {
        let launch_dir = wf_dir.join(format!("fw{}_{}", fw.fw_id, fw.name));
        fs::create_dir_all(&launch_dir).map_err(|e| AutomagError::write(&launch_dir, e))?;
        log::info!("Running firework {} ({}) in {}", fw.fw_id, fw.name, launch_dir.display());

        for task in fw.tasks() {
            match task {
                Task::VaspCalculationTask(t) => self.run_vasp_task(t, &launch_dir, job_info)?,
                Task::WriteOutputTask(t) => self.run_output_task(t, job_info)?,
            }
        }

        Ok(JobInfo {
            fw_id: fw.fw_id,
            name: fw.name.clone(),
            launch_dir,
        })
    }

    // ─────────────────────────────────────────────────────────────
    // VASP 任务
    // ─────────────────────────────────────────────────────────────

    fn run_vasp_task(&self, task: &VaspTask, dir: &Path, job_info: &[JobInfo]) -> Result<()> {
        if let Some(bare) = &task.bare_dir {
            for name in ["CHGCAR", "WAVECAR"] {
                let src = bare.join(name);
                fs::copy(&src, dir.join(name)).map_err(|e| AutomagError::read(&src, e))?;
            }
        }

        let previous = || {
            job_info.last().ok_or_else(|| AutomagError::InvalidWorkflow {
                name: dir.display().to_string(),
                reason: "task needs a previous stage but received no job info".into(),
            })
        };

        let crystal = match &task.structure {
            StructureSource::Encoded(c) => c.clone(),
            StructureSource::PreviousStage => {
                poscar::parse_poscar_file(&previous()?.launch_dir.join("CONTCAR"))?
            }
        };

        let magmoms: Option<Vec<f64>> = match &task.magmoms {
            None => None,
            Some(MagmomSource::Explicit(m)) => Some(m.clone()),
            Some(MagmomSource::Previous) => {
                let prev = previous()?;
                let run = outcar::parse_outcar(&prev.launch_dir.join("OUTCAR"), &prev.name)?;
                let m = run.magmoms.ok_or_else(|| AutomagError::ParseError {
                    format: "outcar".into(),
                    path: prev.launch_dir.join("OUTCAR").display().to_string(),
                    reason: "no magnetization block".into(),
                })?;
                Some(m.iter().map(|x| x.round()).collect())
            }
        };

        let mut params = task.calc_params.clone();
        let magmoms = magmoms.filter(|m| m.iter().any(|x| *x != 0.0));
        if magmoms.is_some() {
            params.insert("lorbit".into(), ParamValue::Int(11));
            params.insert("ispin".into(), ParamValue::Int(2));
        }

        write_file(&dir.join("POSCAR"), &poscar::to_poscar_string(&crystal))?;
        write_file(&dir.join("INCAR"), &render_incar(&params, magmoms.as_deref()))?;
        if let Some(kpoints) = render_kpoints(&params) {
            write_file(&dir.join("KPOINTS"), &kpoints)?;
        }
        if let Some(lib) = &self.config.potcar_dir {
            write_potcar(lib, &poscar::species_runs(&crystal), &dir.join("POTCAR"))?;
        }

        self.execute_vasp(dir)?;

        let flag = convergence_flag(dir)?;
        if flag == ConvergenceFlag::NonConverged {
            log::warn!("Calculation in {} did not converge", dir.display());
        }
        write_file(&dir.join(CONVERGENCE_FILE), &flag.to_string())
    }

    fn execute_vasp(&self, dir: &Path) -> Result<()> {
        let stdout_path = dir.join("vasp.out");
        let stdout = File::create(&stdout_path).map_err(|e| AutomagError::write(&stdout_path, e))?;
        let stderr_path = dir.join("vasp.err");
        let stderr = File::create(&stderr_path).map_err(|e| AutomagError::write(&stderr_path, e))?;

        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.config.vasp_command)
            .current_dir(dir)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AutomagError::CommandNotFound {
                    command: "sh".into(),
                },
                _ => AutomagError::CommandFailed {
                    command: self.config.vasp_command.clone(),
                    stderr: e.to_string(),
                },
            })?;

        if !status.success() {
            log::warn!(
                "'{}' exited with {} in {}",
                self.config.vasp_command,
                status,
                dir.display()
            );
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // 汇总任务
    // ─────────────────────────────────────────────────────────────

    fn run_output_task(&self, task: &WriteOutputTask, job_info: &[JobInfo]) -> Result<()> {
        let record = build_record(task, job_info)?;
        let path = self.config.output_dir.join(&task.filename);
        results::append_record(&path, &record)?;
        log::info!("Appended {} to {}", record.label, path.display());
        Ok(())
    }
}

/// 由上游作业信息生成结果记录
pub fn build_record(task: &WriteOutputTask, job_info: &[JobInfo]) -> Result<ResultRecord> {
    let (first, last) = match (job_info.first(), job_info.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => {
            return Err(AutomagError::InvalidWorkflow {
                name: task.system.clone(),
                reason: "write_output received no job info".into(),
            })
        }
    };

    let stages = job_info
        .iter()
        .map(|info| {
            let flag = fs::read_to_string(info.launch_dir.join(CONVERGENCE_FILE))
                .ok()
                .and_then(|s| ConvergenceFlag::parse(s.lines().next().unwrap_or("")))
                .unwrap_or(ConvergenceFlag::NonConverged);
            (info.name.clone(), flag)
        })
        .collect();

    let outcar_path = last.launch_dir.join("OUTCAR");
    let run = outcar::parse_outcar(&outcar_path, &last.name)?;

    let contcar = last.launch_dir.join("CONTCAR");
    let structure_file = if contcar.exists() {
        contcar
    } else {
        last.launch_dir.join("POSCAR")
    };
    let formula = poscar::parse_poscar_file(&structure_file)?.formula();

    let missing = |what: &str| AutomagError::ParseError {
        format: "outcar".into(),
        path: outcar_path.display().to_string(),
        reason: format!("no {} found", what),
    };
    let (kind, energy) = if task.read_enthalpy {
        (EnergyKind::Enthalpy, run.enthalpy.ok_or_else(|| missing("enthalpy"))?)
    } else {
        (EnergyKind::Energy, run.free_energy.ok_or_else(|| missing("free energy"))?)
    };

    let final_magmoms = task.initial_magmoms.as_ref().map(|initial| {
        run.magmoms
            .clone()
            .unwrap_or_else(|| vec![0.0; initial.len()])
    });

    Ok(ResultRecord {
        label: task.system.clone(),
        fw_id: first.fw_id,
        stages,
        formula,
        kind,
        energy,
        initial_magmoms: task.initial_magmoms.clone(),
        final_magmoms,
    })
}

/// 收敛判定：OUTCAR 收敛，或任一 `*.out` 中出现 "fatal error in bracketing"
pub fn convergence_flag(dir: &Path) -> Result<ConvergenceFlag> {
    let outcar_path = dir.join("OUTCAR");
    let converged = outcar_path.exists()
        && outcar::parse_outcar(&outcar_path, "convergence")?.converged();
    if converged {
        return Ok(ConvergenceFlag::Converged);
    }

    let entries = fs::read_dir(dir).map_err(|e| AutomagError::read(dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("out") {
            if let Ok(text) = fs::read_to_string(&path) {
                if text.contains("fatal error in bracketing") {
                    return Ok(ConvergenceFlag::Converged);
                }
            }
        }
    }
    Ok(ConvergenceFlag::NonConverged)
}

/// 拓扑排序，按层返回：同一层内的节点互不依赖
pub fn topological_waves(wf: &Workflow) -> Result<Vec<Vec<u32>>> {
    let parents = wf.parents();
    let mut indegree: BTreeMap<u32, usize> = parents.iter().map(|(id, p)| (*id, p.len())).collect();

    let mut ready: VecDeque<u32> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut waves = Vec::new();
    let mut visited = 0;
    while !ready.is_empty() {
        let wave: Vec<u32> = ready.drain(..).collect();
        visited += wave.len();

        let mut next = Vec::new();
        for id in &wave {
            for child in wf.links.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(*child);
                    }
                }
            }
        }
        next.sort_unstable();
        ready.extend(next);
        waves.push(wave);
    }

    if visited != indegree.len() {
        return Err(AutomagError::InvalidWorkflow {
            name: wf.name.clone(),
            reason: "links contain a cycle".into(),
        });
    }
    Ok(waves)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| AutomagError::write(path, e))
}

/// 按 POSCAR 元素顺序拼接 POTCAR
fn write_potcar(lib: &Path, runs: &[(String, usize)], target: &Path) -> Result<()> {
    let mut content = String::new();
    for (element, _) in runs {
        let path = lib.join(element).join("POTCAR");
        if !path.exists() {
            return Err(AutomagError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        content.push_str(&fs::read_to_string(&path).map_err(|e| AutomagError::read(&path, e))?);
    }
    write_file(target, &content)
}
