//! # Slurm 工具
//!
//! 为计算目录写出 jobscript，用 sbatch 提交并通过 squeue 判断作业是否结束。
//!
//! ## 依赖关系
//! - 被 `commands/specific.rs` 使用
//! - 无内部模块依赖

use crate::error::{AutomagError, Result};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Output};

/// 计算目录中缺少 jobscript 时使用的作业资源
pub struct JobResources {
    pub job_name: String,
    pub partition: Option<String>,
    pub nodes: u32,
    pub ntasks: u32,
    pub time_limit: String,
    /// 依次 `module load`
    pub modules: Vec<String>,
}

impl Default for JobResources {
    fn default() -> Self {
        JobResources {
            job_name: "automag".to_string(),
            partition: None,
            nodes: 1,
            ntasks: 32,
            time_limit: "24:00:00".to_string(),
            modules: Vec::new(),
        }
    }
}

/// 写出 jobscript：在 `workdir` 中运行 VASP，输出重定向到 `vasp.out`
pub fn render_jobscript(resources: &JobResources, workdir: &Path, vasp_command: &str) -> String {
    let mut directives = vec![format!("--job-name={}", resources.job_name)];
    if let Some(partition) = &resources.partition {
        directives.push(format!("--partition={}", partition));
    }
    directives.push(format!("--nodes={}", resources.nodes));
    directives.push(format!("--ntasks={}", resources.ntasks));
    directives.push(format!("--time={}", resources.time_limit));
    directives.push("--output=slurm-%j.out".to_string());

    let mut script = String::from("#!/bin/bash\n");
    for d in &directives {
        script += &format!("#SBATCH {}\n", d);
    }
    script.push('\n');
    for module in &resources.modules {
        script += &format!("module load {}\n", module);
    }
    script += &format!("cd \"{}\"\n{} > vasp.out 2>&1\n", workdir.display(), vasp_command);
    script
}

fn run_command(program: &str, args: &[&str], dir: Option<&Path>) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(d) = dir {
        cmd.current_dir(d);
    }

    let output = cmd.output().map_err(|e| match e.kind() {
        ErrorKind::NotFound => AutomagError::CommandNotFound {
            command: program.to_string(),
        },
        _ => AutomagError::CommandFailed {
            command: program.to_string(),
            stderr: e.to_string(),
        },
    })?;

    if !output.status.success() {
        return Err(AutomagError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// sbatch 输出的最后一个字段即作业号，例如 `Submitted batch job 12345`
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout.split_whitespace().last().map(|s| s.to_string())
}

/// 在 `dir` 中提交 `script`，返回作业号
pub fn submit_job(dir: &Path, script: &str) -> Result<String> {
    let output = run_command("sbatch", &[script], Some(dir))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_job_id(&stdout).ok_or_else(|| AutomagError::CommandFailed {
        command: format!("sbatch {}", script),
        stderr: "no job id in sbatch output".to_string(),
    })
}

/// squeue 输出中是否仍有该作业
pub fn job_listed(squeue_stdout: &str, job_id: &str) -> bool {
    squeue_stdout
        .lines()
        .any(|line| line.split_whitespace().any(|field| field == job_id))
}

/// 作业是否已结束（不再出现在 `squeue -u user` 中）
pub fn has_completed(job_id: &str, user: &str) -> Result<bool> {
    let output = run_command("squeue", &["-u", user], None)?;
    Ok(!job_listed(&String::from_utf8_lossy(&output.stdout), job_id))
}
