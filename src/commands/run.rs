//! # run 命令实现
//!
//! 在本机依次运行工作流 JSON 文件。
//!
//! ## 依赖关系
//! - 使用 `cli/run.rs` 定义的参数
//! - 使用 `workflow/runner.rs`, `config.rs`
//! - 使用 `glob` 展开目录中的 `*.json`

use crate::cli::run::RunArgs;
use crate::config::Environment;
use crate::error::{AutomagError, Result};
use crate::utils::{output, progress};
use crate::workflow::{LocalRunner, RunnerConfig, Workflow};

use std::fs;
use std::path::{Path, PathBuf};

/// 展开输入：文件原样保留，目录取其中的 `*.json`
pub fn collect_workflow_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let pattern = input.join("*.json");
            let pattern = pattern.to_string_lossy();
            let mut found: Vec<PathBuf> = glob::glob(&pattern)
                .map_err(|e| AutomagError::InvalidArgument(e.to_string()))?
                .filter_map(|e| e.ok())
                .collect();
            if found.is_empty() {
                return Err(AutomagError::NoFilesFound {
                    pattern: pattern.into_owned(),
                });
            }
            found.sort();
            files.extend(found);
        } else {
            return Err(AutomagError::FileNotFound {
                path: input.display().to_string(),
            });
        }
    }
    Ok(files)
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let text = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    Workflow::from_json(&text).map_err(|e| AutomagError::ParseError {
        format: "workflow".into(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// 执行 run 命令
pub fn execute(args: RunArgs) -> Result<()> {
    output::print_header("Local Workflow Run");

    let env = Environment::from_env();
    let output_dir = match args.output_dir {
        Some(dir) => dir,
        None => env.output_dir()?,
    };
    let config = RunnerConfig {
        launch_root: args.launch_root.clone(),
        output_dir: output_dir.clone(),
        vasp_command: args.vasp_command.unwrap_or_else(|| env.vasp_command.clone()),
        potcar_dir: args.potcar_dir.or_else(|| env.potcar_dir.clone()),
        jobs: args.jobs.max(1),
    };
    if config.potcar_dir.is_none() {
        output::print_warning("No POTCAR library configured, POTCAR files will not be written");
    }
    output::print_info(&format!("VASP command: {}", config.vasp_command));
    output::print_info(&format!("Results directory: {}", output_dir.display()));

    let files = collect_workflow_files(&args.workflows)?;
    let runner = LocalRunner::new(config);

    let mut failed = 0;
    for file in &files {
        let wf = load_workflow(file)?;
        let spinner = progress::create_spinner(&format!("{} ({} fireworks)", wf.name, wf.fws.len()));
        let outcome = runner.run(&wf);
        spinner.finish_and_clear();

        match outcome {
            Ok(jobs) => output::print_success(&format!(
                "{}: {} fireworks completed in {}",
                wf.name,
                jobs.len(),
                args.launch_root.join(&wf.name).display()
            )),
            Err(e) => {
                failed += 1;
                output::print_error(&format!("{}: {}", wf.name, e));
            }
        }
    }

    output::print_separator();
    if failed > 0 {
        return Err(AutomagError::Other(format!(
            "{} of {} workflows failed",
            failed,
            files.len()
        )));
    }
    output::print_done(&format!("{} workflows completed", files.len()));
    Ok(())
}
