//! # Launchpad
//!
//! 工作流的提交目标：
//! - `DirectoryLaunchPad`: 写入本地目录，供 `automag run` 或其他工具使用
//! - `LpadLaunchPad`: 调用 FireWorks 的 `lpad` 命令添加到数据库
//!
//! ## 依赖关系
//! - 被 `workflow/builder.rs`, `commands/` 使用

use super::builder::Workflow;
use crate::error::{AutomagError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

/// 工作流提交目标
pub trait LaunchPad {
    /// 添加一个工作流，返回其标识（文件路径或 lpad 输出）
    fn add_wf(&self, wf: &Workflow) -> Result<String>;
}

/// 把工作流写成 JSON 文件
#[derive(Debug, Clone)]
pub struct DirectoryLaunchPad {
    dir: PathBuf,
}

impl DirectoryLaunchPad {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryLaunchPad { dir: dir.into() }
    }

    /// 未被占用的文件路径：`name.json`, `name_1.json`, ...
    fn free_path(&self, name: &str) -> PathBuf {
        let first = self.dir.join(format!("{}.json", name));
        if !first.exists() {
            return first;
        }
        (1..)
            .map(|i| self.dir.join(format!("{}_{}.json", name, i)))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }
}

impl LaunchPad for DirectoryLaunchPad {
    fn add_wf(&self, wf: &Workflow) -> Result<String> {
        fs::create_dir_all(&self.dir).map_err(|e| AutomagError::write(&self.dir, e))?;
        let path = self.free_path(&wf.name);
        fs::write(&path, wf.to_json()?).map_err(|e| AutomagError::write(&path, e))?;
        log::debug!("Wrote workflow {} to {}", wf.name, path.display());
        Ok(path.display().to_string())
    }
}

/// 通过 `lpad -l <config> add <file>` 提交
#[derive(Debug, Clone)]
pub struct LpadLaunchPad {
    config: PathBuf,
    command: String,
}

impl LpadLaunchPad {
    pub fn new(config: impl Into<PathBuf>) -> Self {
        LpadLaunchPad {
            config: config.into(),
            command: "lpad".to_string(),
        }
    }

    /// 指定 lpad 可执行文件
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    fn run(&self, file: &Path) -> Result<String> {
        let output = Command::new(&self.command)
            .arg("-l")
            .arg(&self.config)
            .arg("add")
            .arg(file)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AutomagError::CommandNotFound {
                    command: self.command.clone(),
                },
                _ => AutomagError::CommandFailed {
                    command: self.command.clone(),
                    stderr: e.to_string(),
                },
            })?;

        if !output.status.success() {
            return Err(AutomagError::CommandFailed {
                command: format!("{} add {}", self.command, file.display()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl LaunchPad for LpadLaunchPad {
    fn add_wf(&self, wf: &Workflow) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("automag_wf_")
            .suffix(".json")
            .tempfile()
            .map_err(|e| AutomagError::Other(format!("Cannot create temporary file: {}", e)))?;
        let path = file.path().to_path_buf();
        file.write_all(wf.to_json()?.as_bytes())
            .map_err(|e| AutomagError::write(&path, e))?;
        file.flush().map_err(|e| AutomagError::write(&path, e))?;

        self.run(&path)
    }
}
