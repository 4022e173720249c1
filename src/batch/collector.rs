//! # 计算目录收集器
//!
//! 在根目录下查找包含 OUTCAR 的计算目录。
//!
//! ## 功能
//! - 根目录本身即计算目录时直接返回
//! - glob 模式匹配目录名（逗号分隔多模式）
//! - 可选递归搜索
//!
//! ## 依赖关系
//! - 被 `commands/analyze/runs.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配目录名

use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 计算目录中必须存在的文件
const MARKER: &str = "OUTCAR";

/// 计算目录收集器
pub struct RunCollector {
    /// 根目录
    root: PathBuf,
    /// 目录名匹配模式
    patterns: Vec<Pattern>,
    /// 是否递归
    recursive: bool,
}

impl RunCollector {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            patterns: Vec::new(),
            recursive: false,
        }
    }

    /// 设置目录名匹配模式（逗号分隔），无效模式会被忽略
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.patterns = pattern
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match Pattern::new(s) {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("Ignoring invalid pattern '{}': {}", s, e);
                    None
                }
            })
            .collect();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn is_run_dir(path: &Path) -> bool {
        path.join(MARKER).is_file()
    }

    fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.patterns.iter().any(|p| p.matches(name)))
            .unwrap_or(false)
    }

    /// 收集所有计算目录，按路径排序
    pub fn collect(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            return vec![];
        }
        if Self::is_run_dir(&self.root) {
            return vec![self.root.clone()];
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut dirs: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter(|e| self.matches(e.path()) && Self::is_run_dir(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        dirs.sort();
        dirs
    }
}
