//! # 批量执行器
//!
//! 并行处理一组计算目录。
//!
//! ## 功能
//! - 基于 rayon 的并行迭代，结果保持输入顺序
//! - 进度条显示
//! - 跳过与失败的汇总
//!
//! ## 依赖关系
//! - 被 `batch/summary.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条

use crate::error::{AutomagError, Result};
use crate::utils::progress;

use rayon::prelude::*;
use std::path::PathBuf;

/// 单个目录的处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult<T> {
    Success(T),
    /// 跳过（如计算尚未结束）
    Skipped(String),
    /// (目录, 错误信息)
    Failed(String, String),
}

/// 批量处理结果
#[derive(Debug)]
pub struct BatchResult<T> {
    /// 成功的结果，顺序与输入一致
    pub items: Vec<T>,
    pub skipped: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        BatchResult {
            items: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn merge(&mut self, result: ProcessResult<T>) {
        match result {
            ProcessResult::Success(item) => self.items.push(item),
            ProcessResult::Skipped(path) => self.skipped.push(path),
            ProcessResult::Failed(path, err) => self.failures.push((path, err)),
        }
    }

    pub fn total(&self) -> usize {
        self.items.len() + self.skipped.len() + self.failures.len()
    }
}

/// 批量执行器
pub struct BatchRunner {
    /// 并行作业数
    jobs: usize,
}

impl BatchRunner {
    /// `jobs == 0` 时使用全部 CPU
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行处理目录列表
    pub fn run<T, F>(&self, dirs: &[PathBuf], processor: F) -> Result<BatchResult<T>>
    where
        T: Send,
        F: Fn(&PathBuf) -> ProcessResult<T> + Sync + Send,
    {
        let pb = progress::create_progress_bar(dirs.len() as u64, "Parsing");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| AutomagError::Other(format!("Cannot create thread pool: {}", e)))?;

        let results: Vec<ProcessResult<T>> = pool.install(|| {
            dirs.par_iter()
                .map(|dir| {
                    let result = processor(dir);
                    pb.inc(1);
                    result
                })
                .collect()
        });

        pb.finish_and_clear();

        let mut batch = BatchResult::default();
        for result in results {
            batch.merge(result);
        }
        Ok(batch)
    }
}
