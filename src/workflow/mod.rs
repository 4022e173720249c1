//! # 工作流模块
//!
//! 工作流是由 firework 组成的有向无环图，以阶段列表 + 邻接表表示，
//! 序列化为 FireWorks 的 JSON 布局，既可以提交到 launchpad，也可以在本地运行。
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 子模块: task, builder, launchpad, runner

pub mod builder;
pub mod launchpad;
pub mod runner;
pub mod task;

pub use builder::{SubmitFirework, SubmitMode, Workflow};
pub use launchpad::{DirectoryLaunchPad, LaunchPad, LpadLaunchPad};
pub use runner::{LocalRunner, RunnerConfig};
