//! # automag - 磁性材料 VASP 自动化工作流
//!
//! 收敛测试、线性响应 Hubbard U、共线磁性配置枚举与 Heisenberg 耦合常数拟合，
//! 以及 Vampire Monte Carlo 的输入输出处理。
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── workflow/  (工作流构建、提交与本地运行)
//!   │     ├── batch/     (计算目录并行扫描)
//!   │     ├── parsers/   (格式解析器)
//!   │     ├── fitting.rs (最小二乘与模型拟合)
//!   │     └── models/    (数据模型)
//!   ├── config.rs   (输入文件、环境变量、日志)
//!   ├── utils/      (工具函数)
//!   └── error.rs    (错误处理)
//! ```

pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fitting;
pub mod models;
pub mod parsers;
pub mod utils;
pub mod workflow;
