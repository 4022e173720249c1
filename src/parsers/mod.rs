//! # 解析器模块
//!
//! VASP 输入输出文件、结果文件以及 Vampire 晶胞文件的读写。
//!
//! ## 依赖关系
//! - 被 `workflow/`, `batch/`, `commands/` 使用
//! - 使用 `models/` 数据模型
//! - 子模块: poscar, outcar, incar, results, ucf

pub mod incar;
pub mod outcar;
pub mod poscar;
pub mod results;
pub mod ucf;
