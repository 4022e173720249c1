//! # 数据模型模块
//!
//! 定义晶体结构、磁性配置和计算结果数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `workflow/` 和 `commands/` 使用
//! - 子模块: structure, magnetic, calculation

pub mod calculation;
pub mod magnetic;
pub mod structure;

pub use calculation::{ConvergenceFlag, EnergyKind, ResultRecord, VaspRun};
pub use magnetic::{MagneticSelector, MagneticState, StateClassifier};
pub use structure::{Atom, Crystal, Lattice, Neighbor};
