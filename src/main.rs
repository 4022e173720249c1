//! # automag - 磁性材料 VASP 自动化工作流
//!
//! ## 子命令
//! - `conv` - ENCUT / k 点收敛测试
//! - `lin-response` - 线性响应 Hubbard U (bare, nsc, sc)
//! - `coll` - 共线磁性配置枚举与单点计算
//! - `run` - 在本机运行工作流 JSON
//! - `specific` - 按模板提交单个 Slurm 作业
//! - `analyze` - 分析功能
//!   - `runs` - 计算目录摘要
//!   - `convergence` - 收敛测试结果
//!   - `stability` - 共线配置稳定性
//!   - `couplings` - Heisenberg 耦合常数
//!   - `hubbard` - 线性响应 U
//!   - `critical` - 临界温度
//! - `ucf` - 写出 Vampire 单胞文件

use automag::cli::Cli;
use automag::{commands, config, utils};
use clap::Parser;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    config::init_logger(cli.verbose);

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
