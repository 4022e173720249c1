//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `config.rs`, `workflow/`, `parsers/`, `fitting.rs`, `utils/`
//! - 子模块: conv, lin_response, coll, run, specific, analyze, ucf

pub mod analyze;
pub mod coll;
pub mod conv;
pub mod lin_response;
pub mod run;
pub mod specific;
pub mod ucf;

use crate::cli::submit::LaunchpadArgs;
use crate::cli::Commands;
use crate::error::Result;
use crate::utils::output;
use crate::workflow::{DirectoryLaunchPad, LaunchPad, LpadLaunchPad, SubmitFirework};

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Conv(args) => conv::execute(args),
        Commands::LinResponse(args) => lin_response::execute(args),
        Commands::Coll(args) => coll::execute(args),
        Commands::Run(args) => run::execute(args),
        Commands::Specific(args) => specific::execute(args),
        Commands::Analyze(args) => analyze::execute(args),
        Commands::Ucf(args) => ucf::execute(args),
    }
}

/// 根据参数选择 launchpad
pub(crate) fn open_launchpad(args: &LaunchpadArgs) -> Box<dyn LaunchPad> {
    match &args.lpad {
        Some(config) => {
            output::print_info(&format!("Adding workflows with lpad ({})", config.display()));
            Box::new(LpadLaunchPad::new(config))
        }
        None => {
            output::print_info(&format!(
                "Writing workflows to '{}'",
                args.out_dir.display()
            ));
            Box::new(DirectoryLaunchPad::new(&args.out_dir))
        }
    }
}

/// 提交并报告
pub(crate) fn submit_and_report(submit: &SubmitFirework, launchpad: &dyn LaunchPad) -> Result<usize> {
    let ids = submit.submit(launchpad)?;
    for id in &ids {
        output::print_success(&format!("Added {}", id));
    }
    Ok(ids.len())
}
