//! # conv 命令实现
//!
//! 提交 ENCUT 或 SIGMA × k 点收敛测试，每个取值一个工作流。
//!
//! ## 依赖关系
//! - 使用 `cli/submit.rs` 定义的参数
//! - 使用 `config.rs`, `workflow/builder.rs`

use super::{open_launchpad, submit_and_report};
use crate::cli::submit::ConvArgs;
use crate::config::StageInput;
use crate::error::Result;
use crate::utils::output;
use crate::workflow::{SubmitFirework, SubmitMode};

/// 执行 conv 命令
pub fn execute(args: ConvArgs) -> Result<()> {
    output::print_header(&format!("Convergence Test: {}", args.mode));

    let input = StageInput::from_file(&args.input)?;
    let crystal = input.crystal()?;
    let magmoms = input.magmoms(&crystal)?;
    output::print_info(&format!(
        "Structure {} ({} atoms), {} magnetic",
        crystal.formula(),
        crystal.len(),
        magmoms.iter().filter(|m| **m != 0.0).count()
    ));

    let mode = SubmitMode::from_input(args.mode.name(), &input)?;
    let submit = SubmitFirework::new(crystal, mode, input.params.clone(), magmoms)?
        .read_enthalpy(input.params.contains_key("pstress"));

    let launchpad = open_launchpad(&args.launchpad);
    let count = submit_and_report(&submit, launchpad.as_ref())?;

    output::print_done(&format!(
        "{} workflows submitted, results will be appended to {}",
        count,
        submit.output_filename()
    ));
    Ok(())
}
