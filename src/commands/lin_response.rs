//! # lin-response 命令实现
//!
//! 线性响应 Hubbard U 的三个步骤：
//! - `bare`: 无微扰单点计算
//! - `nsc`: 读取 bare 的电荷密度，非自洽微扰 (ICHARG = 11)
//! - `sc`: 自洽微扰
//!
//! 被微扰的位点换成一个"假原子"（`dummy_atom`），并移到结构最前面，
//! 使其单独成为 POSCAR 的第一个元素组，LDAUL/LDAUU/LDAUJ 的第一个值只作用于它。
//!
//! ## 依赖关系
//! - 使用 `cli/submit.rs` 定义的参数
//! - 使用 `config.rs`, `workflow/builder.rs`

use super::{open_launchpad, submit_and_report};
use crate::cli::submit::{LinResponseArgs, LinStep};
use crate::config::StageInput;
use crate::error::{AutomagError, Result};
use crate::models::Crystal;
use crate::utils::output;
use crate::workflow::{SubmitFirework, SubmitMode};

/// 把 `position` 处的原子换成 `dummy`，并连同磁矩一起移到首位
pub fn with_dummy_atom(
    crystal: &Crystal,
    magmoms: &[f64],
    dummy: &str,
    position: usize,
) -> Result<(Crystal, Vec<f64>)> {
    if position >= crystal.len() {
        return Err(AutomagError::InvalidArgument(format!(
            "dummy_position {} is out of range for {} atoms",
            position,
            crystal.len()
        )));
    }
    if crystal.species().iter().any(|el| el == dummy) {
        return Err(AutomagError::InvalidArgument(format!(
            "dummy atom {} is already present in {}",
            dummy,
            crystal.formula()
        )));
    }

    let mut modified = crystal.clone();
    let mut atom = modified.atoms.remove(position);
    atom.element = dummy.to_string();
    modified.atoms.insert(0, atom);

    let mut moments = magmoms.to_vec();
    let m = moments.remove(position);
    moments.insert(0, m);

    Ok((modified, moments))
}

/// 执行 lin-response 命令
pub fn execute(args: LinResponseArgs) -> Result<()> {
    output::print_header("Linear Response U");

    let input = StageInput::from_file(&args.input)?;
    let crystal = input.crystal()?;
    let magmoms = input.magmoms(&crystal)?;

    let (crystal, magmoms) = match &input.dummy_atom {
        Some(dummy) => {
            let position = input.dummy_position.unwrap_or(0);
            output::print_info(&format!(
                "Replacing {} at position {} with dummy atom {}",
                crystal.atoms.get(position).map(|a| a.element.as_str()).unwrap_or("?"),
                position,
                dummy
            ));
            with_dummy_atom(&crystal, &magmoms, dummy, position)?
        }
        None => {
            output::print_warning("No dummy_atom given, the first species in POSCAR will be perturbed");
            (crystal, magmoms)
        }
    };

    let submit = match args.step {
        LinStep::Bare => SubmitFirework::new(crystal, SubmitMode::SinglePoint, input.params.clone(), magmoms)?,
        LinStep::Nsc => {
            let bare_dir = args.bare_dir.clone().ok_or_else(|| {
                AutomagError::InvalidArgument("--bare-dir is required for the nsc step".into())
            })?;
            if !bare_dir.is_dir() {
                return Err(AutomagError::DirectoryNotFound {
                    path: bare_dir.display().to_string(),
                });
            }
            let mode = SubmitMode::Perturbations(input.require_perturbations()?);
            SubmitFirework::new(crystal, mode, input.params.clone(), magmoms)?.bare_dir(Some(bare_dir))
        }
        LinStep::Sc => {
            if args.bare_dir.is_some() {
                output::print_warning("--bare-dir is ignored for the sc step");
            }
            let mode = SubmitMode::Perturbations(input.require_perturbations()?);
            SubmitFirework::new(crystal, mode, input.params.clone(), magmoms)?.self_consistent(true)
        }
    };

    let launchpad = open_launchpad(&args.launchpad);
    let count = submit_and_report(&submit, launchpad.as_ref())?;

    output::print_done(&format!(
        "{} workflow(s) submitted, results will be appended to {}",
        count,
        submit.output_filename()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::poscar::{parse_poscar_content, species_runs};

    const POSCAR: &str = "Fe2O2\n1.0\n4.0 0.0 0.0\n0.0 4.0 0.0\n0.0 0.0 4.0\nFe O\n2 2\nDirect\n\
0.0 0.0 0.0\n0.5 0.5 0.5\n0.5 0.0 0.0\n0.0 0.5 0.5\n";

    #[test]
    fn test_dummy_atom_moves_to_front() {
        let crystal = parse_poscar_content(POSCAR, "test").unwrap();
        let magmoms = vec![4.0, -4.0, 0.0, 0.0];

        let (modified, moments) = with_dummy_atom(&crystal, &magmoms, "Zn", 1).unwrap();

        assert_eq!(modified.symbols(), vec!["Zn", "Fe", "O", "O"]);
        assert_eq!(modified.atoms[0].position, [0.5, 0.5, 0.5]);
        assert_eq!(moments, vec![-4.0, 4.0, 0.0, 0.0]);
        assert_eq!(
            species_runs(&modified),
            vec![("Zn".to_string(), 1), ("Fe".to_string(), 1), ("O".to_string(), 2)]
        );
    }

    #[test]
    fn test_dummy_atom_errors() {
        let crystal = parse_poscar_content(POSCAR, "test").unwrap();
        let magmoms = vec![0.0; 4];
        assert!(with_dummy_atom(&crystal, &magmoms, "Zn", 4).is_err());
        assert!(with_dummy_atom(&crystal, &magmoms, "O", 0).is_err());
    }
}
