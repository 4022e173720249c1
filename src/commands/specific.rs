//! # specific 命令实现
//!
//! 复制模板目录（jobscript, POSCAR, POTCAR, INCAR, 可选 KPOINTS），
//! 用覆盖标签改写 INCAR，然后在计算目录中执行 `sbatch jobscript`。
//! 可以对一个标签做扫描，并等待所有作业离开队列。
//!
//! ## 依赖关系
//! - 使用 `cli/specific.rs` 定义的参数
//! - 使用 `parsers/incar.rs`, `utils/slurm.rs`, `config.rs`

use crate::cli::specific::SpecificArgs;
use crate::config::Environment;
use crate::error::{AutomagError, Result};
use crate::parsers::incar::update_template;
use crate::utils::slurm::{self, render_jobscript, JobResources};
use crate::utils::{output, progress};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// 作业脚本文件名
const JOBSCRIPT: &str = "jobscript";

/// 必须存在的模板文件
const REQUIRED_FILES: &[&str] = &["POSCAR", "POTCAR", "INCAR"];

/// 一个待提交的计算：目录 + INCAR 覆盖
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRun {
    pub dir: PathBuf,
    pub overrides: BTreeMap<String, String>,
}

/// 展开扫描：无扫描时只有一个计算，目录即 calcfold
pub fn plan_runs(
    calcfold: &Path,
    overrides: &[(String, String)],
    sweep: Option<&(String, String)>,
) -> Vec<PlannedRun> {
    let base: BTreeMap<String, String> = overrides.iter().cloned().collect();
    match sweep {
        None => vec![PlannedRun {
            dir: calcfold.to_path_buf(),
            overrides: base,
        }],
        Some((tag, values)) => values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|value| {
                let mut overrides = base.clone();
                overrides.insert(tag.clone(), value.to_string());
                PlannedRun {
                    dir: calcfold.join(tag).join(value),
                    overrides,
                }
            })
            .collect(),
    }
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(|e| AutomagError::read(src, e))?;
    Ok(())
}

/// 准备计算目录；模板中没有 jobscript 时写入 `jobscript`
pub fn prepare_run(template: &Path, run: &PlannedRun, fallback_script: Option<&str>) -> Result<()> {
    fs::create_dir_all(&run.dir).map_err(|e| AutomagError::write(&run.dir, e))?;

    let script = template.join(JOBSCRIPT);
    if script.is_file() {
        copy_file(&script, &run.dir.join(JOBSCRIPT))?;
    } else if let Some(content) = fallback_script {
        let dst = run.dir.join(JOBSCRIPT);
        fs::write(&dst, content).map_err(|e| AutomagError::write(&dst, e))?;
    } else {
        return Err(AutomagError::FileNotFound {
            path: script.display().to_string(),
        });
    }

    for name in ["POSCAR", "POTCAR"] {
        copy_file(&template.join(name), &run.dir.join(name))?;
    }

    let incar_src = template.join("INCAR");
    let incar = fs::read_to_string(&incar_src).map_err(|e| AutomagError::read(&incar_src, e))?;
    let incar_dst = run.dir.join("INCAR");
    fs::write(&incar_dst, update_template(&incar, &run.overrides))
        .map_err(|e| AutomagError::write(&incar_dst, e))?;

    let kpoints = template.join("KPOINTS");
    if kpoints.is_file() {
        copy_file(&kpoints, &run.dir.join("KPOINTS"))?;
    }
    Ok(())
}

/// 覆盖标签中模板 INCAR 没有的标签不会生效
fn unused_tags(incar: &str, overrides: &[(String, String)]) -> Vec<String> {
    let present: Vec<String> = incar
        .lines()
        .filter(|l| l.contains('='))
        .map(|l| l.split('=').next().unwrap_or("").trim().to_uppercase())
        .collect();
    overrides
        .iter()
        .map(|(tag, _)| tag.clone())
        .filter(|tag| !present.contains(tag))
        .collect()
}

/// 执行 specific 命令
pub fn execute(args: SpecificArgs) -> Result<()> {
    output::print_header("Template Submission");

    if !args.template.is_dir() {
        return Err(AutomagError::DirectoryNotFound {
            path: args.template.display().to_string(),
        });
    }
    for name in REQUIRED_FILES {
        let path = args.template.join(name);
        if !path.is_file() {
            return Err(AutomagError::FileNotFound {
                path: path.display().to_string(),
            });
        }
    }

    let env = Environment::from_env();
    let calcfold = match &args.calcfold {
        Some(dir) => dir.clone(),
        None => env.calc_fold()?,
    };

    let incar_path = args.template.join("INCAR");
    let incar = fs::read_to_string(&incar_path).map_err(|e| AutomagError::read(&incar_path, e))?;
    let mut requested = args.overrides.clone();
    requested.extend(args.sweep.iter().cloned());
    for tag in unused_tags(&incar, &requested) {
        output::print_warning(&format!("{} is not in the template INCAR and will be ignored", tag));
    }

    let fallback = if args.template.join(JOBSCRIPT).is_file() {
        None
    } else {
        output::print_info("No jobscript in the template, generating one");
        let resources = JobResources {
            partition: args.partition.clone(),
            nodes: args.nodes,
            ntasks: args.ntasks,
            time_limit: args.time.clone(),
            modules: args
                .modules
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
            ..Default::default()
        };
        Some(resources)
    };

    let runs = plan_runs(&calcfold, &args.overrides, args.sweep.as_ref());
    if runs.is_empty() {
        return Err(AutomagError::InvalidArgument("The sweep has no values".into()));
    }

    let mut job_ids = Vec::new();
    for run in &runs {
        let script = fallback
            .as_ref()
            .map(|resources| render_jobscript(resources, &run.dir, &env.vasp_command));
        prepare_run(&args.template, run, script.as_deref())?;

        if args.dry_run {
            output::print_skip(&format!("Prepared {}", run.dir.display()));
            continue;
        }

        let job_id = slurm::submit_job(&run.dir, JOBSCRIPT)?;
        output::print_success(&format!("Submitted {} as job {}", run.dir.display(), job_id));
        job_ids.push(job_id);
    }

    if args.wait && !job_ids.is_empty() {
        let user = env.user()?;
        let spinner = progress::create_spinner(&format!("Waiting for {} job(s)", job_ids.len()));
        loop {
            let mut pending = Vec::new();
            for id in &job_ids {
                if !slurm::has_completed(id, &user)? {
                    pending.push(id.clone());
                }
            }
            if pending.is_empty() {
                break;
            }
            spinner.set_message(format!("Waiting for job(s) {}", pending.join(" ")));
            thread::sleep(Duration::from_secs(args.poll_interval.max(1)));
        }
        spinner.finish_and_clear();
        output::print_done(&format!("{} job(s) completed", job_ids.len()));
    } else {
        output::print_done(&format!("{} calculation(s) prepared", runs.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(dir: &Path, with_script: bool) {
        fs::create_dir_all(dir).unwrap();
        if with_script {
            fs::write(dir.join(JOBSCRIPT), "#!/bin/bash\nmpirun vasp_std\n").unwrap();
        }
        fs::write(dir.join("POSCAR"), "poscar").unwrap();
        fs::write(dir.join("POTCAR"), "potcar").unwrap();
        fs::write(dir.join("INCAR"), "PREC = Accurate\nENCUT = 500\n ISMEAR = 0\n").unwrap();
    }

    #[test]
    fn test_plan_runs_sweep() {
        let overrides = vec![("ISMEAR".to_string(), "-5".to_string())];
        let sweep = ("ENCUT".to_string(), "500, 600".to_string());
        let runs = plan_runs(Path::new("/calc"), &overrides, Some(&sweep));

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].dir, PathBuf::from("/calc/ENCUT/600"));
        assert_eq!(runs[1].overrides["ENCUT"], "600");
        assert_eq!(runs[1].overrides["ISMEAR"], "-5");

        let single = plan_runs(Path::new("/calc"), &overrides, None);
        assert_eq!(single[0].dir, PathBuf::from("/calc"));
    }

    #[test]
    fn test_prepare_run_rewrites_incar() {
        let tmp = tempfile::tempdir().unwrap();
        let tpl = tmp.path().join("Specific");
        template(&tpl, true);

        let run = PlannedRun {
            dir: tmp.path().join("calc"),
            overrides: [("ENCUT".to_string(), "650".to_string())].into_iter().collect(),
        };
        prepare_run(&tpl, &run, None).unwrap();

        let incar = fs::read_to_string(run.dir.join("INCAR")).unwrap();
        assert_eq!(incar, "PREC = Accurate\nENCUT = 650\n ISMEAR = 0\n");
        assert!(run.dir.join(JOBSCRIPT).is_file());
        assert!(!run.dir.join("KPOINTS").exists());
    }

    #[test]
    fn test_prepare_run_needs_jobscript() {
        let tmp = tempfile::tempdir().unwrap();
        let tpl = tmp.path().join("Specific");
        template(&tpl, false);
        let run = PlannedRun {
            dir: tmp.path().join("calc"),
            overrides: BTreeMap::new(),
        };

        assert!(matches!(
            prepare_run(&tpl, &run, None),
            Err(AutomagError::FileNotFound { .. })
        ));
        prepare_run(&tpl, &run, Some("#!/bin/bash\n")).unwrap();
        assert_eq!(fs::read_to_string(run.dir.join(JOBSCRIPT)).unwrap(), "#!/bin/bash\n");
    }

    #[test]
    fn test_unused_tags() {
        let incar = "ENCUT = 500\nISMEAR = 0\n";
        let overrides = vec![
            ("ENCUT".to_string(), "600".to_string()),
            ("LDAU".to_string(), ".TRUE.".to_string()),
        ];
        assert_eq!(unused_tags(incar, &overrides), vec!["LDAU".to_string()]);
    }
}
