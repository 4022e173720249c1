//! # POSCAR / CONTCAR 读写
//!
//! 工作流中的结构都以 POSCAR 形式在任务目录之间传递：
//! 输入结构、enumlib 生成的设置 (`vasp.N`)、trials 中的 `settingNNN.vasp`，
//! 以及上一个计算留下的 CONTCAR。
//!
//! 读入时支持：
//! - 带或不带元素行（缺少时用 `X1`, `X2` 占位）
//! - `Selective dynamics`（标记列被忽略）
//! - 分数坐标与笛卡尔坐标（统一换算为分数坐标）
//!
//! 写出时原子顺序保持不变，磁矩向量的下标因此始终与原子一一对应。
//!
//! ## 依赖关系
//! - 被 `workflow/`, `commands/`, `config.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{AutomagError, Result};
use crate::models::{Atom, Crystal, Lattice};
use std::fs;
use std::path::Path;

/// 读取结构文件，首行为空时以文件名作为结构名
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    let content = fs::read_to_string(path).map_err(|e| AutomagError::read(path, e))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "structure".to_string());
    parse_poscar_content(&content, &stem)
}

fn parse_error(name: &str, reason: impl Into<String>) -> AutomagError {
    AutomagError::ParseError {
        format: "poscar".to_string(),
        path: name.to_string(),
        reason: reason.into(),
    }
}

// ─── 逐行读取 ─────────────────────────────────────────────

struct PoscarLines<'a> {
    name: String,
    lines: Vec<&'a str>,
    cursor: usize,
}

impl<'a> PoscarLines<'a> {
    fn next_line(&mut self, what: &str) -> Result<&'a str> {
        let line = self
            .lines
            .get(self.cursor)
            .copied()
            .ok_or_else(|| parse_error(&self.name, format!("unexpected end of file, expected {}", what)))?;
        self.cursor += 1;
        Ok(line)
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.cursor).copied()
    }

    /// 前三个数；第四列起（selective dynamics 标记等）忽略
    fn triple(&mut self, what: &str) -> Result<[f64; 3]> {
        let line_no = self.cursor + 1;
        let line = self.next_line(what)?;
        let values: Vec<f64> = line
            .split_whitespace()
            .take(3)
            .map_while(|s| s.parse().ok())
            .collect();
        match values[..] {
            [x, y, z] => Ok([x, y, z]),
            _ => Err(parse_error(
                &self.name,
                format!("line {}: expected three numbers for {}", line_no, what),
            )),
        }
    }
}

fn counts_of(line: &str) -> Option<Vec<usize>> {
    line.split_whitespace().map(|s| s.parse().ok()).collect()
}

/// 解析 POSCAR 文本
pub fn parse_poscar_content(content: &str, default_name: &str) -> Result<Crystal> {
    let mut lines = PoscarLines {
        name: default_name.to_string(),
        lines: content.lines().collect(),
        cursor: 0,
    };

    let title = lines.next_line("a title")?.trim();
    if !title.is_empty() {
        lines.name = title.to_string();
    }

    let scale: f64 = lines
        .next_line("the scaling factor")?
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1.0);

    let mut matrix = [[0.0; 3]; 3];
    for (axis, row) in ["a", "b", "c"].iter().zip(matrix.iter_mut()) {
        let v = lines.triple(&format!("lattice vector {}", axis))?;
        *row = v.map(|x| x * scale);
    }
    let lattice = Lattice::from_vectors(matrix);

    // 旧格式没有元素行，第六行直接是计数
    let species_line = lines.next_line("species or counts")?;
    let (elements, counts) = match counts_of(species_line) {
        Some(counts) if !counts.is_empty() => {
            let placeholders: Vec<String> = (1..=counts.len()).map(|i| format!("X{}", i)).collect();
            (placeholders, counts)
        }
        _ => {
            let elements: Vec<String> = species_line.split_whitespace().map(String::from).collect();
            let counts = counts_of(lines.next_line("atom counts")?)
                .ok_or_else(|| parse_error(&lines.name, "atom counts must be integers"))?;
            (elements, counts)
        }
    };
    if elements.is_empty() || elements.len() != counts.len() {
        return Err(parse_error(
            &lines.name,
            format!("{} species for {} atom counts", elements.len(), counts.len()),
        ));
    }

    if lines.peek().is_some_and(|l| l.trim_start().starts_with(['S', 's'])) {
        lines.cursor += 1;
    }
    let mode = lines.next_line("the coordinate mode")?.trim_start();
    let cartesian = mode.starts_with(['C', 'c', 'K', 'k']);

    let mut atoms = Vec::with_capacity(counts.iter().sum());
    for (element, &count) in elements.iter().zip(&counts) {
        for _ in 0..count {
            let v = lines.triple(&format!("a {} position", element))?;
            let position = if cartesian {
                lattice.to_fractional(v.map(|x| x * scale))
            } else {
                v
            };
            atoms.push(Atom::new(element.clone(), position));
        }
    }

    Ok(Crystal::new(lines.name, lattice, atoms))
}

/// 相邻同种原子合并后的 (元素, 数目)
///
/// INCAR 中按元素给出的标签（LDAUL 等）和 POTCAR 都按这个顺序排列。
pub fn species_runs(crystal: &Crystal) -> Vec<(String, usize)> {
    let mut groups: Vec<(String, usize)> = Vec::new();
    for atom in &crystal.atoms {
        match groups.last_mut() {
            Some((el, n)) if *el == atom.element => *n += 1,
            _ => groups.push((atom.element.clone(), 1)),
        }
    }
    groups
}

fn vector_line(v: &[f64; 3]) -> String {
    v.iter().map(|x| format!("{:>20.12}", x)).collect::<String>() + "\n"
}

/// 写出 VASP 5 格式、分数坐标、缩放因子为 1
///
/// 不重新排序原子，以保证与磁矩向量的索引一致。
pub fn to_poscar_string(crystal: &Crystal) -> String {
    let groups = species_runs(crystal);

    let mut text = format!("{}\n{:>19.14}\n", crystal.name, 1.0);
    crystal
        .lattice
        .matrix
        .iter()
        .for_each(|row| text += &vector_line(row));

    text += &groups.iter().map(|(el, _)| format!("{:>5}", el)).collect::<String>();
    text.push('\n');
    text += &groups.iter().map(|(_, n)| format!("{:>5}", n)).collect::<String>();
    text += "\nDirect\n";

    crystal
        .atoms
        .iter()
        .for_each(|atom| text += &vector_line(&atom.position));
    text
}

/// 为 enumlib 生成的 POSCAR 插入元素符号
///
/// enumlib 的计数行中，磁性元素被拆成两个等量的"自旋子格"，
/// 例如 Fe12O18 写作 `6 6 18`。这里将其替换为元素行 + 计数行。
/// `composition` 为 (元素, 数目) 列表，顺序与 POSCAR 中一致。
pub fn insert_elements(poscar: &str, composition: &[(String, usize)], magnetic_atom: &str) -> Result<String> {
    let mut lines: Vec<String> = poscar.lines().map(|l| l.to_string()).collect();
    if lines.len() < 6 {
        return Err(parse_error("enumlib poscar", "File too short"));
    }

    let expected: Vec<usize> = composition
        .iter()
        .flat_map(|(el, n)| {
            if el == magnetic_atom {
                vec![n / 2, n / 2]
            } else {
                vec![*n]
            }
        })
        .collect();

    let found = counts_of(&lines[5]).unwrap_or_default();
    if found != expected {
        return Err(parse_error(
            "enumlib poscar",
            format!("Atom counts {:?} do not match composition {:?}", found, expected),
        ));
    }

    let symbols: String = composition
        .iter()
        .map(|(el, _)| format!("{:>3} ", el))
        .collect();
    let counts: String = composition
        .iter()
        .map(|(_, n)| format!("{:3} ", n))
        .collect();

    lines[5] = symbols;
    lines.insert(6, counts);

    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

/// 解析形如 `Fe12O18` 的组成
pub fn parse_composition(formula: &str) -> Result<Vec<(String, usize)>> {
    let invalid = || AutomagError::InvalidArgument(format!("Invalid composition: {}", formula));
    let mut composition: Vec<(String, usize)> = Vec::new();
    let mut chars = formula.chars().peekable();

    while let Some(first) = chars.next() {
        if !first.is_ascii_uppercase() {
            return Err(invalid());
        }
        let mut symbol = first.to_string();
        while let Some(c) = chars.next_if(|c| c.is_ascii_lowercase()) {
            symbol.push(c);
        }
        let mut digits = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
            digits.push(c);
        }
        let count = if digits.is_empty() {
            1
        } else {
            digits.parse().map_err(|_| invalid())?
        };
        composition.push((symbol, count));
    }

    Ok(composition)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEMATITE_CELL: &str = "\
Fe2O3 afm1
   1.00000000000000
     5.0350000000     0.0000000000     0.0000000000
    -2.5175000000     4.3604000000     0.0000000000
     0.0000000000     0.0000000000    13.7500000000
   Fe   O
    2    3
Direct
  0.0000000000  0.0000000000  0.3553000000
  0.0000000000  0.0000000000  0.8553000000
  0.3059000000  0.0000000000  0.2500000000
  0.0000000000  0.3059000000  0.2500000000
  0.6941000000  0.6941000000  0.2500000000
";

    #[test]
    fn test_parse_species_and_counts() {
        let crystal = parse_poscar_content(HEMATITE_CELL, "POSCAR").unwrap();
        assert_eq!(crystal.name, "Fe2O3 afm1");
        assert_eq!(crystal.symbols(), vec!["Fe", "Fe", "O", "O", "O"]);
        assert!((crystal.atoms[1].position[2] - 0.8553).abs() < 1e-12);
        assert!((crystal.lattice.matrix[1][0] + 2.5175).abs() < 1e-12);
    }

    #[test]
    fn test_scaling_factor_and_empty_title() {
        let content = "\n1.5\n2 0 0\n0 2 0\n0 0 2\nNi\n1\nDirect\n0 0 0\n";
        let crystal = parse_poscar_content(content, "CONTCAR").unwrap();
        assert_eq!(crystal.name, "CONTCAR");
        let (a, _, c, _, _, _) = crystal.lattice.parameters();
        assert!((a - 3.0).abs() < 1e-10);
        assert!((c - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_counts_only_and_selective_dynamics() {
        let content = "vasp.3\n1.0\n3 0 0\n0 3 0\n0 0 6\n1 1\nSelective dynamics\nDirect\n\
0 0 0 T T T\n0 0 0.5 F F F\n";
        let crystal = parse_poscar_content(content, "vasp.3").unwrap();
        assert_eq!(crystal.symbols(), vec!["X1", "X2"]);
        assert!((crystal.atoms[1].position[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cartesian_positions_become_fractional() {
        let content = "Co\n1.0\n2.5 0 0\n0 2.5 0\n0 0 4.0\nCo\n2\nCartesian\n0 0 0\n1.25 1.25 2.0\n";
        let crystal = parse_poscar_content(content, "Co").unwrap();
        let p = crystal.atoms[1].position;
        assert!(p.iter().all(|x| (x - 0.5).abs() < 1e-10));
    }

    #[test]
    fn test_rejects_broken_files() {
        let truncated = "Mn\n1.0\n3 0 0\n0 3 0\n0 0 3\nMn\n2\nDirect\n0 0 0\n";
        assert!(parse_poscar_content(truncated, "Mn").is_err());

        let mismatch = "MnO\n1.0\n3 0 0\n0 3 0\n0 0 3\nMn O\n1\nDirect\n0 0 0\n";
        assert!(parse_poscar_content(mismatch, "MnO").is_err());
    }

    #[test]
    fn test_written_poscar_keeps_atom_order() {
        let lattice = Lattice::from_vectors([[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]);
        let atoms = vec![
            Atom::new("Ni", [0.0, 0.0, 0.0]),
            Atom::new("Fe", [0.5, 0.5, 0.0]),
            Atom::new("Ni", [0.5, 0.0, 0.5]),
            Atom::new("O", [0.25, 0.25, 0.25]),
        ];
        let crystal = Crystal::new("NiFeNiO", lattice, atoms);

        let text = to_poscar_string(&crystal);
        let parsed = parse_poscar_content(&text, "written").unwrap();

        assert_eq!(parsed.symbols(), vec!["Ni", "Fe", "Ni", "O"]);
        assert_eq!(species_runs(&parsed).len(), 4);
        assert!((parsed.atoms[3].position[0] - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_insert_elements() {
        let enumlib = "afm 1\n1.0\n5 0 0\n0 5 0\n0 0 5\n  6   6   18   \nD\n";
        let composition = parse_composition("Fe12O18").unwrap();
        let out = insert_elements(enumlib, &composition, "Fe").unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[5].split_whitespace().collect::<Vec<_>>(), vec!["Fe", "O"]);
        assert_eq!(lines[6].split_whitespace().collect::<Vec<_>>(), vec!["12", "18"]);

        let wrong = parse_composition("Fe10O18").unwrap();
        assert!(insert_elements(enumlib, &wrong, "Fe").is_err());
    }

    #[test]
    fn test_parse_composition() {
        let c = parse_composition("Ca3MnCoO6").unwrap();
        assert_eq!(
            c,
            vec![
                ("Ca".to_string(), 3),
                ("Mn".to_string(), 1),
                ("Co".to_string(), 1),
                ("O".to_string(), 6)
            ]
        );
        assert!(parse_composition("fe2").is_err());
    }
}
