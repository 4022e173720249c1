//! # 终端输出
//!
//! 统一的 `[OK]` / `[WARN]` / `[ERR]` 前缀。物理上可疑但不致命的结果
//! （未收敛、磁矩未保持）一律走 `print_warning`。
//!
//! ## 依赖关系
//! - 被所有 `commands/` 模块使用
//! - 使用 `colored` crate

use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// 错误写到 stderr
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERR]".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[*]".blue().bold(), msg);
}

pub fn print_skip(msg: &str) {
    println!("{} {}", "[SKIP]".dimmed(), msg);
}

pub fn print_done(msg: &str) {
    println!("{} {}", "[DONE]".green().bold(), msg);
}

/// 拟合得到的物理量，如 `U = 3.45 eV`
pub fn print_value(name: &str, value: &str) {
    println!("{} {} = {}", "[=]".cyan().bold(), name.bold(), value);
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(60);
    println!("\n{}", line.dimmed());
    println!("  {}", title.bold());
    println!("{}\n", line.dimmed());
}

pub fn print_separator() {
    println!("{}", "─".repeat(60).dimmed());
}
