// Shared status-line helpers so every command prints OK/FAIL/skip the
// same way.

use colored::Colorize;

pub fn print_header(title: &str) {
    println!();
    println!("{} {}", ">>".bold(), title.cyan().bold());
    println!("{}", "=".repeat(60));
}

pub fn print_success(message: &str) {
    println!("   {} {}", "OK".green(), message);
}

pub fn print_failure(message: &str) {
    eprintln!("   {} {}", "FAIL".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("   {} {}", "Warning:".yellow().bold(), message);
}

pub fn print_skipped(message: &str) {
    println!("   {} {}", "skip".dimmed(), message.dimmed());
}
