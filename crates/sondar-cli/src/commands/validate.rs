//! The `sondar validate` command.

use std::path::PathBuf;

use anyhow::Result;

pub fn execute(bank_path: PathBuf) -> Result<()> {
    let banks = if bank_path.is_dir() {
        sondar_core::bank::load_bank_directory(&bank_path)?
    } else {
        vec![sondar_core::bank::parse_bank(&bank_path)?]
    };

    let mut total_warnings = 0;

    for bank in &banks {
        println!(
            "Bank: {} ({} items, {} pattern rules, {} rules)",
            bank.name,
            bank.items.len(),
            bank.pattern_rules.len(),
            bank.rules.len()
        );

        let warnings = sondar_core::bank::validate_bank(bank);
        for w in &warnings {
            let prefix = w
                .subject
                .as_ref()
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All banks valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
