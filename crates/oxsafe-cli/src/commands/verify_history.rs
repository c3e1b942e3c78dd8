//! Verify-history command - check an exported password-history field.
//!
//! The value holds old passwords, so it is read from stdin when not given
//! on the command line. Passwords are never printed unless `--normalized`
//! asks for the stored form.

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use zeroize::Zeroizing;

use oxsafe_core::import::{HistoryImport, verify_import_history};

use crate::output::{create_table, format_timestamp};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// History text (read from stdin if omitted)
    pub value: Option<String>,

    /// Print the stored (normalized) form instead of a summary
    #[arg(long)]
    pub normalized: bool,
}

fn read_stdin_line() -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(line)
}

pub fn execute(args: &Args) -> Result<()> {
    let input = match &args.value {
        Some(value) => Zeroizing::new(value.clone()),
        None => read_stdin_line()?,
    };

    let parsed = verify_import_history(&input).context("Invalid password history")?;
    match parsed {
        HistoryImport::Empty => println!("empty"),
        HistoryImport::Ignored => println!("ignored (history off, no entries)"),
        HistoryImport::Parsed {
            history,
            normalized,
        } => {
            if args.normalized {
                println!("{}", normalized.as_str());
                return Ok(());
            }

            let mut table = create_table();
            table.set_header(vec!["Property", "Value"]);
            table.add_row(vec![
                "Status",
                if history.enabled() { "on" } else { "off" },
            ]);
            table.add_row(vec!["Max Entries", &history.max_entries().to_string()]);
            table.add_row(vec!["Entries", &history.entries().len().to_string()]);
            println!("{table}");

            if !history.entries().is_empty() {
                let mut entries = create_table();
                entries.set_header(vec!["#", "Changed", "Length"]);
                for (i, entry) in history.entries().iter().enumerate() {
                    entries.add_row(vec![
                        (i + 1).to_string(),
                        format_timestamp(entry.changed_at),
                        entry.password.chars().count().to_string(),
                    ]);
                }
                println!("{entries}");
            }
        }
    }
    Ok(())
}
