//! Info command - show the header and record counts of a database.
//!
//! # Examples
//!
//! ```bash
//! oxsafe info ~/db.psafe3
//!
//! # Output as JSON for scripting
//! oxsafe info ~/db.psafe3 --json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, instrument};

use oxsafe_core::crypto::random::os_random;
use oxsafe_core::{EngineConfig, FileVersion, RwMode, make_pws_file};

use crate::output::{create_table, format_timestamp};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Password Safe database
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for info command
#[derive(Serialize)]
struct DatabaseInfo {
    path: String,
    format: String,
    file_uuid: String,
    iterations: u32,
    last_saved: String,
    last_saved_by: String,
    last_saved_on: String,
    saved_with: String,
    name: String,
    description: String,
    records: usize,
    records_with_unknown_fields: usize,
    unknown_header_fields: usize,
}

#[instrument(level = "info", name = "cmd::info", skip_all, fields(file = %args.file.display()))]
pub fn execute(args: &Args, passkey: &SecretString, config: &EngineConfig) -> Result<()> {
    let (mut file, _) = make_pws_file(
        &args.file,
        FileVersion::Unknown,
        RwMode::Read,
        config,
        os_random(),
    )?;
    file.open(passkey)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let mut records = 0;
    while let Some(field) = file.read_field()? {
        if field.is_end() {
            records += 1;
        }
    }
    debug!(records, "Read all records");

    let header = file.header();
    let info = DatabaseInfo {
        path: args.file.display().to_string(),
        format: file.version().to_string(),
        file_uuid: header.file_uuid_string(),
        iterations: header.iterations,
        last_saved: format_timestamp(header.when_last_saved),
        last_saved_by: header.last_saved_by.clone(),
        last_saved_on: header.last_saved_on.clone(),
        saved_with: header.what_last_saved.clone(),
        name: header.db_name.clone(),
        description: header.db_desc.clone(),
        records,
        records_with_unknown_fields: file.records_with_unknown_fields(),
        unknown_header_fields: header.unknown_fields.len(),
    };
    file.close()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        let mut table = create_table();
        table.set_header(vec!["Property", "Value"]);
        table.add_row(vec!["Path", &info.path]);
        table.add_row(vec!["Format", &info.format]);
        if info.format == FileVersion::V30.to_string() {
            table.add_row(vec!["File UUID", &info.file_uuid]);
            table.add_row(vec!["Hash Iterations", &info.iterations.to_string()]);
            table.add_row(vec!["Last Saved", &info.last_saved]);
            table.add_row(vec!["Saved By", &info.last_saved_by]);
            table.add_row(vec!["Saved On", &info.last_saved_on]);
            table.add_row(vec!["Saved With", &info.saved_with]);
            table.add_row(vec!["Name", &info.name]);
            table.add_row(vec!["Description", &info.description]);
        }
        table.add_row(vec!["Records", &info.records.to_string()]);
        table.add_row(vec![
            "Records With Unknown Fields",
            &info.records_with_unknown_fields.to_string(),
        ]);
        println!("{table}");
    }

    Ok(())
}
