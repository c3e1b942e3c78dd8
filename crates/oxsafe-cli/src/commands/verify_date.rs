//! Verify-date command - check a date-time string and print its timestamp.
//!
//! # Examples
//!
//! ```bash
//! oxsafe verify-date "2024/02/28 10:00:00"
//! oxsafe verify-date --format asc "Wed Feb 28 10:00:00 2024"
//! oxsafe verify-date --format xml-date 2024-02-28
//! ```

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, ValueEnum};

use oxsafe_core::import::{
    verify_asc_date_time, verify_import_date_time, verify_xml_date, verify_xml_date_time,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DateFormat {
    /// yyyy/mm/dd hh:mm:ss
    Import,
    /// ddd MMM dd hh:mm:ss yyyy
    Asc,
    /// yyyy-mm-ddThh:mm:ss
    Xml,
    /// yyyy-mm-dd
    XmlDate,
}

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Date-time text to check
    pub value: String,

    /// Grammar the value must follow
    #[arg(long, value_enum, default_value = "import")]
    pub format: DateFormat,
}

pub fn execute(args: &Args) -> Result<()> {
    let verify = match args.format {
        DateFormat::Import => verify_import_date_time,
        DateFormat::Asc => verify_asc_date_time,
        DateFormat::Xml => verify_xml_date_time,
        DateFormat::XmlDate => verify_xml_date,
    };
    let timestamp = verify(&args.value)
        .with_context(|| format!("Invalid {:?} date-time {:?}", args.format, args.value))?;

    println!("{timestamp}");
    Ok(())
}
