use std::fmt;
use std::path::PathBuf;

/// Where an error happened inside a container file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContext {
    /// The container path on disk
    pub path: Option<PathBuf>,
    /// Zero-based record index (for record field errors)
    pub record: Option<usize>,
    /// The field type byte being processed
    pub field_type: Option<u8>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_record(mut self, record: usize) -> Self {
        self.record = Some(record);
        self
    }

    #[must_use]
    pub fn with_field_type(mut self, field_type: u8) -> Self {
        self.field_type = Some(field_type);
        self
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(record) = self.record {
            parts.push(format!("record {record}"));
        }
        if let Some(field_type) = self.field_type {
            parts.push(format!("field 0x{field_type:02x}"));
        }
        if let Some(ref path) = self.path {
            parts.push(format!("in {:?}", path.display()));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}
