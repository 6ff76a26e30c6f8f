//! Reader for the external rename table
//!
//! The table is a tiny-format mappings file (v1 or v2). Whatever owner and
//! descriptor context the file carries is deliberately thrown away: class
//! mappings are keyed by internal name, method and field mappings by the old
//! simple name alone. Identical old names in unrelated classes share one
//! mapping - that is the contract, not an accident to repair.

use std::collections::HashMap;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Parsed rename table, partitioned by element kind
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenameTable {
    /// Old internal class name to new internal class name
    pub classes: HashMap<String, String>,
    /// Old method simple name to new simple name
    pub methods: HashMap<String, String>,
    /// Old field simple name to new simple name
    pub fields: HashMap<String, String>,
}

impl RenameTable {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty() && self.fields.is_empty()
    }
}

/// Why the rename table could not be produced
#[derive(Debug)]
pub enum MappingsError {
    /// No `mappings.*` file in the working directory
    NotFound(PathBuf),
    Io(io::Error),
    Parse { line: usize, message: String },
}

impl fmt::Display for MappingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingsError::NotFound(dir) => {
                write!(f, "no 'mappings' file found in {}", dir.display())
            }
            MappingsError::Io(error) => write!(f, "failed to read mappings: {}", error),
            MappingsError::Parse { line, message } => {
                write!(f, "malformed mappings at line {}: {}", line, message)
            }
        }
    }
}

impl error::Error for MappingsError {}

impl From<io::Error> for MappingsError {
    fn from(error: io::Error) -> MappingsError {
        MappingsError::Io(error)
    }
}

/// Find the rename table: a file whose base name is exactly `mappings`,
/// with any extension, directly in `directory`
pub fn locate(directory: &Path) -> Result<PathBuf, MappingsError> {
    let entries = fs::read_dir(directory)?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.file_stem().and_then(|stem| stem.to_str()) == Some("mappings") {
            return Ok(path);
        }
    }
    Err(MappingsError::NotFound(directory.to_owned()))
}

/// Read and parse a tiny-format mappings file
pub fn read(path: &Path) -> Result<RenameTable, MappingsError> {
    parse(&fs::read_to_string(path)?)
}

/// Parse tiny v1 or tiny v2 mappings text
pub fn parse(source: &str) -> Result<RenameTable, MappingsError> {
    let mut lines = source.lines().enumerate();
    let (_, header) = lines.next().ok_or(MappingsError::Parse {
        line: 1,
        message: "empty mappings file".to_owned(),
    })?;

    let header_fields: Vec<&str> = header.split('\t').collect();
    match header_fields.first() {
        Some(&"tiny") => parse_v2(lines),
        Some(&"v1") => parse_v1(lines),
        _ => Err(MappingsError::Parse {
            line: 1,
            message: "unrecognized mappings header".to_owned(),
        }),
    }
}

/// Tiny v1: `CLASS src dst` / `METHOD owner desc src dst` /
/// `FIELD owner desc src dst`, all tab-separated
fn parse_v1<'a>(
    lines: impl Iterator<Item = (usize, &'a str)>,
) -> Result<RenameTable, MappingsError> {
    let mut table = RenameTable::default();
    for (index, line) in lines {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            ["CLASS", src, dst] => {
                table.classes.insert((*src).to_owned(), (*dst).to_owned());
            }
            ["METHOD", _owner, _desc, src, dst] => {
                table.methods.insert((*src).to_owned(), (*dst).to_owned());
            }
            ["FIELD", _owner, _desc, src, dst] => {
                table.fields.insert((*src).to_owned(), (*dst).to_owned());
            }
            _ => {
                return Err(MappingsError::Parse {
                    line: index + 1,
                    message: format!("unrecognized v1 entry '{}'", line),
                })
            }
        }
    }
    Ok(table)
}

/// Tiny v2: `c src dst` at the top level, indented `m desc src dst` and
/// `f desc src dst` member lines underneath
fn parse_v2<'a>(
    lines: impl Iterator<Item = (usize, &'a str)>,
) -> Result<RenameTable, MappingsError> {
    let mut table = RenameTable::default();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let depth = line.bytes().take_while(|b| *b == b'\t').count();
        let fields: Vec<&str> = line[depth..].split('\t').collect();
        match (depth, fields.as_slice()) {
            (0, ["c", src, dst]) => {
                table.classes.insert((*src).to_owned(), (*dst).to_owned());
            }
            (1, ["m", _desc, src, dst]) => {
                table.methods.insert((*src).to_owned(), (*dst).to_owned());
            }
            (1, ["f", _desc, src, dst]) => {
                table.fields.insert((*src).to_owned(), (*dst).to_owned());
            }
            // Parameter, variable, and comment rows carry no renames we keep
            (depth, [kind, ..]) if depth >= 2 || matches!(*kind, "p" | "v" | "c") => (),
            _ => {
                return Err(MappingsError::Parse {
                    line: index + 1,
                    message: format!("unrecognized v2 entry '{}'", line),
                })
            }
        }
    }
    Ok(table)
}
