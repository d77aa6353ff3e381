//! Parser for the Kotlin `SourceDebugExtension` (SMAP) text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

static FILE_INFO: OnceLock<Regex> = OnceLock::new();
static LINE_INFO: OnceLock<Regex> = OnceLock::new();

/// Errors raised while parsing an SMAP.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SmapError {
    #[error("Unexpected SMAP line: {0}")]
    UnexpectedLine(String),
    #[error("Unexpected end of SMAP")]
    UnexpectedEnd,
    #[error("invalid SMAP pattern: {0}")]
    Pattern(String),
}

/// One line-section entry of the primary stratum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub input_file_name: String,
    pub input_class_name: String,
    pub input_start_line: u32,
    pub repeat_count: u32,
    pub output_start_line: u32,
}

/// Parsed primary (`Kotlin`) stratum of an SMAP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KotlinSmap {
    mappings: Vec<Mapping>,
}

impl KotlinSmap {
    /// Parses `smap` for a class compiled from `source_file_name`.
    ///
    /// Parsing ends at `*E` or at the `*S KotlinDebug` stratum, whichever comes
    /// first; anything after it is not read.
    pub fn parse(source_file_name: &str, smap: &str) -> Result<Self, SmapError> {
        let mut lines = smap.lines();
        expect_line(&mut lines, "SMAP")?;
        expect_line(&mut lines, source_file_name)?;
        expect_line(&mut lines, "Kotlin")?;
        expect_line(&mut lines, "*S Kotlin")?;
        expect_line(&mut lines, "*F")?;

        let file_info = pattern(&FILE_INFO, r"^\+ ([0-9]+) (.+)$")?;
        let mut files: HashMap<u32, (String, String)> = HashMap::new();
        loop {
            let line = lines.next().ok_or(SmapError::UnexpectedEnd)?;
            if line == "*L" {
                break;
            }
            let captures = file_info
                .captures(line)
                .ok_or_else(|| unexpected(line))?;
            let id = number(&captures[1], line)?;
            let file_name = captures[2].to_string();
            let class_name = lines.next().ok_or(SmapError::UnexpectedEnd)?;
            files.insert(id, (file_name, class_name.to_string()));
        }

        let line_info = pattern(
            &LINE_INFO,
            r"^([0-9]+)(#[0-9]+)?(,[0-9]+)?:([0-9]+)(,[0-9]+)?$",
        )?;
        let mut mappings = Vec::new();
        loop {
            let line = lines.next().ok_or(SmapError::UnexpectedEnd)?;
            if line == "*E" || line == "*S KotlinDebug" {
                break;
            }
            let captures = line_info
                .captures(line)
                .ok_or_else(|| unexpected(line))?;
            let input_start_line = number(&captures[1], line)?;
            let file_id = match captures.get(2) {
                Some(id) => number(&id.as_str()[1..], line)?,
                None => return Err(unexpected(line)),
            };
            let repeat_count = match captures.get(3) {
                Some(count) => number(&count.as_str()[1..], line)?,
                None => 1,
            };
            let output_start_line = number(&captures[4], line)?;
            let (input_file_name, input_class_name) =
                files.get(&file_id).cloned().ok_or_else(|| unexpected(line))?;
            mappings.push(Mapping {
                input_file_name,
                input_class_name,
                input_start_line,
                repeat_count,
                output_start_line,
            });
        }
        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> Result<&'static Regex, SmapError> {
    if let Some(regex) = cell.get() {
        return Ok(regex);
    }
    let regex = Regex::new(source).map_err(|err| SmapError::Pattern(err.to_string()))?;
    Ok(cell.get_or_init(|| regex))
}

fn expect_line<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    expected: &str,
) -> Result<(), SmapError> {
    match lines.next() {
        Some(line) if line == expected => Ok(()),
        Some(line) => Err(unexpected(line)),
        None => Err(SmapError::UnexpectedEnd),
    }
}

fn number(text: &str, line: &str) -> Result<u32, SmapError> {
    text.parse().map_err(|_| unexpected(line))
}

fn unexpected(line: &str) -> SmapError {
    SmapError::UnexpectedLine(line.to_string())
}
