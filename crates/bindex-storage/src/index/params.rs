//! Parameter sidecar file.
//!
//! `<name>.p<ext>` holds one `Key value` line per persisted parameter:
//!
//! ```text
//! Order 71
//! Fill 25
//! Pagesize 8192
//! Level 2
//! Cachesize 100
//! Sorder 71
//! Sfill 25
//! Count 10432
//! Kwlimit 15
//! ```

use bindex_common::{BindexError, IndexParams, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::Path;

/// Writes the parameter file, replacing any previous one.
pub fn write_params(path: &Path, params: &IndexParams) -> Result<()> {
    let mut text = String::new();
    let lines: [(&str, u64); 9] = [
        ("Order", params.order as u64),
        ("Fill", params.fill as u64),
        ("Pagesize", params.pagesize as u64),
        ("Level", u64::from(params.level)),
        ("Cachesize", params.cachesize as u64),
        ("Sorder", params.sorder as u64),
        ("Sfill", params.sfill as u64),
        ("Count", params.count),
        ("Kwlimit", params.kwlimit as u64),
    ];
    for (key, value) in lines {
        let _ = writeln!(text, "{key} {value}");
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// Reads the parameter file.
///
/// A missing file is `IndexNotFound`; a missing, duplicated or unparsable
/// line is `ParamsMalformed`. Unknown keys are ignored.
pub fn read_params(path: &Path) -> Result<IndexParams> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => BindexError::IndexNotFound(path.display().to_string()),
        _ => BindexError::Io(e),
    })?;
    let malformed = |reason: String| BindexError::ParamsMalformed {
        path: path.display().to_string(),
        reason,
    };

    let mut values: HashMap<&str, u64> = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(malformed(format!("line {}: expected `Key value`", lineno + 1)));
        };
        let value = value
            .parse::<u64>()
            .map_err(|_| malformed(format!("line {}: bad value for {key}: {value}", lineno + 1)))?;
        if values.insert(key, value).is_some() {
            return Err(malformed(format!("line {}: duplicate {key}", lineno + 1)));
        }
    }

    let get = |key: &str| {
        values
            .get(key)
            .copied()
            .ok_or_else(|| malformed(format!("missing {key}")))
    };
    let get_usize = |key: &str| -> Result<usize> {
        let value = get(key)?;
        usize::try_from(value).map_err(|_| malformed(format!("{key} out of range: {value}")))
    };

    let level = get("Level")?;
    Ok(IndexParams {
        order: get_usize("Order")?,
        fill: get_usize("Fill")?,
        pagesize: get_usize("Pagesize")?,
        level: u32::try_from(level).map_err(|_| malformed(format!("Level out of range: {level}")))?,
        cachesize: get_usize("Cachesize")?,
        sorder: get_usize("Sorder")?,
        sfill: get_usize("Sfill")?,
        count: get("Count")?,
        kwlimit: get_usize("Kwlimit")?,
    })
}
