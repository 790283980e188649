use crate::error::{MetaError, Result};
use crate::types::Column;

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| h.trim().to_ascii_uppercase())
        .collect()
}

/// Find a column by name, ignoring case and surrounding whitespace. The
/// returned label keeps the header's original spelling.
pub fn resolve_column(headers: &[String], name: &str) -> Result<Column> {
    let wanted = name.trim().to_ascii_uppercase();
    let normalized = normalize_headers(headers);
    let mut matches = normalized
        .iter()
        .enumerate()
        .filter(|(_, h)| **h == wanted)
        .map(|(i, _)| i);
    let index = matches
        .next()
        .ok_or_else(|| MetaError::MissingColumn(name.to_string()))?;
    if matches.next().is_some() {
        return Err(MetaError::InvalidArgument(format!(
            "Multiple columns match {name}; rename one of them"
        )));
    }
    Ok(Column::new(index, headers[index].trim()))
}

pub fn resolve_columns(headers: &[String], names: &[String]) -> Result<Vec<Column>> {
    names
        .iter()
        .map(|name| resolve_column(headers, name))
        .collect()
}
