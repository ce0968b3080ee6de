//! Roster file parsing for the student import. Accepts a single-sheet
//! delimited file (comma, semicolon, or tab), matches headers
//! case-insensitively against the known alias table, and drops columns it
//! does not recognize. Cells left empty simply stay absent from the row.

use std::collections::BTreeMap;
use std::path::Path;

/// Header synonyms, Spanish and English, mapped to canonical field names.
fn canonical_field(header: &str) -> Option<&'static str> {
    match header.trim().to_lowercase().as_str() {
        "código" | "codigo" | "student_code" => Some("student_code"),
        "nombre" | "first_name" => Some("first_name"),
        "apellido" | "last_name" => Some("last_name"),
        "email" | "correo" => Some("email"),
        _ => None,
    }
}

pub fn read_rows(path: &Path) -> anyhow::Result<Vec<BTreeMap<String, String>>> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Ok(Vec::new());
    };

    let delim = sniff_delimiter(header_line);
    let headers: Vec<Option<&'static str>> = split_fields(header_line, delim)
        .iter()
        .map(|h| canonical_field(h))
        .collect();
    if headers.iter().all(Option::is_none) {
        anyhow::bail!("no recognized column headers");
    }

    let mut rows = Vec::new();
    for line in lines {
        let cells = split_fields(line, delim);
        let mut row = BTreeMap::new();
        for (i, cell) in cells.iter().enumerate() {
            let Some(Some(field)) = headers.get(i) else {
                continue;
            };
            if !cell.is_empty() {
                row.insert(field.to_string(), cell.clone());
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn sniff_delimiter(header_line: &str) -> char {
    let mut best = ',';
    let mut best_count = 0usize;
    for candidate in [',', ';', '\t'] {
        let count = header_line.matches(candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

// Unquoted fields are trimmed; quoting preserves the content verbatim.
fn split_fields(line: &str, delim: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut chars = line.chars().peekable();

    let finish = |current: &str, was_quoted: bool| {
        if was_quoted {
            current.to_string()
        } else {
            current.trim().to_string()
        }
    };

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
            was_quoted = true;
        } else if c == delim {
            fields.push(finish(&current, was_quoted));
            current.clear();
            was_quoted = false;
        } else {
            current.push(c);
        }
    }
    fields.push(finish(&current, was_quoted));
    fields
}
