//! Minimal tab-separated reader for form exports.
//!
//! Fields may be wrapped in double quotes, in which case they can contain
//! tabs, newlines and doubled quotes (`""`).

/// Splits TSV text into rows of fields. Blank lines are skipped.
///
/// # Examples
/// ```
/// use community_render::registry::tsv::parse_rows;
///
/// let rows = parse_rows("a\tb\n\"c\td\"\te\n");
/// assert_eq!(rows, vec![vec!["a", "b"], vec!["c\td", "e"]]);
/// ```
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            '\t' => {
                row.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                field_started = false;
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }
    if field_started || !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.iter().all(|f| f.trim().is_empty()) {
        return;
    }
    rows.push(row);
}
