use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Print `key  value` pairs with the keys padded to a common width.
pub fn print_fields(rows: &[(&str, String)]) {
    for line in format_fields(rows) {
        println!("{line}");
    }
}

fn format_fields(rows: &[(&str, String)]) -> Vec<String> {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(key, value)| format!("{key:width$}  {value}"))
        .collect()
}
