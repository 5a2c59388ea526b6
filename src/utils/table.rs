//! Column-aligned table output

/// Render rows under `headers`, columns separated by two spaces
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = render_line(&widths, headers.iter().copied());
    for row in rows {
        out.push_str(&render_line(&widths, row.iter().map(String::as_str)));
    }
    out
}

fn render_line<'a>(widths: &[usize], cells: impl Iterator<Item = &'a str>) -> String {
    let line: Vec<String> = cells
        .enumerate()
        .map(|(i, cell)| {
            let w = widths.get(i).copied().unwrap_or(0);
            format!("{:<width$}", cell, width = w)
        })
        .collect();
    format!("{}\n", line.join("  ").trim_end())
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}
