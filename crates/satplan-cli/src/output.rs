use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Plain-text table. Columns whose cells are all numbers are right-aligned;
/// cells beyond the header count are dropped.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| text_width(h)).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(text_width(cell));
        }
    }
    let numeric: Vec<bool> = (0..headers.len())
        .map(|i| {
            !rows.is_empty()
                && rows
                    .iter()
                    .all(|r| r.get(i).map_or(true, |c| c.is_empty() || c.parse::<f64>().is_ok()))
        })
        .collect();

    let line = |cells: Vec<String>| cells.join("  ").trim_end().to_string() + "\n";
    let pad = |i: usize, cell: &str| {
        let w = widths[i];
        if numeric[i] {
            format!("{cell:>w$}")
        } else {
            format!("{cell:<w$}")
        }
    };

    let mut out = line(headers.iter().enumerate().map(|(i, h)| pad(i, h)).collect());
    out += &line(widths.iter().map(|&w| "-".repeat(w)).collect());
    for row in rows {
        // short rows pad with blanks
        let cells = (0..headers.len())
            .map(|i| pad(i, row.get(i).map_or("", String::as_str)))
            .collect();
        out += &line(cells);
    }
    out
}

fn text_width(s: &str) -> usize {
    s.chars().count()
}

/// Fixed-precision number for table cells.
pub fn fmt_f64(v: f64, precision: usize) -> String {
    format!("{v:.precision$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn numeric_columns_right_aligned() {
        let out = render_table(
            &["SATELLITE", "OBS"],
            &[row(&["sat-1", "3"]), row(&["sat-10", "12"])],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "SATELLITE  OBS");
        assert_eq!(lines[1], "---------  ---");
        assert_eq!(lines[2], "sat-1        3");
        assert_eq!(lines[3], "sat-10      12");
    }

    #[test]
    fn trailing_blank_cells_trimmed() {
        let out = render_table(
            &["ACTION", "RESULT", "DETAIL"],
            &[row(&["o1", "staged", ""]), row(&["o2", "rejected", "overlap"])],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[2], "o1      staged");
        assert_eq!(lines[3], "o2      rejected  overlap");
        assert!(out.lines().all(|l| !l.ends_with(' ')));
    }

    #[test]
    fn short_and_long_rows() {
        let out = render_table(&["A", "B"], &[row(&["x"]), row(&["y", "z", "extra"])]);
        assert!(!out.contains("extra"));
        assert_eq!(out.lines().nth(2), Some("x"));
        assert_eq!(out.lines().nth(3), Some("y  z"));
    }

    #[test]
    fn fixed_precision() {
        assert_eq!(fmt_f64(2.0, 3), "2.000");
        assert_eq!(fmt_f64(-0.126, 2), "-0.13");
    }
}
