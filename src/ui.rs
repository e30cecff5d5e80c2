//! Terminal UI utilities.
//!
//! A box-drawn table that fits itself to the terminal width. Cells may carry
//! ANSI colors; widths are measured on the visible text.
//!
//! ```rust
//! use kiln::ui::Table;
//!
//! let mut table = Table::new(&["Project", "Sources"]);
//! table.add_row(vec!["app".to_string(), "3".to_string()]);
//! table.print();
//! ```

use colored::*;
use console::{measure_text_width, truncate_str};

/// Columns never shrink below this many characters.
const MIN_COLUMN: usize = 8;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Rows with the wrong number of cells are ignored.
    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row.iter().map(|c| single_line(c)).collect());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) {
        let (_, term_width) = console::Term::stdout().size();
        for line in self.render(term_width as usize) {
            println!("{}", line);
        }
    }

    /// Lay the table out for a terminal `max_width` columns wide.
    pub fn render(&self, max_width: usize) -> Vec<String> {
        if self.headers.is_empty() {
            return Vec::new();
        }
        let widths = self.column_widths(max_width);

        let rule = |left: &str, mid: &str, right: &str| {
            let cells: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {}{}{}", left, cells.join(mid), right)
        };
        let line = |cells: &[String], bold: bool| {
            let mut out = String::from("  │");
            for (cell, &width) in cells.iter().zip(&widths) {
                let text = truncate_str(cell, width, "...");
                let pad = width.saturating_sub(measure_text_width(&text));
                let text = if bold {
                    text.bold().to_string()
                } else {
                    text.to_string()
                };
                out.push_str(&format!(" {}{} │", text, " ".repeat(pad)));
            }
            out
        };

        let mut out = vec![rule("┌", "┬", "┐"), line(&self.headers[..], true), rule("├", "┼", "┤")];
        out.extend(self.rows.iter().map(|row| line(row.as_slice(), false)));
        out.push(rule("└", "┴", "┘"));
        out
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| measure_text_width(h)).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(measure_text_width(cell));
            }
        }

        // indent + outer borders + " x │" per column
        let overhead = 3 + 3 * widths.len();
        let budget = max_width.saturating_sub(overhead);
        while widths.iter().sum::<usize>() > budget {
            let Some(widest) = widths
                .iter_mut()
                .filter(|w| **w > MIN_COLUMN)
                .max_by_key(|w| **w)
            else {
                break;
            };
            *widest -= 1;
        }
        widths
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\n', '\r', '\t'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_shape() {
        colored::control::set_override(false);
        let mut table = Table::new(&["Name", "Value"]);
        table.add_row(vec!["app".into(), "42".into()]);
        table.add_row(vec!["only one cell".into()]);
        let lines = table.render(80);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("  ┌"));
        assert!(lines[3].contains("app"));
        assert!(lines[3].contains("42"));
        let widths: Vec<usize> = lines.iter().map(|l| measure_text_width(l)).collect();
        assert!(widths.iter().all(|w| *w == widths[0]));
    }

    #[test]
    fn test_narrow_terminal_truncates_widest_column() {
        colored::control::set_override(false);
        let mut table = Table::new(&["Project", "Output"]);
        table.add_row(vec!["app".into(), "/a/very/long/path/to/some/output/binary".into()]);
        let lines = table.render(40);
        assert!(lines.iter().all(|l| measure_text_width(l) <= 40));
        assert!(lines[3].contains("..."));
    }

    #[test]
    fn test_multiline_cells_flattened() {
        let mut table = Table::new(&["A"]);
        assert!(table.is_empty());
        table.add_row(vec!["x\ny".into()]);
        assert!(!table.is_empty());
        assert_eq!(table.rows[0][0], "x y");
    }
}
