use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_project_date;
use crate::stats::TaskStats;
use crate::task::{Category, Priority, Task};
use crate::view::ViewStatus;

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Prints `empty_message` instead of a table when the view has nothing
    /// to show. A failed view comes back as the error, unprinted.
    pub fn print_view_status(
        &self,
        status: &ViewStatus,
        empty_message: &str,
    ) -> anyhow::Result<bool> {
        match status {
            ViewStatus::Loading => {
                println!("Loading...");
                Ok(false)
            }
            ViewStatus::Empty => {
                println!("{empty_message}");
                Ok(false)
            }
            ViewStatus::Failed(message) => Err(anyhow!("could not load tasks: {message}")),
            ViewStatus::Ready(_) => Ok(true),
        }
    }

    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_task_table(&self, tasks: &[Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks, now)
    }

    pub fn write_task_table<W: Write>(
        &self,
        out: W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Done", "Pri", "Category", "Due", "Title"];

        let rows = tasks
            .iter()
            .map(|task| {
                let due = task.due_date.map(format_project_date).unwrap_or_default();
                let due = if task.is_overdue(now) {
                    self.paint(&due, "31")
                } else {
                    due
                };
                let label = task.priority.short_label();
                let priority = match task.priority {
                    Priority::High => self.paint(label, "31"),
                    Priority::Medium => self.paint(label, "33"),
                    Priority::Low | Priority::Unknown(_) => label.to_string(),
                };
                let done = if task.is_completed { "[x]" } else { "[ ]" };

                vec![
                    self.paint(task.short_id(), "33"),
                    done.to_string(),
                    priority,
                    task.category.to_string(),
                    due,
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(out, &headers, rows)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task)
    }

    pub fn write_task_info<W: Write>(&self, mut out: W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        writeln!(out, "category    {}", task.category)?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(
            out,
            "due         {}",
            task.due_date
                .map(format_project_date)
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(out, "status      {}", task.status_label())?;
        writeln!(out, "created     {}", format_project_date(task.created_at))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    pub fn print_stats(&self, stats: &TaskStats) -> anyhow::Result<()> {
        self.write_stats(io::stdout().lock(), stats)
    }

    pub fn write_stats<W: Write>(&self, mut out: W, stats: &TaskStats) -> anyhow::Result<()> {
        writeln!(
            out,
            "Total: {}  Completed: {}  Pending: {}  Overdue: {}",
            stats.total, stats.completed, stats.pending, stats.overdue
        )?;
        if stats.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        writeln!(out, "By status")?;
        for (label, count, code) in [
            ("Completed", stats.completed, "32"),
            ("Pending", stats.pending, "33"),
            ("Overdue", stats.overdue, "31"),
        ] {
            self.write_bar(&mut out, label, count, stats, code)?;
        }

        writeln!(out)?;
        writeln!(out, "By category")?;
        let unlisted = stats
            .by_category
            .keys()
            .filter(|category| category.is_unknown())
            .cloned();
        for category in Category::ALL.into_iter().chain(unlisted) {
            let count = stats.by_category.get(&category).copied().unwrap_or(0);
            self.write_bar(&mut out, category.as_str(), count, stats, "36")?;
        }
        Ok(())
    }

    fn write_bar<W: Write>(
        &self,
        out: &mut W,
        label: &str,
        count: usize,
        stats: &TaskStats,
        code: &str,
    ) -> anyhow::Result<()> {
        let filled = (count * BAR_WIDTH).div_ceil(stats.total.max(1));
        let bar = self.paint(&"#".repeat(filled), code);
        let padding = " ".repeat(BAR_WIDTH - filled.min(BAR_WIDTH));
        writeln!(
            out,
            "  {label:<10} {bar}{padding} {count:>4} ({:>3}%)",
            stats.percent(count)
        )?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let padding = width.saturating_sub(visible_width(cell));
                format!("{cell}{}", " ".repeat(padding))
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    };

    writeln!(
        writer,
        "{}",
        line(headers.iter().map(|h| h.to_string()).collect())
    )?;
    writeln!(
        writer,
        "{}",
        line(widths.iter().map(|w| "-".repeat(*w)).collect())
    )?;
    for row in rows {
        writeln!(writer, "{}", line(row))?;
    }

    Ok(())
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        match (escaped, ch) {
            (true, 'm') => escaped = false,
            (true, _) => {}
            (false, '\x1b') => escaped = true,
            (false, _) => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Renderer, strip_ansi};
    use crate::stats::TaskStats;
    use crate::task::{Category, Task};
    use crate::view::ViewStatus;

    fn render_to_string(write: impl FnOnce(&mut Vec<u8>)) -> String {
        let mut buf = Vec::new();
        write(&mut buf);
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }

    #[test]
    fn table_columns_line_up() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).single().expect("date");
        let mut task = Task::draft("Buy milk", now);
        task.id = "0123456789abcdef".to_string();
        task.category = Category::Shopping;

        let out = render_to_string(|buf| {
            Renderer::plain()
                .write_task_table(buf, &[task], now)
                .expect("render");
        });
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID       Done Pri"));
        assert!(lines[2].starts_with("01234567 [ ]  MED"));
        assert!(lines[2].ends_with("Buy milk"));
        assert!(lines[2].contains("Shopping"));
    }

    #[test]
    fn stats_show_percentages() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).single().expect("date");
        let mut done = Task::draft("done", now);
        done.is_completed = true;
        let open = Task::draft("open", now);
        let stats = TaskStats::compute(&[done, open], now);

        let out = render_to_string(|buf| {
            Renderer::plain().write_stats(buf, &stats).expect("render");
        });
        assert!(out.starts_with("Total: 2  Completed: 1  Pending: 1  Overdue: 0"));
        assert!(out.contains("( 50%)"));
        assert!(out.contains("General"));
    }

    #[test]
    fn failed_view_is_returned_not_printed() {
        let renderer = Renderer::plain();
        let err = renderer
            .print_view_status(&ViewStatus::Failed("disk gone".to_string()), "none")
            .expect_err("failed view");
        assert_eq!(err.to_string(), "could not load tasks: disk gone");
        assert!(renderer.print_view_status(&ViewStatus::Ready(2), "none").expect("ready"));
    }
}
