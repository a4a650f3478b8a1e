use crate::engine::RenderFrame;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

const SHADES: [char; 5] = [' ', '░', '▒', '▓', '█'];

/// Headless waterfall: one text line per shown frame, low frequencies on
/// the left, time running down the terminal.
pub struct ConsoleDisplay {
    rx: Receiver<RenderFrame>,
    update_hz: u32,
    columns: usize,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<RenderFrame>, update_hz: u32, columns: usize) -> Self {
        Self {
            rx,
            update_hz,
            columns: columns.max(8),
        }
    }

    pub fn run(&self) {
        let mut stdout = io::stdout();
        let mut last_shown: Option<u64> = None;
        let mut last_labels: Vec<String> = Vec::new();
        let min_gap_ms = if self.update_hz == 0 { 100 } else { (1000 / self.update_hz).max(1) as u64 };

        for frame in self.rx.iter() {
            if last_shown.is_some_and(|t| frame.timestamp_ms.saturating_sub(t) < min_gap_ms) {
                continue;
            }
            last_shown = Some(frame.timestamp_ms);

            let labels: Vec<String> = frame
                .labels
                .iter()
                .map(|l| format!("{}{}", l.name.text, l.percent.text))
                .collect();
            let note = if labels != last_labels && !labels.is_empty() {
                format!("  ◀ {}", labels.join(", "))
            } else {
                String::new()
            };
            last_labels = labels;

            println!(
                "{:>8.2}s │{}│ {}{}",
                frame.timestamp_ms as f64 / 1000.0,
                waterfall_line(&frame.column, self.columns),
                make_bar(frame.level.min(1.0), 10),
                note
            );
            let _ = stdout.flush();
        }
    }
}

/// Downsample an RGB column (top row first) into `width` shade characters,
/// lowest frequency first. Each cell shows the brightest row it covers.
pub fn waterfall_line(column_rgb: &[u8], width: usize) -> String {
    let rows = column_rgb.len() / 3;
    if rows == 0 || width == 0 {
        return " ".repeat(width);
    }
    (0..width)
        .map(|cell| {
            // cell 0 = bottom of the raster
            let lo = cell * rows / width;
            let hi = ((cell + 1) * rows / width).max(lo + 1).min(rows);
            let peak = (lo..hi)
                .map(|r| {
                    let y = rows - 1 - r;
                    let p = &column_rgb[y * 3..y * 3 + 3];
                    (p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000
                })
                .max()
                .unwrap_or(0);
            SHADES[(peak as usize * SHADES.len() / 256).min(SHADES.len() - 1)]
        })
        .collect()
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = (val * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waterfall_puts_low_rows_left() {
        // 4 rows, top first: only the bottom row is bright
        let col = [0, 0, 0, 0, 0, 0, 0, 0, 0, 255, 255, 255];
        assert_eq!(waterfall_line(&col, 4), "█   ");
        assert_eq!(waterfall_line(&col, 2), "█ ");
    }

    #[test]
    fn test_waterfall_empty_column() {
        assert_eq!(waterfall_line(&[], 3), "   ");
    }

    #[test]
    fn test_make_bar() {
        assert_eq!(make_bar(0.5, 4), "[██░░]");
    }
}
