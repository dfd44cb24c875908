//! Utility functions and helpers.

pub mod http;
pub mod logfile;

use unicode_segmentation::UnicodeSegmentation;

/// Shorten `text` to at most `max` graphemes for log output.
pub fn preview(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut graphemes = single_line.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
