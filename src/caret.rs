//! Caret geometry for moving focus across outline rows.
//!
//! A node renders as a variable-height text block; arrow navigation only
//! leaves the block when the caret already sits on its first (going up) or
//! last (going down) visual line, and the landing column is compensated for
//! the indentation difference between the two rows.
//!
//! All measurement goes through [`TextMeasurer`] so the math runs headless;
//! a rendering layer backs the trait with real layout queries. Offsets and
//! ranges are in characters. By convention the measured text is the block
//! as rendered, which carries one trailing newline (an empty node renders
//! as just `"\n"`).

use crate::outline::Direction;

/// Horizontal indent applied per tree level, in pixels.
pub const LEVEL_INDENT_PX: f32 = 16.0;

/// Layout oracle for one rendered text block.
pub trait TextMeasurer {
    /// Height of the rendered box spanning the first `end` characters.
    fn prefix_height(&self, text: &str, end: usize) -> f32;

    /// Width of `text` laid out on a single line.
    fn text_width(&self, text: &str) -> f32;
}

/// One visual line of a rendered block: its character range within the
/// block and the text it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLine {
    pub range: (usize, usize),
    pub text: String,
}

/// Where a caret sits within its block, as far as navigation cares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaretPosition {
    pub at_first_line: bool,
    pub at_last_line: bool,
    pub left: f32,
}

impl CaretPosition {
    /// Whether a vertical arrow press should leave this node.
    pub fn at_edge(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.at_first_line,
            Direction::Down => self.at_last_line,
        }
    }
}

/// Split a rendered block into visual lines by growing a prefix range one
/// character at a time and watching for height increases. Linear in the
/// text length; a single-line block yields one line spanning everything up
/// to the trailing newline.
pub fn content_lines(measurer: &dyn TextMeasurer, text: &str) -> Vec<ContentLine> {
    if text.is_empty() {
        return Vec::new();
    }
    if text == "\n" {
        return vec![ContentLine { range: (0, 0), text: text.to_string() }];
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut lines = Vec::new();
    let mut line_start = 0usize;
    let mut prev_height = measurer.prefix_height(text, 1);

    for index in 0..len {
        let height = measurer.prefix_height(text, index);

        if (height > prev_height && index > 0) || index == len - 1 {
            // The character before `index` opened the new line; close the
            // finished one without it. At the end of the text the block's
            // trailing newline is what gets excluded. When a height
            // increase coincides with the last index the end branch wins
            // and the final wrapped character stays merged into the
            // previous line; pinned by
            // test_wrap_at_final_character_merges_into_previous_line.
            let line_end = if index != len - 1 { index - 1 } else { index };
            let line_text: String = chars[line_start..line_end].iter().collect();
            lines.push(ContentLine { range: (line_start, line_end), text: line_text });

            line_start = index - 1;
            prev_height = height;
        }
    }

    lines
}

/// Describe the caret at character `offset` within a rendered block.
pub fn caret_position(measurer: &dyn TextMeasurer, text: &str, offset: usize) -> CaretPosition {
    let lines = content_lines(measurer, text);

    let (Some(first), Some(last)) = (lines.first(), lines.last()) else {
        return CaretPosition { at_first_line: true, at_last_line: true, left: 0.0 };
    };

    let left = lines
        .iter()
        .find(|line| line.range.0 <= offset && offset <= line.range.1)
        .map(|line| {
            let prefix: String = line.text.chars().take(offset - line.range.0).collect();
            measurer.text_width(&prefix)
        })
        .unwrap_or(0.0);

    if lines.len() == 1 {
        return CaretPosition { at_first_line: true, at_last_line: true, left };
    }

    CaretPosition {
        at_first_line: first.range.0 <= offset && offset < first.range.1,
        at_last_line: last.range.0 < offset && offset <= last.range.1,
        left,
    }
}

/// Character index within `line_text` whose rendered column is closest to
/// `left`. Walks prefix widths and keeps the best candidate; a column past
/// the end of the line lands after its last character.
pub fn caret_index_at_left(measurer: &dyn TextMeasurer, line_text: &str, left: f32) -> usize {
    let chars: Vec<char> = line_text.chars().collect();

    let mut text_index = 0usize;
    let mut best_offset = left;

    for index in 0..chars.len() {
        let prefix: String = chars[..index].iter().collect();
        let offset = (left - measurer.text_width(&prefix)).abs();

        if offset > best_offset {
            break;
        }

        text_index = index;
        best_offset = offset;

        if index == chars.len() - 1 {
            text_index += 1;
        }
    }

    text_index
}

/// Caret index to land on when entering a block from above (`Down`: first
/// line) or below (`Up`: last line) at visual column `left`. `None` when
/// the target block has no line to land on.
pub fn landing_index(
    measurer: &dyn TextMeasurer,
    text: &str,
    left: f32,
    direction: Direction,
) -> Option<usize> {
    let lines = content_lines(measurer, text);

    let line = match direction {
        Direction::Down => lines.first(),
        Direction::Up => lines.last(),
    }?;
    if line.range == (0, 0) {
        return None;
    }

    let mut index = caret_index_at_left(measurer, &line.text, left);
    if direction == Direction::Up {
        index += line.range.0;
    }
    Some(index)
}

/// Re-express a caret column when jumping between rows of different depth,
/// so the caret stays visually aligned rather than character-aligned.
pub fn aligned_left(left: f32, from_depth: usize, to_depth: usize) -> f32 {
    let delta = (from_depth as f32 - to_depth as f32) * LEVEL_INDENT_PX;
    (left + delta).max(0.0)
}

/// Caret placement request handed to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusTarget {
    /// Place the caret at a character index (clamped to the content end).
    Index(usize),
    /// Land from an adjacent row: resolve the index from the stored visual
    /// column, compensated for the depth difference.
    Position {
        position: CaretPosition,
        direction: Direction,
        from_depth: usize,
    },
}

/// Imperative focus surface implemented by the rendering layer. Called
/// after structural edits, typically on the next frame so the target row
/// exists before the caret moves.
pub trait FocusHost {
    fn focus(&mut self, node_id: &str, target: FocusTarget);
    fn scroll_into_view(&mut self, node_id: &str);
}
