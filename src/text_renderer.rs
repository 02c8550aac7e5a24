use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};

const FALLBACK_ADVANCE: f32 = 0.6;
const FALLBACK_LINE_HEIGHT: f32 = 1.2;

/// Text broken into lines that fit a maximum width.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextLayout {
    pub lines: Vec<String>,
    pub line_height: f32,
    pub width: f32,
    pub height: f32,
}

pub fn line_height(font: Option<&FontArc>, px: f32) -> f32 {
    match font {
        Some(font) => {
            let scaled = font.as_scaled(PxScale::from(px));
            scaled.height() + scaled.line_gap()
        }
        None => px * FALLBACK_LINE_HEIGHT,
    }
}

pub fn measure_line(font: Option<&FontArc>, text: &str, px: f32) -> f32 {
    let Some(font) = font else {
        return text.chars().count() as f32 * px * FALLBACK_ADVANCE;
    };

    let scaled = font.as_scaled(PxScale::from(px));
    let mut pen_x = 0.0;
    let mut prev_gid: Option<ab_glyph::GlyphId> = None;
    for ch in text.chars() {
        let gid = font.glyph_id(ch);
        if let Some(prev) = prev_gid {
            pen_x += scaled.kern(prev, gid);
        }
        pen_x += scaled.h_advance(gid);
        prev_gid = Some(gid);
    }
    pen_x
}

/// Greedy word wrap. Words wider than `max_width` are split by character.
pub fn layout_text(font: Option<&FontArc>, text: &str, px: f32, max_width: f32) -> TextLayout {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if measure_line(font, &candidate, px) <= max_width || current.is_empty() && word.is_empty() {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            for ch in word.chars() {
                let mut next = current.clone();
                next.push(ch);
                if measure_line(font, &next, px) > max_width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current.push(ch);
                } else {
                    current = next;
                }
            }
        }
        lines.push(current);
    }

    let line_height = line_height(font, px);
    let width = lines
        .iter()
        .map(|line| measure_line(font, line, px))
        .fold(0.0, f32::max);
    let height = line_height * lines.len() as f32;
    TextLayout {
        lines,
        line_height,
        width,
        height,
    }
}

/// Reports every pixel a line of text covers, with binary coverage.
pub fn rasterize_line(
    font: &FontArc,
    text: &str,
    origin: [f32; 2],
    px: f32,
    mut put: impl FnMut(i64, i64),
) {
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);
    let baseline = origin[1] + scaled.ascent();
    let mut pen_x = origin[0];
    let mut prev_gid: Option<ab_glyph::GlyphId> = None;

    for ch in text.chars() {
        let gid = font.glyph_id(ch);

        if let Some(prev) = prev_gid {
            pen_x += scaled.kern(prev, gid);
        }

        let glyph = gid.with_scale_and_position(scale, point(pen_x, baseline));
        if let Some(outline) = font.outline_glyph(glyph) {
            let bounds = outline.px_bounds();
            outline.draw(|x, y, coverage| {
                if coverage >= 0.5 {
                    put(bounds.min.x as i64 + x as i64, bounds.min.y as i64 + y as i64);
                }
            });
        }

        pen_x += scaled.h_advance(gid);
        prev_gid = Some(gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_metrics() {
        assert!((measure_line(None, "abcd", 10.0) - 24.0).abs() < 0.001);
        assert!((line_height(None, 10.0) - 12.0).abs() < 0.001);
    }

    #[test]
    fn test_wraps_on_words() {
        // 6px per glyph at 10px.
        let layout = layout_text(None, "hello big world", 10.0, 60.0);
        assert_eq!(layout.lines, vec!["hello big", "world"]);
        assert!((layout.height - 24.0).abs() < 0.001);
        assert!((layout.width - 54.0).abs() < 0.001);
    }

    #[test]
    fn test_splits_long_words_and_keeps_newlines() {
        let layout = layout_text(None, "abcdefghij\nx", 10.0, 30.0);
        assert_eq!(layout.lines, vec!["abcde", "fghij", "x"]);
    }

    #[test]
    fn test_empty_text_has_one_line() {
        let layout = layout_text(None, "", 10.0, 30.0);
        assert_eq!(layout.lines, vec![String::new()]);
        assert_eq!(layout.width, 0.0);
    }
}
