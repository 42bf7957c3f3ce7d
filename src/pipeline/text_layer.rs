//! Text-layer tokenizer: pdfium characters → word tokens → reading-order
//! lines.
//!
//! pdfium yields characters in text-flow order (the order the content
//! stream paints them), which for the invoices we care about is reading
//! order. Characters are folded into word tokens on whitespace and on
//! unusually wide horizontal jumps, then the words are line-clustered with
//! the same y-band rule the row grouper uses, so downstream stages see
//! tokens sorted top-to-bottom and left-to-right.
//!
//! Coordinates are flipped here, once: pdfium rects are bottom-left origin,
//! everything downstream is top-left origin, y growing down. The folding
//! itself ([`fold_chars`]) is pure so it can be exercised without a PDF
//! engine in sight.

use crate::model::Token;
use crate::pipeline::rows;
use pdfium_render::prelude::*;

/// Horizontal jump (in multiples of the running char width) that splits a
/// word even without whitespace.
const WORD_GAP_FACTOR: f64 = 1.8;

/// One positioned character, already in top-left-origin coordinates.
#[derive(Debug, Clone, Copy)]
pub struct CharBox {
    pub ch: char,
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    pub font_size: Option<f32>,
}

/// Extract word tokens and the raw text string from one page.
///
/// Never rasterises; produces no confidences. Font sizes are carried when
/// pdfium exposes them, dropped silently otherwise.
pub fn tokenize_page(page: &PdfPage<'_>, page_no: u32, page_height: f64) -> (Vec<Token>, String) {
    let Ok(text) = page.text() else {
        return (Vec::new(), String::new());
    };
    let raw_text = text.all();

    let boxes: Vec<CharBox> = text
        .chars()
        .iter()
        .filter_map(|ch| {
            let unicode = ch.unicode_char()?;
            if unicode.is_whitespace() {
                // Whitespace carries no reliable geometry; a sentinel box is
                // enough to split the word.
                return Some(CharBox {
                    ch: ' ',
                    left: 0.0,
                    right: 0.0,
                    top: 0.0,
                    bottom: 0.0,
                    font_size: None,
                });
            }
            let bounds = ch.loose_bounds().ok()?;
            let size = ch.scaled_font_size().value;
            Some(CharBox {
                ch: unicode,
                left: bounds.left.value as f64,
                right: bounds.right.value as f64,
                top: page_height - bounds.top.value as f64,
                bottom: page_height - bounds.bottom.value as f64,
                font_size: (size > 0.0).then_some(size),
            })
        })
        .collect();

    (fold_chars(boxes.into_iter(), page_no), raw_text)
}

/// Fold a character stream into line-clustered word tokens.
///
/// Words break on whitespace and on horizontal jumps wider than
/// [`WORD_GAP_FACTOR`] running char widths; the resulting words are then
/// sorted into reading order via the shared row clustering.
pub fn fold_chars(chars: impl Iterator<Item = CharBox>, page_no: u32) -> Vec<Token> {
    let mut words: Vec<Token> = Vec::new();
    let mut current = WordAccumulator::new(page_no);

    for cb in chars {
        if cb.ch.is_whitespace() {
            current.flush(&mut words);
            continue;
        }
        // A wide jump from the previous glyph starts a new word even when
        // the content stream never emitted a space.
        if current.should_split(cb.left) {
            current.flush(&mut words);
        }
        current.push(&cb);
    }
    current.flush(&mut words);

    // Reading-order line clustering: reuse the row grouper's y-banding and
    // flatten the rows back into one ordered token stream.
    rows::group_rows(&words)
        .into_iter()
        .flat_map(|row| row.tokens)
        .collect()
}

/// Builds one word token from consecutive characters.
struct WordAccumulator {
    page_no: u32,
    text: String,
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    last_right: f64,
    last_width: f64,
    font_size: Option<f32>,
}

impl WordAccumulator {
    fn new(page_no: u32) -> Self {
        Self {
            page_no,
            text: String::new(),
            x0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y0: f64::INFINITY,
            y1: f64::NEG_INFINITY,
            last_right: f64::NEG_INFINITY,
            last_width: 0.0,
            font_size: None,
        }
    }

    fn should_split(&self, next_left: f64) -> bool {
        if self.text.is_empty() {
            return false;
        }
        let gap = next_left - self.last_right;
        gap > (self.last_width.max(2.0)) * WORD_GAP_FACTOR
    }

    fn push(&mut self, cb: &CharBox) {
        self.text.push(cb.ch);
        self.x0 = self.x0.min(cb.left);
        self.x1 = self.x1.max(cb.right);
        self.y0 = self.y0.min(cb.top);
        self.y1 = self.y1.max(cb.bottom);
        self.last_right = cb.right;
        self.last_width = (cb.right - cb.left).max(0.0);
        if self.font_size.is_none() {
            self.font_size = cb.font_size;
        }
    }

    fn flush(&mut self, words: &mut Vec<Token>) {
        if self.text.trim().is_empty() {
            self.text.clear();
            return;
        }
        words.push(Token {
            text: std::mem::take(&mut self.text),
            x: self.x0,
            y: self.y0,
            w: (self.x1 - self.x0).max(0.0),
            h: (self.y1 - self.y0).max(0.0),
            page_no: self.page_no,
            font_size: self.font_size,
            confidence: None,
        });
        *self = Self::new(self.page_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out a string as fixed-width character boxes on one baseline.
    fn char_boxes(text: &str, x0: f64, y: f64) -> Vec<CharBox> {
        let mut x = x0;
        text.chars()
            .map(|ch| {
                let cb = CharBox {
                    ch,
                    left: x,
                    right: x + 5.0,
                    top: y,
                    bottom: y + 9.0,
                    font_size: Some(9.0),
                };
                x += 5.0;
                cb
            })
            .collect()
    }

    #[test]
    fn whitespace_splits_words() {
        let tokens = fold_chars(char_boxes("Att betala", 40.0, 100.0).into_iter(), 1);
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Att", "betala"]);
        assert_eq!(tokens[0].page_no, 1);
        assert_eq!(tokens[0].font_size, Some(9.0));
    }

    #[test]
    fn wide_gap_splits_without_whitespace() {
        // Two runs with a 60 pt jump and no space character between them —
        // common for right-aligned amount columns.
        let mut boxes = char_boxes("Summa", 40.0, 100.0);
        boxes.extend(char_boxes("400,00", 300.0, 100.0));
        let tokens = fold_chars(boxes.into_iter(), 1);
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Summa", "400,00"]);
        assert!(tokens[1].x >= 300.0);
    }

    #[test]
    fn word_bbox_covers_its_chars() {
        let tokens = fold_chars(char_boxes("Faktura", 40.0, 100.0).into_iter(), 1);
        assert_eq!(tokens.len(), 1);
        let t = &tokens[0];
        assert_eq!(t.x, 40.0);
        assert_eq!(t.w, 35.0);
        assert_eq!(t.y, 100.0);
        assert_eq!(t.h, 9.0);
    }

    #[test]
    fn lines_come_out_top_to_bottom() {
        let mut boxes = char_boxes("nedre", 40.0, 200.0);
        boxes.push(CharBox {
            ch: ' ',
            left: 0.0,
            right: 0.0,
            top: 0.0,
            bottom: 0.0,
            font_size: None,
        });
        boxes.extend(char_boxes("övre", 40.0, 100.0));
        let tokens = fold_chars(boxes.into_iter(), 1);
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["övre", "nedre"]);
    }

    #[test]
    fn every_non_whitespace_char_lands_in_a_token() {
        let source = "Fakturanummer: 1234567 Att betala 1 072,60";
        let boxes = char_boxes(source, 40.0, 100.0);
        let tokens = fold_chars(boxes.into_iter(), 1);
        let rebuilt: String = tokens.iter().map(|t| t.text.as_str()).collect();
        let expected: String = source.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        assert!(fold_chars(std::iter::empty(), 1).is_empty());
    }
}
