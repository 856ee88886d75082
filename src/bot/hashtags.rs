//! Hashtag entity spans for channel captions.

use teloxide::types::{MessageEntity, MessageEntityKind};

/// Characters that end a hashtag.
const BREAK_CHARS: &[char] = &[
    ' ', '/', '\\', '[', ']', '~', '!', '@', '$', '%', '^', '&', '*', '(', ')', '=', '|', ':', ';',
    ',', '"', '\'',
];

/// A hashtag span, in UTF-16 code units as Telegram counts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSpan {
    /// Offset of the `#`
    pub offset: usize,
    /// Span length, always positive
    pub length: usize,
}

impl From<TagSpan> for MessageEntity {
    fn from(span: TagSpan) -> Self {
        Self {
            kind: MessageEntityKind::Hashtag,
            offset: span.offset,
            length: span.length,
        }
    }
}

/// Find the hashtag spans in a caption.
///
/// A `#` opens a span and closes any span already open; a break character
/// closes the open span. A span still open at the end of the text is only
/// emitted when it does not start at offset 0, so a caption that is a single
/// bare tag gets no entity. Only `#` starts a span: text following a break
/// character is never emitted on its own.
///
/// # Examples
///
/// ```
/// use forwarder::bot::hashtags::split_tags;
///
/// let spans = split_tags("Look #cat here");
/// assert_eq!(spans.len(), 1);
/// assert_eq!((spans[0].offset, spans[0].length), (5, 4));
/// ```
#[must_use]
pub fn split_tags(text: &str) -> Vec<TagSpan> {
    let mut spans = Vec::new();
    let mut open: Option<usize> = None;
    let mut pos = 0;

    for c in text.chars() {
        if c == '#' {
            if let Some(start) = open {
                push_span(&mut spans, start, pos);
            }
            open = Some(pos);
        } else if BREAK_CHARS.contains(&c) {
            if let Some(start) = open.take() {
                push_span(&mut spans, start, pos);
            }
        }
        pos += c.len_utf16();
    }

    if let Some(start) = open.filter(|&s| s > 0) {
        push_span(&mut spans, start, pos);
    }
    spans
}

fn push_span(spans: &mut Vec<TagSpan>, start: usize, end: usize) {
    if end > start {
        spans.push(TagSpan {
            offset: start,
            length: end - start,
        });
    }
}

/// Convert spans into caption entities.
#[must_use]
pub fn to_entities(spans: &[TagSpan]) -> Vec<MessageEntity> {
    spans.iter().copied().map(MessageEntity::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(text: &str) -> Vec<(usize, usize)> {
        split_tags(text)
            .into_iter()
            .map(|s| (s.offset, s.length))
            .collect()
    }

    #[test]
    fn test_single_tag_mid_caption() {
        assert_eq!(pairs("Look #cat here"), vec![(5, 4)]);
    }

    #[test]
    fn test_trailing_tag() {
        assert_eq!(pairs("Look #cat"), vec![(5, 4)]);
    }

    #[test]
    fn test_adjacent_tags() {
        assert_eq!(pairs("x #a#b"), vec![(2, 2), (4, 2)]);
    }

    #[test]
    fn test_break_characters_close() {
        assert_eq!(pairs("#cat, #dog/#fox."), vec![(0, 4), (6, 4), (11, 5)]);
    }

    #[test]
    fn test_text_after_break_is_not_a_tag() {
        assert_eq!(pairs("a,b #c"), vec![(4, 2)]);
        assert_eq!(pairs("#cat; and more"), vec![(0, 4)]);
    }

    #[test]
    fn test_no_tags() {
        assert!(split_tags("just words, nothing else").is_empty());
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn test_leading_trailing_tag_is_dropped() {
        // Known boundary case: an unterminated tag at offset 0 is not emitted.
        assert!(split_tags("#cat").is_empty());
        assert_eq!(pairs("#cat "), vec![(0, 4)]);
    }

    #[test]
    fn test_offsets_count_utf16_units() {
        // '😀' is two UTF-16 units.
        assert_eq!(pairs("😀 #cat"), vec![(3, 4)]);
    }

    #[test]
    fn test_entity_conversion() {
        let entities = to_entities(&split_tags("Look #cat here"));
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind, MessageEntityKind::Hashtag);
        assert_eq!(entities[0].offset, 5);
        assert_eq!(entities[0].length, 4);
    }
}
