use forwarder::bot::hashtags::split_tags;
use proptest::prelude::*;

proptest! {
    /// Spans are ordered, disjoint and never empty for any caption.
    #[test]
    fn spans_are_ordered_and_disjoint(s in "\\PC*") {
        let spans = split_tags(&s);
        for span in &spans {
            prop_assert!(span.length > 0);
        }
        for pair in spans.windows(2) {
            prop_assert!(pair[0].offset + pair[0].length <= pair[1].offset);
        }
    }

    /// Every span starts at a `#` and stays inside the caption.
    #[test]
    fn spans_start_at_hash(s in "[a-z #,!:]{0,40}") {
        let utf16: Vec<u16> = s.encode_utf16().collect();
        for span in split_tags(&s) {
            prop_assert_eq!(utf16[span.offset], u16::from(b'#'));
            prop_assert!(span.offset + span.length <= utf16.len());
        }
    }

    /// Tags separated by spaces each get their own span.
    #[test]
    fn spaced_tags_are_found(words in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
        let caption = format!(
            "x {}",
            words.iter().map(|w| format!("#{w}")).collect::<Vec<_>>().join(" ")
        );
        let spans = split_tags(&caption);
        prop_assert_eq!(spans.len(), words.len());
        for (span, word) in spans.iter().zip(&words) {
            prop_assert_eq!(span.length, word.len() + 1);
        }
    }
}

#[test]
fn test_scenario_caption() {
    let spans = split_tags("Look #cat here");
    assert_eq!(spans.len(), 1);
    assert_eq!((spans[0].offset, spans[0].length), (5, 4));
}

#[test]
fn test_leading_tag_alone_is_dropped() {
    // Known boundary case: an unclosed tag at offset 0 gets no entity.
    assert!(split_tags("#cat").is_empty());
    assert_eq!(split_tags("#cat here").len(), 1);
}
