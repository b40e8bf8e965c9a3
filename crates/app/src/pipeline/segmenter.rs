//! Pure sentence segmentation over an append-only text buffer.
//!
//! Callers append LLM deltas to a buffer, call [`segment`], enqueue the
//! returned sentences for TTS, and replace the buffer with the residual.

/// Minimum number of non-whitespace characters a sentence must have to be
/// synthesized; shorter fragments are almost always stray punctuation.
const MIN_VISIBLE_CHARS: usize = 3;

/// Splits `buffer` into complete sentences and a trailing residual.
///
/// A sentence is any maximal prefix ending in `.`, `!`, or `?` followed by
/// whitespace or end-of-buffer. Sentences shorter than three visible
/// (non-whitespace) characters are dropped rather than returned, so a
/// lone "..." or "?" never reaches the TTS Job Runner. Pure and
/// idempotent: calling this twice with the same `buffer` always returns
/// equal results.
pub fn segment(buffer: &str) -> (Vec<String>, String) {
    let chars: Vec<char> = buffer.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = i + 1 == chars.len() || chars[i + 1].is_whitespace();
            if at_boundary {
                let end = i + 1;
                let sentence: String = chars[start..end].iter().collect();
                let trimmed = sentence.trim().to_string();
                if visible_len(&trimmed) >= MIN_VISIBLE_CHARS {
                    sentences.push(trimmed);
                }

                let mut next_start = end;
                while next_start < chars.len() && chars[next_start].is_whitespace() {
                    next_start += 1;
                }
                start = next_start;
                i = next_start;
                continue;
            }
        }
        i += 1;
    }

    let residual: String = chars[start..].iter().collect();
    (sentences, residual)
}

fn visible_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

/// Applies the same minimum-length filter `segment` uses internally to a
/// residual buffer that will never see another terminator (the LLM stream
/// ended). Returns `None` when the trimmed residual is too short to speak.
pub fn force_flush(residual: &str) -> Option<String> {
    let trimmed = residual.trim().to_string();
    if visible_len(&trimmed) >= MIN_VISIBLE_CHARS {
        Some(trimmed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn splits_on_terminator_followed_by_whitespace() {
        let (sentences, residual) = segment("Hoi. Alles goed. Wat kan ik voor je doen?");
        assert_eq!(
            sentences,
            vec!["Hoi.", "Alles goed.", "Wat kan ik voor je doen?"]
        );
        assert_eq!(residual, "");
    }

    #[test]
    fn residual_is_the_incomplete_tail() {
        let (sentences, residual) = segment("Hallo daar. En dan nog");
        assert_eq!(sentences, vec!["Hallo daar."]);
        assert_eq!(residual, "En dan nog");
    }

    #[test]
    fn terminator_at_end_of_buffer_is_a_boundary() {
        let (sentences, residual) = segment("Tot ziens!");
        assert_eq!(sentences, vec!["Tot ziens!"]);
        assert_eq!(residual, "");
    }

    #[test]
    fn terminator_mid_token_is_not_a_boundary() {
        // "3.14" has no whitespace after the '.', so it is not a sentence end.
        let (sentences, residual) = segment("Pi is ongeveer 3.14 vandaag.");
        assert!(sentences.is_empty());
        assert_eq!(residual, "Pi is ongeveer 3.14 vandaag.");
    }

    #[test]
    fn short_fragments_are_dropped() {
        let (sentences, residual) = segment("Ok. Ja. Wat een mooie dag!");
        assert_eq!(sentences, vec!["Wat een mooie dag!"]);
        assert_eq!(residual, "");
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let (sentences, residual) = segment("");
        assert!(sentences.is_empty());
        assert_eq!(residual, "");
    }

    #[test]
    fn incremental_segmentation_matches_segmenting_the_whole_thing_at_once() {
        let full = "Hoi. Alles goed. Wat kan ik voor je doen?";
        let chunks = ["Hoi. Al", "les go", "ed. Wat kan ik voor je do", "en?"];

        let mut buffer = String::new();
        let mut incremental = Vec::new();
        for chunk in chunks {
            buffer.push_str(chunk);
            let (sentences, residual) = segment(&buffer);
            incremental.extend(sentences);
            buffer = residual;
        }

        let (expected, expected_residual) = segment(full);
        assert_eq!(incremental, expected);
        assert_eq!(buffer, expected_residual);
    }

    proptest! {
        #[test]
        fn idempotent_on_any_input(s in ".{0,200}") {
            let first = segment(&s);
            let second = segment(&s);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn returned_sentences_always_meet_the_minimum_length(s in ".{0,200}") {
            let (sentences, _) = segment(&s);
            for sentence in sentences {
                prop_assert!(visible_len(&sentence) >= MIN_VISIBLE_CHARS);
            }
        }
    }
}
