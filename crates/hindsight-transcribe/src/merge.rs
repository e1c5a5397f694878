//! Suffix-prefix overlap deduplication for session transcripts.
//!
//! Consecutive recordings often overlap at the seam (the pre-roll of one
//! recording replays the tail of the previous one), so their transcripts
//! repeat a few words. The merge finds the longest string that is both a
//! suffix of the accumulated transcript and a prefix of the new one and
//! drops it from the new text. Comparison is case-sensitive and
//! whitespace-preserving.

/// Length in bytes of the longest overlap between the end of `previous`
/// and the start of `new`.
pub fn overlap_len(previous: &str, new: &str) -> usize {
    let max = previous.len().min(new.len());
    for len in (1..=max).rev() {
        if !new.is_char_boundary(len) {
            continue;
        }
        if previous.ends_with(&new[..len]) {
            return len;
        }
    }
    0
}

/// The new transcript with the overlapping prefix removed.
pub fn deduplicate<'a>(previous: &str, new: &'a str) -> &'a str {
    &new[overlap_len(previous, new)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overlap_passes_through_verbatim() {
        assert_eq!(deduplicate("the quick brown", "fox jumps"), "fox jumps");
        assert_eq!(deduplicate("", "anything at all"), "anything at all");
    }

    #[test]
    fn full_overlap_yields_empty() {
        // Idempotence: if the new transcript is exactly the suffix of the
        // previous one, nothing new remains.
        assert_eq!(deduplicate("and so it goes", "and so it goes"), "");
        assert_eq!(deduplicate("well, and so it goes", "and so it goes"), "");
    }

    #[test]
    fn partial_overlap_is_trimmed() {
        assert_eq!(
            deduplicate("we will meet on", "meet on tuesday at noon"),
            " tuesday at noon"
        );
    }

    #[test]
    fn longest_overlap_wins() {
        // "aba" overlaps both as "a" and "aba"; the longest is taken.
        assert_eq!(deduplicate("xxaba", "abab"), "b");
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert_eq!(deduplicate("Hello there", "hello there"), "hello there");
    }

    #[test]
    fn whitespace_is_preserved() {
        assert_eq!(deduplicate("ends with ", " starts with"), "starts with");
        assert_eq!(deduplicate("no trailing", " leading space"), " leading space");
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        assert_eq!(deduplicate("schöne grüße", "grüße aus wien"), " aus wien");
        assert_eq!(deduplicate("日本語のテスト", "テストです"), "です");
    }

    #[test]
    fn empty_new_transcript_stays_empty() {
        assert_eq!(deduplicate("whatever came before", ""), "");
    }
}
