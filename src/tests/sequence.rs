use crate::sequence::SequenceMatcher;

/// Feeds the whole stream, returns the indices reporting a match
fn matches(pattern: &[u8], stream: &[u8]) -> Vec<usize> {
    let mut matcher = SequenceMatcher::new(pattern);

    stream
        .iter()
        .enumerate()
        .filter_map(|(index, &byte)| matcher.feed(byte).then_some(index))
        .collect()
}

#[test]
fn test_exact_match() {
    assert_eq!(vec![1], matches(b"OK", b"OK"));
}

#[test]
fn test_match_within_noise() {
    assert_eq!(vec![6], matches(b"OK", b"\r\nxxOK\r\n"));
}

#[test]
fn test_no_match() {
    assert!(matches(b"OK", b"ERROR\r\n").is_empty());
}

#[test]
fn test_matches_twice() {
    assert_eq!(vec![1, 3], matches(b"OK", b"OKOK"));
}

#[test]
fn test_single_byte_pattern() {
    assert_eq!(vec![0, 2, 3], matches(b"A", b"AxAA"));
}

#[test]
fn test_restart_with_current_byte() {
    // The second A restarts the match instead of discarding the byte
    assert_eq!(vec![2], matches(b"AB", b"AAB"));
}

#[test]
fn test_overlapping_prefix_missed() {
    // A full suffix automaton would match at index 3, the non-retroactive
    // restart misses it
    assert!(matches(b"AAB", b"AAAB").is_empty());
}

#[test]
fn test_mismatch_resets_cursor() {
    assert_eq!(vec![6], matches(b"CONN", b"COXCONN"));
}

#[test]
fn test_empty_pattern_never_matches() {
    assert!(matches(b"", b"anything").is_empty());
}

#[test]
fn test_reset_discards_prefix() {
    let mut matcher = SequenceMatcher::new(b"OK");

    assert!(!matcher.feed(b'O'));
    matcher.reset();
    assert!(!matcher.feed(b'K'));

    assert!(!matcher.feed(b'O'));
    assert!(matcher.feed(b'K'));
}
