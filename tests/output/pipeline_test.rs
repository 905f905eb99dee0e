//! Decoder, splitter and classifier composed the way the reader uses them.

use runtime_supervisor::events::{Classification, LineClassifier, PatternClassifier};
use runtime_supervisor::output::{LineSplitter, Utf8Decoder};

const TRANSCRIPT: &str =
    "Welcome, adventurer\r\nlevel 4\r\nthe drägon drops loot found\r\nlevel 5\r\nquest complete\r\nbye";

fn classifier() -> PatternClassifier {
    PatternClassifier::new()
        .rule(r"^level (?P<depth>\d+)$", "LEVEL")
        .unwrap()
        .rule("loot found", "LOOT")
        .unwrap()
        .rule("quest complete", "QUEST")
        .unwrap()
}

/// Feed `bytes` split at `cuts` and collect every classification.
fn classify_chunks(bytes: &[u8], cuts: &[usize]) -> Vec<Classification> {
    let classifier = classifier();
    let mut decoder = Utf8Decoder::new();
    let mut splitter = LineSplitter::new();
    let mut events = Vec::new();

    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
        splitter.on_chunk(&decoder.decode(&bytes[start..cut]));
        for line in splitter.drain_lines() {
            events.extend(classifier.classify(&line));
        }
        start = cut;
    }
    splitter.on_chunk(&decoder.finish());
    if let Some(line) = splitter.flush_partial() {
        events.extend(classifier.classify(&line));
    }
    events
}

#[test]
fn classification_is_independent_of_chunk_boundaries() {
    let bytes = TRANSCRIPT.as_bytes();
    let whole = classify_chunks(bytes, &[]);

    let types: Vec<_> = whole.iter().map(|c| c.event_type.as_str()).collect();
    assert_eq!(types, ["LEVEL", "LOOT", "LEVEL", "QUEST"]);
    assert_eq!(whole[0].payload["depth"], 4);
    assert_eq!(whole[2].payload["depth"], 5);

    for cut in 0..=bytes.len() {
        assert_eq!(classify_chunks(bytes, &[cut]), whole, "single cut at {cut}");
    }
    for a in (0..bytes.len()).step_by(3) {
        for b in a..=bytes.len() {
            assert_eq!(classify_chunks(bytes, &[a, b]), whole, "cuts at {a} and {b}");
        }
    }
}

#[test]
fn byte_at_a_time_matches_whole_read() {
    let bytes = TRANSCRIPT.as_bytes();
    let cuts: Vec<usize> = (1..bytes.len()).collect();
    assert_eq!(classify_chunks(bytes, &cuts), classify_chunks(bytes, &[]));
}

#[test]
fn invalid_bytes_do_not_lose_lines() {
    let mut bytes = b"level 2\r\n".to_vec();
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(b" junk\r\nquest complete\r\n");

    let events = classify_chunks(&bytes, &[10]);
    let types: Vec<_> = events.iter().map(|c| c.event_type.as_str()).collect();
    assert_eq!(types, ["LEVEL", "QUEST"]);
}
