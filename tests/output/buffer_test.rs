//! Output buffer bounds.

use runtime_supervisor::output::{OutputBuffer, DEFAULT_BUFFER_CHUNKS};

#[test]
fn buffer_never_exceeds_capacity() {
    let buffer = OutputBuffer::new(8);
    for i in 0..100 {
        buffer.on_chunk(&format!("chunk {i};"));
        assert!(buffer.len() <= buffer.capacity());
    }
    assert_eq!(buffer.len(), 8);

    // Oldest chunks were evicted first.
    let all = buffer.snapshot(usize::MAX);
    assert!(all.starts_with("chunk 92;"));
    assert!(all.ends_with("chunk 99;"));
}

#[test]
fn snapshot_counts_characters_not_bytes() {
    let buffer = OutputBuffer::default();
    assert_eq!(buffer.capacity(), DEFAULT_BUFFER_CHUNKS);
    buffer.on_chunk("ünïcödé ");
    buffer.on_chunk("дракон");

    for n in 0..20 {
        let tail = buffer.snapshot(n);
        assert_eq!(tail.chars().count(), n.min(14));
        assert_eq!(buffer.snapshot(n), tail);
    }
    assert_eq!(buffer.snapshot(6), "дракон");
}

#[test]
fn empty_buffer_snapshot_is_empty() {
    let buffer = OutputBuffer::new(4);
    assert!(buffer.is_empty());
    assert_eq!(buffer.snapshot(100), "");

    buffer.on_chunk("x");
    buffer.clear();
    assert!(buffer.is_empty());
}
