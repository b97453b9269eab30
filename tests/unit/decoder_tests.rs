//! Unit tests for the incremental UTF-8 decoder used by the outbound pump.

use dispatch_agent::relay::pump::Utf8Decoder;

#[test]
fn ascii_passes_through() {
    let mut decoder = Utf8Decoder::default();
    assert_eq!(decoder.decode(b"hello"), "hello");
    assert_eq!(decoder.flush(), "");
}

#[test]
fn split_character_is_held_until_complete() {
    let mut decoder = Utf8Decoder::default();
    let euro = "€".as_bytes();
    assert_eq!(euro.len(), 3);

    assert_eq!(decoder.decode(&[b'a', euro[0]]), "a");
    assert_eq!(decoder.decode(&euro[1..2]), "");
    assert_eq!(decoder.decode(&[euro[2], b'b']), "€b");
}

#[test]
fn invalid_byte_becomes_replacement() {
    let mut decoder = Utf8Decoder::default();
    assert_eq!(decoder.decode(b"x\xffy"), "x\u{fffd}y");
}

#[test]
fn flush_emits_truncated_tail_lossily() {
    let mut decoder = Utf8Decoder::default();
    let snowman = "☃".as_bytes();
    assert_eq!(decoder.decode(&snowman[..2]), "");
    assert_eq!(decoder.flush(), "\u{fffd}");
    assert_eq!(decoder.flush(), "");
}
