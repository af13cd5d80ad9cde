//! Produce a delta stream expressing `target` in terms of `source`.
//!
//! The source is cut into blocks ending at the first newline or at 90
//! bytes, whichever comes first (a trailing newline joins its block), and
//! every block position is indexed in a multimap. The target is scanned
//! with the same blocking: each block picks the best source position by
//! greedy byte-wise extension, short matches fall into a bounded literal
//! buffer, and long matches become copy opcodes.

use std::collections::HashMap;

use super::{emit_copy, emit_insert, write_varint, DeltaError};

/// Matches shorter than this are not worth a copy opcode.
const MIN_MATCH: usize = 4;

/// Block scan limit before the newline heuristic gives up.
const MAX_BLOCK: usize = 90;

/// Largest run a single insert opcode can carry.
const INSERT_MAX: usize = 127;

#[derive(Clone, Copy)]
struct Match {
    offset: usize,
    length: usize,
}

/// Compute a delta that rebuilds `target` from `source`.
///
/// A non-zero `max_size` aborts with `Oversized` once the stream outgrows
/// it. The result always satisfies
/// `apply_delta(source, &build_delta(source, target, 0)?) == target`.
pub fn build_delta(source: &[u8], target: &[u8], max_size: usize) -> Result<Vec<u8>, DeltaError> {
    let mut out = write_varint(source.len() as u64);
    out.extend_from_slice(&write_varint(target.len() as u64));

    let blocks = index_blocks(source);

    let mut insert_buf = [0u8; INSERT_MAX];
    let mut buffered = 0usize;
    let mut i = 0usize;

    while i < target.len() {
        let block = slice_block(target, i);
        let matched = blocks
            .get(block)
            .and_then(|positions| choose_match(source, positions, target, i));

        match matched {
            Some(m) if m.length >= MIN_MATCH => {
                if buffered > 0 {
                    emit_insert(&mut out, &insert_buf[..buffered]);
                    buffered = 0;
                }
                let mut offset = m.offset;
                let mut remaining = m.length;
                while remaining > 0 {
                    let chunk = remaining.min(0x10000);
                    emit_copy(&mut out, offset, chunk);
                    offset += chunk;
                    remaining -= chunk;
                }
                i += m.length;
            }
            _ => {
                if buffered + block.len() > INSERT_MAX {
                    emit_insert(&mut out, &insert_buf[..buffered]);
                    buffered = 0;
                }
                insert_buf[buffered..buffered + block.len()].copy_from_slice(block);
                buffered += block.len();
                i += block.len();
            }
        }

        if max_size > 0 && out.len() > max_size {
            return Err(DeltaError::Oversized);
        }
    }

    if buffered > 0 {
        emit_insert(&mut out, &insert_buf[..buffered]);
    }
    if max_size > 0 && out.len() > max_size {
        return Err(DeltaError::Oversized);
    }
    Ok(out)
}

/// A block runs to the next newline or 90 bytes; a newline at the boundary
/// joins the block.
fn slice_block(buffer: &[u8], pos: usize) -> &[u8] {
    let mut j = pos;
    while j < buffer.len() && buffer[j] != b'\n' && j - pos < MAX_BLOCK {
        j += 1;
    }
    if j < buffer.len() && buffer[j] == b'\n' {
        j += 1;
    }
    &buffer[pos..j]
}

/// Index every block of `source` by content, keeping all positions.
fn index_blocks(source: &[u8]) -> HashMap<&[u8], Vec<usize>> {
    let mut map: HashMap<&[u8], Vec<usize>> = HashMap::new();
    let mut i = 0;
    while i < source.len() {
        let block = slice_block(source, i);
        map.entry(block).or_default().push(i);
        i += block.len();
    }
    map
}

/// Score candidate source positions by greedy extension from `target_pos`.
///
/// Candidates inside the current best match are skipped, ties keep the
/// earliest offset, and the search stops early once a match is longer than
/// a fifth of the source.
fn choose_match(
    source: &[u8],
    positions: &[usize],
    target: &[u8],
    target_pos: usize,
) -> Option<Match> {
    let limit = source.len() / 5;
    let mut best: Option<Match> = None;

    for &start in positions {
        if let Some(b) = best {
            if start < b.offset + b.length {
                continue;
            }
        }
        let mut spos = start;
        let mut tpos = target_pos;
        while tpos < target.len() && spos < source.len() && source[spos] == target[tpos] {
            spos += 1;
            tpos += 1;
        }
        let length = spos - start;
        match best {
            None => best = Some(Match { offset: start, length }),
            Some(b) if b.length < length => best = Some(Match { offset: start, length }),
            _ => {}
        }
        if best.is_some_and(|b| b.length > limit) {
            break;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::apply_delta;

    fn roundtrip(source: &[u8], target: &[u8]) {
        let delta = build_delta(source, target, 0).unwrap();
        assert_eq!(apply_delta(source, &delta).unwrap(), target);
    }

    #[test]
    fn identical() {
        let data = b"line one\nline two\nline three\n";
        roundtrip(data, data);
        // The delta should be pure copies: far shorter than the target.
        let delta = build_delta(data, data, 0).unwrap();
        assert!(delta.len() < data.len());
    }

    #[test]
    fn disjoint() {
        roundtrip(b"AAAA\nBBBB\n", b"CCCC\nDDDD\n");
    }

    #[test]
    fn empty_cases() {
        roundtrip(b"", b"fresh content\n");
        roundtrip(b"old content\n", b"");
        roundtrip(b"", b"");
    }

    #[test]
    fn line_edits() {
        let source = b"fn main() {\n    println!(\"hello\");\n}\n";
        let target = b"fn main() {\n    println!(\"goodbye\");\n    return;\n}\n";
        roundtrip(source, target);
    }

    #[test]
    fn long_lines_are_chunked_at_90() {
        let source: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8).filter(|&b| b != b'\n').collect();
        let mut target = source.clone();
        target.extend_from_slice(b"tail");
        roundtrip(&source, &target);
    }

    #[test]
    fn repeated_blocks_pick_a_consistent_source() {
        let source = b"dup\ndup\ndup\nunique\n";
        let target = b"unique\ndup\ndup\n";
        roundtrip(source, target);
    }

    #[test]
    fn insert_buffer_flushes_across_127_bytes() {
        // All-miss target far longer than one insert opcode can carry.
        let source = b"nothing in common here\n";
        let target: Vec<u8> = (0..1000u32).map(|i| b'a' + (i % 23) as u8).collect();
        roundtrip(source, &target);
    }

    #[test]
    fn size_cap_aborts() {
        let source = b"short\n";
        let target: Vec<u8> = (0..10_000u32).map(|i| (i % 7) as u8 + b'0').collect();
        assert_eq!(
            build_delta(source, &target, 16).unwrap_err(),
            DeltaError::Oversized
        );
    }

    #[test]
    fn block_slicing() {
        assert_eq!(slice_block(b"abc\ndef", 0), b"abc\n");
        assert_eq!(slice_block(b"abc\ndef", 4), b"def");
        let long = [b'x'; 200];
        assert_eq!(slice_block(&long, 0).len(), 90);
        assert_eq!(slice_block(b"\n\n", 0), b"\n");
    }
}
