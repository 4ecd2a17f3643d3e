//! Binary delta codec for the xpatch chains.
//!
//! A delta stream is `[varint base_size][varint target_size][ops...]` where
//! each op either copies a range from the base (msb set, flag bits select
//! which offset/size bytes follow) or inserts literal bytes (msb clear,
//! lower 7 bits give the literal length). Ops are planned with a Myers diff
//! over the raw bytes.

use std::io::{Read, Write};

use diffs::Diff;
use diffs::myers;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::errors::PgitError;

const COPY_FLAG: u8 = 1 << 7;
const COPY_OFFSET_BYTES: u8 = 4;
const COPY_SIZE_BYTES: u8 = 3;
const MAX_INSERT_LEN: usize = 0x7f;
const MAX_COPY_LEN: usize = 0xff_ffff;
const VARINT_BITS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Copy,
}

#[derive(Debug, Clone, Copy)]
struct DeltaOp {
    kind: OpKind,
    begin: usize,
    len: usize,
}

/// Collects copy/insert ops from the Myers callback interface.
struct DeltaPlan {
    ops: Vec<DeltaOp>,
}

impl Diff for DeltaPlan {
    type Error = ();

    fn equal(&mut self, old: usize, _new: usize, len: usize) -> Result<(), ()> {
        // Merge adjacent copies; split ranges wider than a copy op can carry.
        if let Some(tail) = self.ops.last_mut() {
            if tail.kind == OpKind::Copy
                && tail.begin + tail.len == old
                && tail.len + len <= MAX_COPY_LEN
            {
                tail.len += len;
                return Ok(());
            }
        }
        let mut begin = old;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(MAX_COPY_LEN);
            self.ops.push(DeltaOp {
                kind: OpKind::Copy,
                begin,
                len: chunk,
            });
            begin += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    fn insert(&mut self, _old: usize, new: usize, len: usize) -> Result<(), ()> {
        if let Some(tail) = self.ops.last_mut() {
            if tail.kind == OpKind::Insert
                && tail.begin + tail.len == new
                && tail.len + len <= MAX_INSERT_LEN
            {
                tail.len += len;
                return Ok(());
            }
        }
        let mut begin = new;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(MAX_INSERT_LEN);
            self.ops.push(DeltaOp {
                kind: OpKind::Insert,
                begin,
                len: chunk,
            });
            begin += chunk;
            remaining -= chunk;
        }
        Ok(())
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= VARINT_BITS;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(stream: &mut impl Read) -> Result<usize, PgitError> {
    let mut value: usize = 0;
    let mut shift: u32 = 0;
    loop {
        let mut byte = [0u8; 1];
        stream
            .read_exact(&mut byte)
            .map_err(|_| PgitError::DeltaCorrupt("truncated varint".into()))?;
        value |= ((byte[0] & 0x7f) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += VARINT_BITS;
        if shift > usize::BITS {
            return Err(PgitError::DeltaCorrupt("varint overflow".into()));
        }
    }
}

/// Encode `target` as a delta against `base`.
pub fn encode(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut plan = DeltaPlan { ops: vec![] };
    // The callback sink never fails, so neither does the planner.
    myers::diff(&mut plan, base, 0, base.len(), target, 0, target.len()).unwrap();

    let mut out = Vec::with_capacity(target.len() / 4 + 16);
    write_varint(&mut out, base.len());
    write_varint(&mut out, target.len());

    for op in &plan.ops {
        match op.kind {
            OpKind::Insert => {
                out.push(op.len as u8);
                out.extend_from_slice(&target[op.begin..op.begin + op.len]);
            }
            OpKind::Copy => {
                let mut instruction = COPY_FLAG;
                let mut fields = Vec::with_capacity(7);
                let mut offset = op.begin;
                for bit in 0..COPY_OFFSET_BYTES {
                    let byte = (offset & 0xff) as u8;
                    if byte != 0 {
                        instruction |= 1 << bit;
                        fields.push(byte);
                    }
                    offset >>= 8;
                }
                let mut size = op.len;
                for bit in COPY_OFFSET_BYTES..COPY_OFFSET_BYTES + COPY_SIZE_BYTES {
                    let byte = (size & 0xff) as u8;
                    if byte != 0 {
                        instruction |= 1 << bit;
                        fields.push(byte);
                    }
                    size >>= 8;
                }
                out.push(instruction);
                out.extend_from_slice(&fields);
            }
        }
    }
    out
}

/// Apply a delta stream to `base`, returning the reconstructed target.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PgitError> {
    let mut stream = delta;
    let base_size = read_varint(&mut stream)?;
    if base.len() != base_size {
        return Err(PgitError::DeltaCorrupt(format!(
            "base length {} does not match declared {base_size}",
            base.len()
        )));
    }
    let target_size = read_varint(&mut stream)?;

    let mut out = Vec::with_capacity(target_size);
    loop {
        let mut byte = [0u8; 1];
        match stream.read_exact(&mut byte) {
            Ok(()) => {}
            Err(_) => break,
        }
        let instruction = byte[0];
        if instruction & COPY_FLAG == 0 {
            if instruction == 0 {
                return Err(PgitError::DeltaCorrupt("zero-length insert op".into()));
            }
            let len = instruction as usize;
            let mut data = vec![0u8; len];
            stream
                .read_exact(&mut data)
                .map_err(|_| PgitError::DeltaCorrupt("truncated insert op".into()))?;
            out.extend_from_slice(&data);
        } else {
            let mut offset: usize = 0;
            for bit in 0..COPY_OFFSET_BYTES {
                if instruction & (1 << bit) != 0 {
                    let mut b = [0u8; 1];
                    stream
                        .read_exact(&mut b)
                        .map_err(|_| PgitError::DeltaCorrupt("truncated copy offset".into()))?;
                    offset |= (b[0] as usize) << (8 * bit as usize);
                }
            }
            let mut size: usize = 0;
            for bit in COPY_OFFSET_BYTES..COPY_OFFSET_BYTES + COPY_SIZE_BYTES {
                if instruction & (1 << bit) != 0 {
                    let mut b = [0u8; 1];
                    stream
                        .read_exact(&mut b)
                        .map_err(|_| PgitError::DeltaCorrupt("truncated copy size".into()))?;
                    size |= (b[0] as usize) << (8 * (bit - COPY_OFFSET_BYTES) as usize);
                }
            }
            if size == 0 {
                return Err(PgitError::DeltaCorrupt("zero-length copy op".into()));
            }
            let range = base
                .get(offset..offset + size)
                .ok_or_else(|| PgitError::DeltaCorrupt("copy op out of base bounds".into()))?;
            out.extend_from_slice(range);
        }
    }

    if out.len() != target_size {
        return Err(PgitError::DeltaCorrupt(format!(
            "reconstructed {} bytes, declared {target_size}",
            out.len()
        )));
    }
    Ok(out)
}

/// Zlib-compress a payload before it lands in a chain row.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, PgitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PgitError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PgitError::DeltaCorrupt(format!("zlib inflate failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    /// Delta encode + apply should round-trip to the target buffer.
    #[test]
    fn test_round_trip_matches_target() {
        let base = b"hello world, this line stays\nand this one changes\n";
        let target = b"hello world, this line stays\nand this one CHANGED\nplus a new line\n";
        let delta = encode(base, target);
        let rebuilt = apply(base, &delta).unwrap();
        assert_eq!(rebuilt, target);
    }

    #[test]
    fn test_empty_base_degenerates_to_inserts() {
        let target = vec![7u8; 1000];
        let delta = encode(&[], &target);
        assert_eq!(apply(&[], &delta).unwrap(), target);
    }

    #[test]
    fn test_empty_target() {
        let base = b"something";
        let delta = encode(base, b"");
        assert_eq!(apply(base, &delta).unwrap(), b"");
    }

    /// Mismatched base length must be rejected before any op is applied.
    #[test]
    fn test_base_size_mismatch_is_an_error() {
        let delta = encode(b"abcde", b"abXYZ");
        let err = apply(b"xx", &delta).unwrap_err();
        assert!(matches!(err, PgitError::DeltaCorrupt(_)));
    }

    #[test]
    fn test_compress_round_trip() {
        let data = b"line line line line line line\n".repeat(64);
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    quickcheck! {
        fn prop_round_trip(base: Vec<u8>, target: Vec<u8>) -> bool {
            let delta = encode(&base, &target);
            apply(&base, &delta).unwrap() == target
        }

        fn prop_compress_round_trip(data: Vec<u8>) -> bool {
            decompress(&compress(&data).unwrap()).unwrap() == data
        }
    }
}
