//! Order-preserving binary encodings.
//!
//! Every function here maps values to byte strings whose lexicographic order
//! matches the natural order of the source values: if vA < vB then
//! encode(vA) < encode(vB). This property is what makes ordered key-value
//! iteration equal ordered value iteration for keys and index entries.

use crate::error::{Error, Result};
use crate::types::value::Value;

/// The default base64 alphabet does not preserve lexicographic order. This
/// alternative alphabet is monotone in the 6-bit input value.
const BASE64_ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Appends the binary representation of a bool.
pub fn append_bool(buf: &mut Vec<u8>, x: bool) {
    buf.push(if x { 255 } else { 254 });
}

/// Decodes a buffer into a bool.
pub fn decode_bool(buf: &[u8]) -> Result<bool> {
    match buf.first() {
        Some(b) => Ok(*b == 255),
        None => Err(Error::Decode("bool")),
    }
}

/// Appends the big-endian representation of a u64.
pub fn append_u64(buf: &mut Vec<u8>, x: u64) {
    buf.extend_from_slice(&x.to_be_bytes());
}

/// Decodes a buffer into a u64.
pub fn decode_u64(buf: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = buf
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::Decode("u64"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Appends an i64, biased so that the encoding of negative values sorts
/// before the encoding of positive ones.
pub fn append_i64(buf: &mut Vec<u8>, x: i64) {
    append_u64(buf, (x as u64).wrapping_add(1 << 63));
}

/// Decodes a buffer into an i64, reversing the bias.
pub fn decode_i64(buf: &[u8]) -> Result<i64> {
    let x = decode_u64(buf).map_err(|_| Error::Decode("i64"))?;
    Ok(x.wrapping_sub(1 << 63) as i64)
}

/// Appends an f64. Non-negative values get their sign bit flipped, negative
/// values get all bits flipped, which yields the IEEE-754 ordering under
/// byte-wise comparison. NaN payloads are carried through unchanged:
/// positive-sign NaNs sort after +inf, negative-sign NaNs before -inf.
pub fn append_f64(buf: &mut Vec<u8>, x: f64) {
    let mut bits = x.to_bits();
    if bits & (1 << 63) == 0 {
        bits ^= 1 << 63;
    } else {
        bits = !bits;
    }
    append_u64(buf, bits);
}

/// Decodes a buffer into an f64.
pub fn decode_f64(buf: &[u8]) -> Result<f64> {
    let mut bits = decode_u64(buf).map_err(|_| Error::Decode("f64"))?;
    if bits & (1 << 63) != 0 {
        bits ^= 1 << 63;
    } else {
        bits = !bits;
    }
    Ok(f64::from_bits(bits))
}

/// Appends data encoded with the order-preserving base64 alphabet, without
/// padding.
pub fn append_base64(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let group = (b0 << 16) | (b1 << 8) | b2;

        buf.push(BASE64_ALPHABET[(group >> 18) as usize & 0x3f]);
        buf.push(BASE64_ALPHABET[(group >> 12) as usize & 0x3f]);
        if chunk.len() > 1 {
            buf.push(BASE64_ALPHABET[(group >> 6) as usize & 0x3f]);
        }
        if chunk.len() > 2 {
            buf.push(BASE64_ALPHABET[group as usize & 0x3f]);
        }
    }
}

/// Decodes a buffer encoded with [`append_base64`].
pub fn decode_base64(src: &[u8]) -> Result<Vec<u8>> {
    if src.len() % 4 == 1 {
        return Err(Error::Decode("base64"));
    }

    let mut reverse = [0xffu8; 256];
    for (i, b) in BASE64_ALPHABET.iter().enumerate() {
        reverse[*b as usize] = i as u8;
    }

    let mut out = Vec::with_capacity(src.len() * 3 / 4);
    for chunk in src.chunks(4) {
        let mut group = 0u32;
        for (i, b) in chunk.iter().enumerate() {
            let v = reverse[*b as usize];
            if v == 0xff {
                return Err(Error::Decode("base64"));
            }
            group |= (v as u32) << (18 - 6 * i);
        }
        out.push((group >> 16) as u8);
        if chunk.len() > 2 {
            out.push((group >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(group as u8);
        }
    }
    Ok(out)
}

// Type tags for index-value encoding, in cross-type total order. Integer and
// Double share the number tag so equal numeric values index adjacently.
const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_BLOB: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const TAG_DOCUMENT: u8 = 0x07;

// Terminator for variable-length payloads. Below every tag and every
// base64-alphabet byte, so shorter values sort first.
const TERMINATOR: u8 = 0x00;

/// Appends a value in a form whose byte order matches the cross-type total
/// order: a type-rank tag followed by an order-preserving payload. Index
/// keys are only ever compared, never decoded.
///
/// Numbers encode as the i64 floor followed by the f64 fractional part, so
/// Integer and Double with the same mathematical value encode adjacently
/// while exact integer order survives magnitudes beyond f64 precision.
pub fn append_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            append_bool(buf, *b);
        }
        Value::Integer(i) => {
            buf.push(TAG_NUMBER);
            append_i64(buf, *i);
            append_f64(buf, 0.0);
        }
        Value::Double(d) => {
            buf.push(TAG_NUMBER);
            let (floor, fraction) = split_double(*d);
            append_i64(buf, floor);
            append_f64(buf, fraction);
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            append_base64(buf, s.as_bytes());
            buf.push(TERMINATOR);
        }
        Value::Blob(b) => {
            buf.push(TAG_BLOB);
            append_base64(buf, b);
            buf.push(TERMINATOR);
        }
        Value::Array(values) => {
            buf.push(TAG_ARRAY);
            for value in values {
                append_value(buf, value);
            }
            buf.push(TERMINATOR);
        }
        Value::Document(doc) => {
            buf.push(TAG_DOCUMENT);
            // Name-sorted, like document comparison, so documents that
            // differ only in field order encode identically.
            let mut pairs: Vec<_> = doc.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in pairs {
                append_base64(buf, name.as_bytes());
                buf.push(TERMINATOR);
                append_value(buf, value);
            }
            buf.push(TERMINATOR);
        }
    }
}

// Splits a double into an i64 floor and a fractional part in [0, 1), both
// monotone in the input. Magnitudes beyond the i64 range saturate the floor
// and carry the raw value in the second component, which stays monotone
// since the floor already dominates the comparison.
fn split_double(d: f64) -> (i64, f64) {
    if d >= i64::MAX as f64 {
        return (i64::MAX, d);
    }
    if d < i64::MIN as f64 {
        return (i64::MIN, d);
    }
    let floor = d.floor();
    (floor as i64, d - floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::Document;

    const I64_SAMPLES: &[i64] = &[
        i64::MIN,
        i64::MIN + 1,
        -1000,
        -1,
        0,
        1,
        1000,
        i64::MAX - 1,
        i64::MAX,
    ];

    fn f64_samples() -> Vec<f64> {
        vec![
            f64::NEG_INFINITY,
            f64::MIN,
            -1000.5,
            -1.0,
            -f64::MIN_POSITIVE,
            -f64::from_bits(1), // largest negative subnormal
            -0.0,
            0.0,
            f64::from_bits(1), // smallest positive subnormal
            f64::MIN_POSITIVE,
            1.0,
            1000.5,
            f64::MAX,
            f64::INFINITY,
        ]
    }

    #[test]
    fn bool_roundtrip_and_order() {
        for x in [false, true] {
            let mut buf = Vec::new();
            append_bool(&mut buf, x);
            assert_eq!(decode_bool(&buf).unwrap(), x);
        }
        let (mut f, mut t) = (Vec::new(), Vec::new());
        append_bool(&mut f, false);
        append_bool(&mut t, true);
        assert!(f < t);
        assert_eq!(decode_bool(&[]), Err(Error::Decode("bool")));
    }

    #[test]
    fn u64_roundtrip_and_order() {
        let samples = [0u64, 1, 255, 256, 1 << 32, u64::MAX - 1, u64::MAX];
        for window in samples.windows(2) {
            let (mut a, mut b) = (Vec::new(), Vec::new());
            append_u64(&mut a, window[0]);
            append_u64(&mut b, window[1]);
            assert!(a < b, "{} vs {}", window[0], window[1]);
            assert_eq!(decode_u64(&a).unwrap(), window[0]);
        }
        assert_eq!(decode_u64(&[0; 7]), Err(Error::Decode("u64")));
    }

    #[test]
    fn i64_roundtrip() {
        for &x in I64_SAMPLES {
            let mut buf = Vec::new();
            append_i64(&mut buf, x);
            assert_eq!(decode_i64(&buf).unwrap(), x);
        }
    }

    #[test]
    fn i64_order() {
        for pair in I64_SAMPLES.windows(2) {
            let (mut a, mut b) = (Vec::new(), Vec::new());
            append_i64(&mut a, pair[0]);
            append_i64(&mut b, pair[1]);
            assert!(a < b, "{} vs {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn f64_roundtrip() {
        for x in f64_samples() {
            let mut buf = Vec::new();
            append_f64(&mut buf, x);
            assert_eq!(decode_f64(&buf).unwrap().to_bits(), x.to_bits());
        }
    }

    #[test]
    fn f64_order() {
        for pair in f64_samples().windows(2) {
            let (mut a, mut b) = (Vec::new(), Vec::new());
            append_f64(&mut a, pair[0]);
            append_f64(&mut b, pair[1]);
            // -0.0 and 0.0 have distinct bit patterns and encodings, but
            // -0.0 still sorts first.
            assert!(a < b, "{} vs {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn f64_nan_roundtrips_bitwise() {
        for nan in [f64::NAN, -f64::NAN] {
            let mut buf = Vec::new();
            append_f64(&mut buf, nan);
            assert_eq!(decode_f64(&buf).unwrap().to_bits(), nan.to_bits());
        }
        // Positive NaN after +inf, negative NaN before -inf.
        let enc = |x: f64| {
            let mut buf = Vec::new();
            append_f64(&mut buf, x);
            buf
        };
        assert!(enc(f64::NAN) > enc(f64::INFINITY));
        assert!(enc(-f64::NAN) < enc(f64::NEG_INFINITY));
    }

    #[test]
    fn base64_roundtrip() {
        let samples: &[&[u8]] = &[
            b"",
            b"f",
            b"fo",
            b"foo",
            b"foob",
            b"fooba",
            b"foobar",
            &[0x00],
            &[0xff, 0xff, 0xff],
            &[0x00, 0x01, 0x02, 0x03, 0xfe, 0xff],
        ];
        for &data in samples {
            let mut buf = Vec::new();
            append_base64(&mut buf, data);
            assert_eq!(decode_base64(&buf).unwrap(), data, "{:?}", data);
        }
    }

    #[test]
    fn base64_order() {
        // Pairwise order preservation over a deterministic corpus, including
        // prefix pairs and high bytes.
        let samples: &[&[u8]] = &[
            b"",
            &[0x00],
            &[0x00, 0x00],
            &[0x00, 0x01],
            &[0x01],
            &[0x01, 0xff],
            b"a",
            b"ab",
            b"abc",
            b"abd",
            b"b",
            &[0x7f],
            &[0x80],
            &[0xff],
            &[0xff, 0x00],
            &[0xff, 0xff],
        ];
        for (i, &a) in samples.iter().enumerate() {
            for &b in &samples[i + 1..] {
                let (mut ea, mut eb) = (Vec::new(), Vec::new());
                append_base64(&mut ea, a);
                append_base64(&mut eb, b);
                assert!(ea < eb, "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn base64_rejects_invalid_input() {
        assert!(decode_base64(b"!").is_err());
        assert!(decode_base64(b"abcde").is_err()); // len % 4 == 1
    }

    #[test]
    fn value_encoding_order() {
        // Ascending by the cross-type total order, mixing types.
        let values = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Integer(i64::MIN),
            Value::Double(-1.5),
            Value::Integer(-1),
            Value::Double(-0.5),
            Value::Integer(0),
            Value::Double(0.5),
            Value::Integer(1),
            Value::Double(1.5),
            Value::Integer(2),
            Value::Integer(i64::MAX - 1),
            Value::Integer(i64::MAX),
            Value::Double(1e300),
            Value::Text("".into()),
            Value::Text("a".into()),
            Value::Text("ab".into()),
            Value::Blob(vec![0x00]),
            Value::Array(vec![Value::Integer(1)]),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
            Value::Document(Document::new()),
        ];
        for pair in values.windows(2) {
            let (mut a, mut b) = (Vec::new(), Vec::new());
            append_value(&mut a, &pair[0]);
            append_value(&mut b, &pair[1]);
            assert!(a < b, "{} vs {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn value_encoding_equal_numbers_collide() {
        let (mut a, mut b) = (Vec::new(), Vec::new());
        append_value(&mut a, &Value::Integer(2));
        append_value(&mut b, &Value::Double(2.0));
        assert_eq!(a, b);
    }

    #[test]
    fn value_encoding_ignores_document_field_order() {
        let mut forward = Document::new();
        forward.set("a", Value::Integer(1));
        forward.set("b", Value::Integer(2));
        let mut backward = Document::new();
        backward.set("b", Value::Integer(2));
        backward.set("a", Value::Integer(1));

        let (mut a, mut b) = (Vec::new(), Vec::new());
        append_value(&mut a, &Value::Document(forward));
        append_value(&mut b, &Value::Document(backward));
        assert_eq!(a, b);
    }
}
