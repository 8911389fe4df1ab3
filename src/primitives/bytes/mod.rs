#![forbid(unsafe_code)]
//! Order-preserving encoders used to build index keys.
//!
//! Every encoder appends to a byte vector so composite keys can be built by
//! chaining calls. Comparing two encoded keys bytewise gives the same order
//! as comparing the source values.

pub mod ord {
    //! Numeric, string and blob encoders.

    const SIGN_BIT: u64 = 1 << 63;

    /// Appends `v` big-endian.
    pub fn push_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends `v` with the sign bit flipped so negatives sort first.
    pub fn push_i64(dst: &mut Vec<u8>, v: i64) {
        push_u64(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Appends `v` so that bytewise order matches numeric order.
    ///
    /// Negative values have every bit inverted; non-negative values only the
    /// sign bit. `-0.0` sorts before `0.0`. NaN sorts after positive infinity.
    pub fn push_f64(dst: &mut Vec<u8>, v: f64) {
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT == 0 {
            bits ^ SIGN_BIT
        } else {
            !bits
        };
        push_u64(dst, encoded);
    }

    /// Appends a byte string terminated so that prefixes sort first.
    ///
    /// Zero bytes are escaped as `00 FF` and the string ends with `00 00`,
    /// which keeps lexicographic order intact for composite keys.
    pub fn push_bytes(dst: &mut Vec<u8>, bytes: &[u8]) {
        for &b in bytes {
            dst.push(b);
            if b == 0 {
                dst.push(0xFF);
            }
        }
        dst.extend_from_slice(&[0, 0]);
    }

    /// Appends a UTF-8 string with the same framing as [`push_bytes`].
    pub fn push_str(dst: &mut Vec<u8>, s: &str) {
        push_bytes(dst, s.as_bytes());
    }
}
