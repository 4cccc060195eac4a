//! Pixel expansion and line compression for the raster output path.
//!
//! The raster-job protocol wants one byte per pixel, horizontally scaled to
//! the target resolution, then run-length compressed per line. Lines are at
//! most a few kilobytes, so everything here is a plain bounded loop over
//! freshly allocated buffers.

/// Expand a packed 1-bit-per-pixel buffer into one byte per pixel.
///
/// Bits are consumed most significant first. Clear bits map to `clear`, set
/// bits to `set`, and every output byte is replicated `scale` times, which
/// performs the horizontal scaling in the same pass.
pub fn expand_bits(input: &[u8], clear: u8, set: u8, scale: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 8 * scale);
    for &mask in input {
        for bit in (0..8).rev() {
            let value = if mask & (1 << bit) != 0 { set } else { clear };
            for _ in 0..scale {
                out.push(value);
            }
        }
    }
    out
}

/// General-purpose PackBits line compressor.
///
/// Literal spans of 1..=128 bytes are emitted as control `count - 1`;
/// duplicate runs of 2..=128 bytes as control `1 - count` (wrapping) plus
/// the value. The literal scan looks three bytes ahead, so an isolated pair
/// stays inside a literal span where it costs nothing, and only three or
/// more identical bytes break out into a repeat record.
pub fn pack_bits(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 128 + 1);
    let mut pos = 0;

    while pos < input.len() {
        // literal span: stop at 3 identical bytes or the record cap
        let mut end = pos;
        while end < input.len() {
            if end + 2 < input.len()
                && input[end] == input[end + 1]
                && input[end] == input[end + 2]
            {
                break;
            }
            if end - pos >= 128 {
                break;
            }
            end += 1;
        }

        let count = end - pos;
        if count > 0 {
            out.push((count - 1) as u8);
            out.extend_from_slice(&input[pos..end]);
            pos = end;
            continue;
        }

        // duplicate run starting here, capped at 128
        let mut end = pos;
        while end + 1 < input.len() && input[end] == input[end + 1] && end - pos < 127 {
            end += 1;
        }
        let count = end - pos + 1;
        out.push(1u8.wrapping_sub(count as u8));
        out.push(input[pos]);
        pos = end + 1;
    }

    out
}

/// PWG-raster run-length line compressor.
///
/// Literal spans of 2..=128 bytes use control `257 - count` (wrapping);
/// duplicate runs use control `count - 1` with count 2..=128. A pair of
/// identical bytes already ends a literal span, and a single trailing byte
/// is emitted as a one-repeat record with control 0.
pub fn pwg_rle(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 128 + 1);
    let mut pos = 0;

    while pos < input.len() {
        // literal span: stop at 2 identical bytes or the record cap
        let mut end = pos;
        while end < input.len() {
            if end + 1 < input.len() && input[end] == input[end + 1] {
                break;
            }
            if end - pos >= 128 {
                break;
            }
            end += 1;
        }

        let count = end - pos;
        if count >= 2 {
            out.push((257u16 - count as u16) as u8);
            out.extend_from_slice(&input[pos..end]);
            pos = end;
            continue;
        }

        // duplicate run (or the single byte left at the end of the line)
        let mut end = pos;
        while end + 1 < input.len() && input[end] == input[end + 1] && end - pos < 127 {
            end += 1;
        }
        out.push((end - pos) as u8);
        out.push(input[pos]);
        pos = end + 1;
    }

    out
}

/// Decode a [`pack_bits`] line. Test support for the compressor round trip.
#[cfg(test)]
fn unpack_bits(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let control = input[pos] as i8;
        pos += 1;
        if control >= 0 {
            let count = control as usize + 1;
            out.extend_from_slice(&input[pos..pos + count]);
            pos += count;
        } else {
            let count = 1 - control as isize;
            out.extend(std::iter::repeat(input[pos]).take(count as usize));
            pos += 1;
        }
    }
    out
}

#[cfg(test)]
fn pwg_unrle(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let control = input[pos];
        pos += 1;
        if control <= 127 {
            let count = control as usize + 1;
            out.extend(std::iter::repeat(input[pos]).take(count));
            pos += 1;
        } else {
            let count = 257 - control as usize;
            out.extend_from_slice(&input[pos..pos + count]);
            pos += count;
        }
    }
    out
}
