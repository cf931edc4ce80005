//! Run-Length Encoding algorithms.
//!
//! This module implements the run-length encoding compression methods that
//! appear in supported file types. These particular algorithms appear to be
//! unique to the file formats, and so they get made-up names here.
//!
//! The names are based on the number of bits in each sample of the compressed
//! data: `RLE1`, `RLE7`, and `RLE15`. There is also a *second* 7-bit RLE
//! scheme, called `RLE7a` here.
//!
//! Every layer scheme works on a whole raster in row-major order. Decoders
//! paint into a caller-provided buffer of `width * height` samples that starts
//! out black, and never paint black explicitly.
//!
//! # `RLE1`
//!
//! `RLE1` encodes single-bit samples (i.e. a bilevel or monochrome image) into
//! runs of up to 125 pixels. It's used by `cbddlp` files.
//!
//! In each byte, the 1-bit sample is in the MSB, while the 7-bit run length is
//! in the low 7 bits. Thus, the byte `0x84` encodes 4 pixels containing 1s.
//! The encoder flushes whatever run is pending when it reaches the last pixel
//! of the image, and emits that last pixel as a run of its own.
//!
//! # `RLE7`
//!
//! `RLE7` encodes 7-bit samples (i.e. a grayscale image) into runs of up to
//! 256Mi pixels using a variable-length encoding scheme that vaguely resembles
//! UTF-8 (but is not UTF-8). It's used by `ctb` files.
//!
//! - 7-bit sample is stored in the 7 LSBs of the first byte.
//! - MSB clear means a run of 1 with no further encoding.
//! - MSB set means an encoded run length follows.
//! - The length (in bytes) of the encoded run length is indicated by the MSBs
//!   of the following byte.
//!   - `0b0xxx_xxxx` encodes a run of 0-127 pixels in the 7 LSBs.
//!   - `0b10xx_xxxx` encodes a 14-bit run length using the 6 LSBs and the
//!     following byte.
//!   - `0b110x_xxxx` encodes a 21-bit run length using the 5 LSBs and the
//!     following *two* bytes.
//!   - `0b1110_xxxx` encodes a 28-bit run length using the 4 LSBs and the
//!     following *three* bytes.
//!
//! When an encoded run spans multiple bytes, they appear in *big-endian order*
//! -- that is, the most significant bits of the encoded run appear in the
//! *first* byte. This is the only place in the entire file format that uses
//! big-endian.
//!
//! # `RLE7a`
//!
//! `RLE7a` encodes 7-bit samples as literal pixels followed by repetitions of
//! the last literal. It's used by `phz` files.
//!
//! - A byte with the MSB set encodes one pixel in its low 7 bits.
//! - A byte with the MSB clear repeats the last literal that many times.
//!
//! Repetitions can, themselves, be repeated: `0x80 0x7d 0x7d` encodes 251
//! zero-valued pixels. The encoder never emits a repetition longer than 125,
//! and it cuts runs at the middle and the end of every row, even when the
//! color doesn't change there. Files written by other tools do the same.
//!
//! # `RLE15`
//!
//! `RLE15` encodes RGB555 samples into runs of up to 4096 pixels. It's used in
//! all file format variations to encode preview images.
//!
//! - Pixels are packed like RGB565 -- that is, `0bRRRRR_GGGGGG_BBBBB` -- into
//!   little-endian `u16s`, but with the least significant `G` bit not storing
//!   color information.
//! - Instead, the bit that would be G's LSB (bit 5) indicates whether a run
//!   follows (set) or if this `u16` encodes a single pixel (clear).
//! - If a run follows, it has the form `0b0011_xxxx_xxxx_xxxx` -- that is, a
//!   12-bit run encoded in the 12 LSBs of a little-endian `u16`, with the four
//!   MSBs set to `0x3`/`0b0011`. Decoding ignores the top nibble.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use thiserror::Error;

/// Longest run a single `RLE1` byte is allowed to carry.
pub const RLE1_MAX_RUN: usize = 0x7D;

/// Longest run a single `RLE7` code can carry.
pub const RLE7_MAX_RUN: usize = 0xFFF_FFFF;

/// Longest repetition a single `RLE7a` byte is allowed to carry.
pub const RLE7A_MAX_REPEAT: usize = 0x7D;

/// Describes an error during RLE processing.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum RleError {
    /// A run was encoded using multiple bytes, but the input ended before it
    /// completed.
    #[error("truncated run")]
    Truncated,
    /// A run's encoding was invalid for this scheme.
    #[error("bad run encoding")]
    BadRunEncoding,
    /// A run claimed to cover no pixels.
    #[error("zero-length run")]
    ZeroLengthRun,
    /// The data describes more pixels than the image has.
    #[error("more pixels than the image holds")]
    TooManyPixels,
    /// A repetition appeared before any pixel value was set.
    #[error("repeat with no preceding pixel")]
    RunWithoutColor,
}

/// Common type for describing runs of 8-bit samples.
pub type Run = (u8, usize);

/// Applies the corruption policy: strict decoding stops at the first problem,
/// lenient decoding logs it and carries on.
fn tolerate(strict: bool, err: RleError) -> Result<(), RleError> {
    if strict {
        Err(err)
    } else {
        log::warn!("corrupted RLE data: {}", err);
        Ok(())
    }
}

/// Write cursor over a row-major raster.
///
/// Rows wrap implicitly: painting past the end of one row continues at the
/// start of the next.
struct Canvas<'a> {
    pixels: &'a mut [u8],
    cursor: usize,
}

impl<'a> Canvas<'a> {
    fn new(pixels: &'a mut [u8]) -> Self {
        Self { pixels, cursor: 0 }
    }

    /// Moves the cursor without painting, leaving pixels black. Fails if the
    /// run extends past the image, after painting nothing.
    fn skip(&mut self, n: usize) -> Result<(), RleError> {
        let end = self.cursor.saturating_add(n);
        if end > self.pixels.len() {
            self.cursor = self.pixels.len();
            return Err(RleError::TooManyPixels);
        }
        self.cursor = end;
        Ok(())
    }

    /// Calls `f` on the next `n` pixels. Pixels past the end of the image are
    /// dropped and reported.
    fn paint(
        &mut self,
        n: usize,
        f: impl Fn(&mut u8),
    ) -> Result<(), RleError> {
        let end = self.cursor.saturating_add(n);
        let clipped = end.min(self.pixels.len());
        self.pixels[self.cursor.min(clipped)..clipped]
            .iter_mut()
            .for_each(f);
        self.cursor = clipped;
        if end > clipped {
            Err(RleError::TooManyPixels)
        } else {
            Ok(())
        }
    }

    fn fill(&mut self, level: u8, n: usize) -> Result<(), RleError> {
        if level == 0 {
            self.skip(n)
        } else {
            self.paint(n, |p| *p = level)
        }
    }
}

/// Decodes a single byte of the RLE1 scheme into a run of 8-bit gray pixels.
///
/// RLE1 is a bilevel scheme, so "on" pixels are translated to level `0xFF`, and
/// "off" pixels to 0.
pub fn decode_rle1_byte(byte: u8) -> Run {
    // Level is given by MSB.
    let level = if byte < 0x80 { 0x00 } else { 0xFF };
    // Length is given by bits 6:0.
    let len = (byte & 0x7F) as usize;
    (level, len)
}

/// Encodes `pixels` into the RLE1 scheme.
///
/// RLE1 is a bilevel scheme, while `pixels` provides 8-bit intensity levels.
/// To translate, any 8-bit level at `threshold` or above is treated as on, and
/// any level below is treated as off.
pub fn encode_rle1(pixels: &[u8], threshold: u8) -> Vec<u8> {
    fn code(on: bool, len: usize) -> u8 {
        debug_assert!(len > 0 && len <= RLE1_MAX_RUN);
        len as u8 | if on { 0x80 } else { 0x00 }
    }

    let mut out = vec![];
    let (last, body) = match pixels.split_last() {
        None => return out,
        Some(split) => split,
    };

    let mut current = None;
    let mut run_length = 0;
    for &p in body {
        let on = p >= threshold;
        if current == Some(on) && run_length < RLE1_MAX_RUN {
            run_length += 1;
        } else {
            if let Some(c) = current {
                out.push(code(c, run_length));
            }
            current = Some(on);
            run_length = 1;
        }
    }
    if let Some(c) = current {
        out.push(code(c, run_length));
    }
    out.push(code(*last >= threshold, 1));
    out
}

/// Decodes RLE1 `data` over a raster, adding one to every pixel the data marks
/// as on.
///
/// Counting rather than painting lets several antialiasing sub-images be
/// accumulated into one buffer. Counts saturate at 255.
pub fn decode_rle1(
    data: &[u8],
    counts: &mut [u8],
    strict: bool,
) -> Result<(), RleError> {
    let mut canvas = Canvas::new(counts);
    for &byte in data {
        let (level, len) = decode_rle1_byte(byte);
        if len == 0 {
            tolerate(strict, RleError::ZeroLengthRun)?;
            continue;
        }
        let result = if level == 0 {
            canvas.skip(len)
        } else {
            canvas.paint(len, |p| *p = p.saturating_add(1))
        };
        if let Err(e) = result {
            tolerate(strict, e)?;
            break;
        }
    }
    Ok(())
}

/// Encodes `pixels` into the RLE7 scheme.
///
/// RLE7 is a 7-bit scheme, so the LSB of pixels is ignored. Runs longer than
/// the scheme can express are split.
pub fn encode_rle7(pixels: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    let mut pixels = pixels.iter().map(|p| p >> 1).peekable();
    while let Some(first) = pixels.next() {
        let mut run_length = 1usize;
        while run_length < RLE7_MAX_RUN && pixels.peek() == Some(&first) {
            pixels.next();
            run_length += 1;
        }
        out.extend_from_slice(Run7::new(first, run_length).as_slice());
    }
    out
}

/// RLE7 run encoding of one to five bytes.
///
/// This type exists so that we can return a 1-5 byte slice without allocating.
#[derive(Copy, Clone, Debug)]
pub enum Run7 {
    /// One byte encoding.
    R1(u8),
    /// Two byte encoding.
    R2([u8; 2]),
    /// Three byte encoding.
    R3([u8; 3]),
    /// Four byte encoding.
    R4([u8; 4]),
    /// Five byte encoding.
    R5([u8; 5]),
}

impl Run7 {
    /// Encodes a run of `run_length` pixels of 7-bit level `level`.
    ///
    /// `run_length` must be between 1 and `RLE7_MAX_RUN`.
    pub fn new(level: u8, run_length: usize) -> Self {
        let level = level & 0x7F;
        match run_length {
            0 | 1 => Run7::R1(level),
            2..=0x7f => Run7::R2([level | 0x80, run_length as u8]),
            0x80..=0x3fff => Run7::R3([
                level | 0x80,
                (run_length >> 8) as u8 | 0x80,
                run_length as u8,
            ]),
            0x4000..=0x1f_ffff => Run7::R4([
                level | 0x80,
                (run_length >> 16) as u8 | 0xc0,
                (run_length >> 8) as u8,
                run_length as u8,
            ]),
            _ => {
                debug_assert!(run_length <= RLE7_MAX_RUN);
                Run7::R5([
                    level | 0x80,
                    (run_length >> 24) as u8 & 0x0f | 0xe0,
                    (run_length >> 16) as u8,
                    (run_length >> 8) as u8,
                    run_length as u8,
                ])
            }
        }
    }

    /// Views this run as a slice for I/O purposes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Run7::R1(x) => std::slice::from_ref(x),
            Run7::R2(bs) => &bs[..],
            Run7::R3(bs) => &bs[..],
            Run7::R4(bs) => &bs[..],
            Run7::R5(bs) => &bs[..],
        }
    }
}

/// Extends a 7-bit level to 8 bits. Zero stays zero; anything else gets its
/// LSB set, so full scale maps to `0xFF`.
pub fn extend_7bit(code: u8) -> u8 {
    if code == 0 {
        0
    } else {
        (code << 1) | 1
    }
}

/// Decodes a run of pixels in the RLE7 scheme from the front of `bytes`.
///
/// Returns the run and the number of bytes it occupied, or `Ok(None)` if
/// `bytes` is empty.
///
/// If `bytes` peters out before the run encoding completes, returns
/// `Err(Truncated)`. The `0b1111_xxxx` length prefix isn't a thing; it
/// produces `Err(BadRunEncoding)`.
pub fn decode_rle7_run(bytes: &[u8]) -> Result<Option<(Run, usize)>, RleError> {
    let head = match bytes.first() {
        // Distinguish end-of-stream from truncation.
        None => return Ok(None),
        Some(&x) => x,
    };
    let level = extend_7bit(head & 0x7F);

    if head < 0x80 {
        // MSB clear encodes a single pixel.
        return Ok(Some(((level, 1), 1)));
    }

    let run_start = *bytes.get(1).ok_or(RleError::Truncated)?;
    let (extra, prefix_mask) = match run_start {
        // Initial MSB clear: 7-bit run length.
        0x00..=0x7f => (0, 0x7f),
        // bits 7:6 == 0b10: 14-bit run length
        0x80..=0xbf => (1, 0x3f),
        // bits 7:5 == 0b110: 21-bit run length
        0xc0..=0xdf => (2, 0x1f),
        // bits 7:4 == 0b1110: 28-bit run length
        0xe0..=0xef => (3, 0x0f),
        _ => return Err(RleError::BadRunEncoding),
    };
    let tail = bytes.get(2..2 + extra).ok_or(RleError::Truncated)?;
    let len = tail
        .iter()
        .fold(usize::from(run_start & prefix_mask), |acc, &b| {
            acc << 8 | usize::from(b)
        });
    Ok(Some(((level, len), 2 + extra)))
}

/// Decodes RLE7 `data` over a raster, painting grayscale levels.
pub fn decode_rle7(
    data: &[u8],
    pixels: &mut [u8],
    strict: bool,
) -> Result<(), RleError> {
    let mut canvas = Canvas::new(pixels);
    let mut pos = 0;
    while pos < data.len() {
        let ((level, len), used) = match decode_rle7_run(&data[pos..]) {
            Ok(Some(run)) => run,
            Ok(None) => break,
            Err(RleError::BadRunEncoding) => {
                // Treat the head as a lone pixel and drop the bad length byte.
                tolerate(strict, RleError::BadRunEncoding)?;
                ((extend_7bit(data[pos] & 0x7F), 1), 2)
            }
            Err(e) => {
                tolerate(strict, e)?;
                break;
            }
        };
        pos += used;
        if len == 0 {
            tolerate(strict, RleError::ZeroLengthRun)?;
            continue;
        }
        if let Err(e) = canvas.fill(level, len) {
            tolerate(strict, e)?;
            break;
        }
    }
    Ok(())
}

/// Encodes `pixels`, a raster `width` pixels wide, into the RLE7a scheme.
pub fn encode_rle7a(pixels: &[u8], width: usize) -> Vec<u8> {
    fn emit(out: &mut Vec<u8>, level: u8, run_length: usize) {
        out.push(level | 0x80);
        let mut remaining = run_length - 1;
        while remaining > 0 {
            let chunk = remaining.min(RLE7A_MAX_REPEAT);
            out.push(chunk as u8);
            remaining -= chunk;
        }
    }

    let mut out = vec![];
    if width == 0 {
        return out;
    }
    let half = width / 2;
    for row in pixels.chunks(width) {
        let mut current = None;
        let mut run_length = 0;
        for (x, &p) in row.iter().enumerate() {
            let level = (p >> 1) & 0x7F;
            match current {
                Some(c) if c == level && x != half => run_length += 1,
                _ => {
                    if let Some(c) = current {
                        emit(&mut out, c, run_length);
                    }
                    current = Some(level);
                    run_length = 1;
                }
            }
        }
        if let Some(c) = current {
            emit(&mut out, c, run_length);
        }
    }
    out
}

/// Decodes RLE7a `data` over a raster, painting grayscale levels.
pub fn decode_rle7a(
    data: &[u8],
    pixels: &mut [u8],
    strict: bool,
) -> Result<(), RleError> {
    let mut canvas = Canvas::new(pixels);
    let mut last = None;
    for &b in data {
        let result = if b & 0x80 != 0 {
            // Extend the low bit so that full scale maps to 0xFF.
            let level = ((b & 0x7F) << 1) | (b & 1);
            last = Some(level);
            canvas.fill(level, 1)
        } else if b == 0 {
            tolerate(strict, RleError::ZeroLengthRun)?;
            continue;
        } else {
            let level = match last {
                Some(level) => level,
                None => {
                    tolerate(strict, RleError::RunWithoutColor)?;
                    last = Some(0);
                    0
                }
            };
            canvas.fill(level, usize::from(b))
        };
        if let Err(e) = result {
            tolerate(strict, e)?;
            break;
        }
    }
    Ok(())
}

/// Equivalent to `Run` for RGB images.
pub type RgbRun = ([u8; 3], usize);

/// Packs an 8-bit RGB pixel into the RLE15 word layout, with the run flag
/// clear.
pub fn pack_rgb15(p: [u8; 3]) -> u16 {
    u16::from(p[2] >> 3) | u16::from(p[1] >> 2) << 5 | u16::from(p[0] >> 3) << 11
}

/// Unpacks the color carried by an RLE15 word.
pub fn unpack_rgb15(value: u16) -> [u8; 3] {
    [
        ((value >> 11) as u8 & 0x1f) << 3,
        ((value >> 6) as u8 & 0x1f) << 3,
        (value as u8 & 0x1f) << 3,
    ]
}

/// Decodes one RLE15 run from the front of `bytes`.
///
/// Returns the run and the number of bytes it occupied, or `Ok(None)` if
/// `bytes` is empty. If `bytes` ends partway through the run, returns
/// `Err(Truncated)`.
pub fn decode_rle15_run(
    bytes: &[u8],
) -> Result<Option<(RgbRun, usize)>, RleError> {
    let head = match bytes {
        [] => return Ok(None),
        [_] => return Err(RleError::Truncated),
        _ => LittleEndian::read_u16(bytes),
    };

    // The green LSB is overloaded to indicate the presence or absence of a
    // run.
    if head & 0x20 == 0 {
        return Ok(Some(((unpack_rgb15(head), 1), 2)));
    }

    let run = match bytes.get(2..4) {
        Some(word) => LittleEndian::read_u16(word),
        None => return Err(RleError::Truncated),
    };
    let length = usize::from(run & 0xFFF) + 1;
    Ok(Some(((unpack_rgb15(head), length), 4)))
}

/// Decodes RLE15 `data` into `rgb`, which holds three bytes per pixel.
pub fn decode_rle15(
    data: &[u8],
    rgb: &mut [u8],
    strict: bool,
) -> Result<(), RleError> {
    let mut pixels = rgb.chunks_exact_mut(3);
    let mut pos = 0;
    while pos < data.len() {
        let ((color, len), used) = match decode_rle15_run(&data[pos..]) {
            Ok(Some(run)) => run,
            Ok(None) => break,
            Err(e) => {
                tolerate(strict, e)?;
                break;
            }
        };
        pos += used;
        for _ in 0..len {
            match pixels.next() {
                Some(px) => px.copy_from_slice(&color),
                None => return tolerate(strict, RleError::TooManyPixels),
            }
        }
    }
    Ok(())
}

/// Encodes RGB `pixels` in the RLE15 scheme, emitting no run longer than
/// `max_run` pixels.
///
/// RLE15 encodes RGB555 pixels, while our input is 24-bit, so the input will
/// get quantized before compression.
pub fn encode_rle15(
    pixels: impl IntoIterator<Item = [u8; 3]>,
    max_run: usize,
) -> Vec<u8> {
    let max_run = max_run.clamp(1, 0x1000);
    let mut out = vec![];
    let mut pixels = pixels.into_iter().map(pack_rgb15).peekable();
    while let Some(first) = pixels.next() {
        let mut run_length = 1usize;
        while run_length < max_run && pixels.peek() == Some(&first) {
            pixels.next();
            run_length += 1;
        }
        match Run12::new(first, run_length) {
            Run12::Single(a) => out.extend_from_slice(&a.to_le_bytes()),
            Run12::Double(a, b) => {
                out.extend_from_slice(&a.to_le_bytes());
                out.extend_from_slice(&b.to_le_bytes());
            }
        }
    }
    out
}

/// A description of the encoding of a single run in the RLE15 scheme.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Run12 {
    /// One little-endian `u16` is required.
    Single(u16),
    /// Two little-endian `u16`s are required.
    Double(u16, u16),
}

impl Run12 {
    /// Encodes `run_length` repetitions of the packed pixel `color`.
    pub fn new(color: u16, run_length: usize) -> Self {
        let literal = color & !0x20;
        match run_length.cmp(&2) {
            Ordering::Greater => Run12::Double(
                color | 0x20,
                ((run_length - 1) as u16 & 0xFFF) | 0x3000,
            ),
            Ordering::Equal => Run12::Double(literal, literal),
            Ordering::Less => Run12::Single(literal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_rle1_basic() {
        let mut pixels = vec![0u8; 3];
        pixels.extend(std::iter::repeat(200).take(130));
        pixels.push(0);
        assert_eq!(
            encode_rle1(&pixels, 128),
            &[0x03, 0x80 | 0x7D, 0x80 | 5, 0x01]
        );
    }

    #[test]
    fn encode_rle1_final_pixel_stands_alone() {
        let pixels = [255u8; 4];
        assert_eq!(encode_rle1(&pixels, 128), &[0x83, 0x81]);
        assert_eq!(encode_rle1(&[255], 128), &[0x81]);
        assert_eq!(encode_rle1(&[], 128), &[] as &[u8]);
    }

    #[test]
    fn decode_rle1_wraps_rows_and_counts() {
        let mut counts = vec![0u8; 6];
        decode_rle1(&[0x02, 0x83, 0x01], &mut counts, true).unwrap();
        assert_eq!(counts, &[0, 0, 1, 1, 1, 0]);
        decode_rle1(&[0x81], &mut counts, true).unwrap();
        assert_eq!(counts, &[1, 0, 1, 1, 1, 0]);
    }

    #[test]
    fn decode_rle1_zero_length_run() {
        let mut lenient = vec![0u8; 4];
        decode_rle1(&[0x81, 0x80, 0x81], &mut lenient, false).unwrap();
        assert_eq!(lenient, &[1, 1, 0, 0]);

        let mut strict = vec![0u8; 4];
        assert_eq!(
            decode_rle1(&[0x81, 0x80, 0x81], &mut strict, true),
            Err(RleError::ZeroLengthRun)
        );
    }

    #[test]
    fn decode_rle1_overflow() {
        let mut pixels = vec![0u8; 3];
        assert_eq!(
            decode_rle1(&[0x85], &mut pixels, true),
            Err(RleError::TooManyPixels)
        );
        let mut pixels = vec![0u8; 3];
        decode_rle1(&[0x85], &mut pixels, false).unwrap();
        assert_eq!(pixels, &[1, 1, 1]);
    }

    #[test]
    fn encode_rle7_length_forms() {
        let run = |n| vec![0xFFu8; n];
        assert_eq!(encode_rle7(&run(1)), &[0x7F]);
        assert_eq!(encode_rle7(&run(0x7F)), &[0xFF, 0x7F]);
        assert_eq!(encode_rle7(&run(0x80)), &[0xFF, 0x80, 0x80]);
        assert_eq!(encode_rle7(&run(0x3FFF)), &[0xFF, 0xBF, 0xFF]);
        assert_eq!(encode_rle7(&run(0x4000)), &[0xFF, 0xC0, 0x40, 0x00]);
        assert_eq!(
            encode_rle7(&run(0x20_0000)),
            &[0xFF, 0xE0, 0x20, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_rle7_ignores_lsb() {
        assert_eq!(encode_rle7(&[0x10, 0x11, 0x00]), &[0x88, 0x02, 0x00]);
    }

    #[test]
    fn decode_rle7_levels() {
        let mut pixels = vec![0u8; 6];
        decode_rle7(&[0x00, 0xFF, 0x02, 0x88, 0x03], &mut pixels, true)
            .unwrap();
        assert_eq!(pixels, &[0, 0xFF, 0xFF, 0x11, 0x11, 0x11]);
    }

    #[test]
    fn decode_rle7_multibyte_length() {
        let mut pixels = vec![0u8; 0x4001];
        decode_rle7(&[0x80, 0xC0, 0x40, 0x00, 0x7F], &mut pixels, true)
            .unwrap();
        assert!(pixels[..0x4000].iter().all(|&p| p == 0));
        assert_eq!(pixels[0x4000], 0xFF);
    }

    #[test]
    fn decode_rle7_bad_prefix() {
        assert_eq!(decode_rle7_run(&[0x81, 0xF0]), Err(RleError::BadRunEncoding));
        assert_eq!(decode_rle7_run(&[0x81, 0x80]), Err(RleError::Truncated));
        assert_eq!(decode_rle7_run(&[0x81]), Err(RleError::Truncated));

        let mut pixels = vec![0u8; 2];
        decode_rle7(&[0xFF, 0xF0, 0x7F], &mut pixels, false).unwrap();
        assert_eq!(pixels, &[0xFF, 0xFF]);
        assert_eq!(
            decode_rle7(&[0xFF, 0xF0, 0x7F], &mut pixels, true),
            Err(RleError::BadRunEncoding)
        );
    }

    #[test]
    fn decode_rle7_zero_length_run() {
        let mut lenient = vec![0u8; 3];
        decode_rle7(&[0x7F, 0x81, 0x00, 0x7F], &mut lenient, false).unwrap();
        assert_eq!(lenient, &[0xFF, 0xFF, 0]);

        let mut strict = vec![0u8; 3];
        assert_eq!(
            decode_rle7(&[0x81, 0x00], &mut strict, true),
            Err(RleError::ZeroLengthRun)
        );
    }

    #[test]
    fn encode_rle7a_basic() {
        // Construct some huge runs by manipulating iterators.
        let one_thousand_twos = std::iter::repeat(4).take(1000);
        let a_three = std::iter::once(6);
        let edge_case = std::iter::repeat(8).take(128);
        let two_fives = std::iter::repeat(10).take(2);
        let first_half = one_thousand_twos
            .chain(a_three)
            .chain(edge_case)
            .chain(two_fives);
        let row: Vec<u8> =
            first_half.chain(std::iter::repeat(0).take(1131)).collect();

        let encoded = encode_rle7a(&row, row.len());

        assert_eq!(
            encoded,
            &[
                0x82, 0x7d, 0x7d, 0x7d, 0x7d, 0x7d, 0x7d, 0x7d, 0x7c, 0x83,
                0x84, 0x7d, 0x02, 0x85, 0x01, 0x80, 0x7d, 0x7d, 0x7d, 0x7d,
                0x7d, 0x7d, 0x7d, 0x7d, 0x7d, 0x05,
            ]
        );
    }

    #[test]
    fn encode_rle7a_cuts_rows_at_midpoint() {
        let pixels = [0xFFu8; 8];
        assert_eq!(
            encode_rle7a(&pixels, 4),
            &[0xFF, 0x01, 0xFF, 0x01, 0xFF, 0x01, 0xFF, 0x01]
        );
        let odd = [0u8; 3];
        assert_eq!(encode_rle7a(&odd, 3), &[0x80, 0x80, 0x01]);
    }

    #[test]
    fn decode_rle7a_repeats() {
        let mut pixels = vec![0u8; 6];
        decode_rle7a(&[0xC1, 0x02, 0xFF, 0x01, 0x80], &mut pixels, true)
            .unwrap();
        assert_eq!(pixels, &[0x83, 0x83, 0x83, 0xFF, 0xFF, 0]);
    }

    #[test]
    fn decode_rle7a_zero_length_run() {
        let mut lenient = vec![0u8; 3];
        decode_rle7a(&[0xFF, 0x00, 0x01], &mut lenient, false).unwrap();
        assert_eq!(lenient, &[0xFF, 0xFF, 0]);

        let mut strict = vec![0u8; 3];
        assert_eq!(
            decode_rle7a(&[0x81, 0x00], &mut strict, true),
            Err(RleError::ZeroLengthRun)
        );
    }

    #[test]
    fn decode_rle7a_problems() {
        let mut pixels = vec![0u8; 2];
        assert_eq!(
            decode_rle7a(&[0x02], &mut pixels, true),
            Err(RleError::RunWithoutColor)
        );
        assert_eq!(
            decode_rle7a(&[0xFF, 0x05], &mut pixels, true),
            Err(RleError::TooManyPixels)
        );
        let mut pixels = vec![0u8; 2];
        decode_rle7a(&[0xFF, 0x05], &mut pixels, false).unwrap();
        assert_eq!(pixels, &[0xFF, 0xFF]);
    }

    #[test]
    fn rgb15_packing() {
        assert_eq!(pack_rgb15([0xFF, 0xFF, 0xFF]), 0xFFFF);
        assert_eq!(pack_rgb15([0xFF, 0, 0]), 0xF800);
        assert_eq!(unpack_rgb15(0xFFFF), [0xF8, 0xF8, 0xF8]);
        // Bit 5 never carries color.
        assert_eq!(unpack_rgb15(0x0020), [0, 0, 0]);
    }

    #[test]
    fn encode_rle15_runs() {
        let white = [0xFF, 0xFF, 0xFF];
        assert_eq!(encode_rle15(vec![white], 0xFFF), &[0xDF, 0xFF]);
        assert_eq!(
            encode_rle15(vec![white; 2], 0xFFF),
            &[0xDF, 0xFF, 0xDF, 0xFF]
        );
        assert_eq!(
            encode_rle15(vec![white; 5], 0xFFF),
            &[0xFF, 0xFF, 0x04, 0x30]
        );
    }

    #[test]
    fn encode_rle15_splits_at_limit() {
        let black = [0u8; 3];
        assert_eq!(
            encode_rle15(vec![black; 0x1000], 0xFFF),
            &[0x20, 0x00, 0xFE, 0x3F, 0x00, 0x00]
        );
        assert_eq!(
            encode_rle15(vec![black; 0x1000], 0x1000),
            &[0x20, 0x00, 0xFF, 0x3F]
        );
    }

    #[test]
    fn decode_rle15_runs() {
        let mut rgb = vec![0u8; 3 * 4];
        decode_rle15(&[0xFF, 0xFF, 0x02, 0x30, 0x1F, 0x00], &mut rgb, true)
            .unwrap();
        assert_eq!(
            rgb,
            &[0xF8, 0xF8, 0xF8, 0xF8, 0xF8, 0xF8, 0xF8, 0xF8, 0xF8, 0, 0, 0xF8]
        );
    }

    #[test]
    fn decode_rle15_ignores_top_nibble() {
        let run = decode_rle15_run(&[0x20, 0x00, 0x04, 0xA0]).unwrap();
        assert_eq!(run, Some((([0, 0, 0], 5), 4)));
        assert_eq!(decode_rle15_run(&[0x20, 0x00, 0x04]), Err(RleError::Truncated));
        assert_eq!(decode_rle15_run(&[0x20]), Err(RleError::Truncated));
    }
}
