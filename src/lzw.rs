//! GIF-variant LZW bitstream decoder.
//!
//! Variable-width codes, a Clear Code that resets the dictionary, and an End-of-Information
//! code that terminates the stream. Each dictionary entry caches its first output byte and
//! total length so emitting a code never needs to walk the prefix chain.

use crate::error::LzwError;

/// Entries 0..DICTIONARY_CAPACITY are addressable; literal codes (`< clear_code`) are never
/// materialised here, only codes allocated after CLEAR/EOI.
pub const DICTIONARY_CAPACITY: usize = 4096;
/// Maximum code width in bits; the GIF LZW format never grows past this.
pub const MAX_CODE_WIDTH: u8 = 12;
/// Upper bound accepted for `min_code_size` during frame data parsing.
pub const LZW_CODE_MAX: u8 = 11;

#[derive(Clone, Copy, Default)]
struct Entry {
    prefix: u16,
    suffix: u8,
    first: u8,
    length: u16,
}

/// Result of pulling one LZW code's worth of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzwChunk {
    /// The decoder appended at least one byte to the caller's scratch buffer.
    Data,
    /// The end-of-information code was consumed; there is no more output for this frame.
    End,
}

/// Pull-style decoder over a GIF sub-block chain.
///
/// `cursor` must point at the first sub-block length byte (i.e. the byte immediately after the
/// 1-byte minimum code size, which the caller reads separately since it belongs to the frame
/// header rather than the bitstream itself).
pub struct LzwDecoder<'a> {
    source: &'a [u8],
    pos: usize,
    sub_remaining: u8,
    reached_terminator: bool,

    bit_buf: u32,
    bit_count: u32,

    min_code_size: u8,
    clear_code: u16,
    eoi_code: u16,
    code_width: u8,
    next_free: u16,
    prev_code: Option<u16>,
    finished: bool,

    entries: Vec<Entry>,
    stack_scratch: Vec<u8>,
}

impl<'a> LzwDecoder<'a> {
    pub fn new(source: &'a [u8], cursor: usize, min_code_size: u8) -> Result<Self, LzwError> {
        if !(2..=LZW_CODE_MAX).contains(&min_code_size) {
            return Err(LzwError::BadParam(min_code_size));
        }
        let clear_code = 1u16 << min_code_size;
        let eoi_code = clear_code + 1;
        Ok(LzwDecoder {
            source,
            pos: cursor,
            sub_remaining: 0,
            reached_terminator: false,
            bit_buf: 0,
            bit_count: 0,
            min_code_size,
            clear_code,
            eoi_code,
            code_width: min_code_size + 1,
            next_free: eoi_code + 1,
            prev_code: None,
            finished: false,
            entries: vec![Entry::default(); DICTIONARY_CAPACITY],
            stack_scratch: Vec::with_capacity(DICTIONARY_CAPACITY),
        })
    }

    /// Position in the source buffer immediately following the sub-block chain's terminator,
    /// valid once decoding has reached a clean end (`LzwChunk::End` or an `EoiCode`/normal EOI).
    pub fn final_cursor(&self) -> usize {
        self.pos
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn reset_dictionary(&mut self) {
        self.code_width = self.min_code_size + 1;
        self.next_free = self.eoi_code + 1;
        self.prev_code = None;
    }

    fn next_raw_byte(&mut self) -> Result<Option<u8>, LzwError> {
        if self.reached_terminator {
            return Ok(None);
        }
        if self.sub_remaining == 0 {
            if self.pos >= self.source.len() {
                return Err(LzwError::NoData);
            }
            let len = self.source[self.pos];
            self.pos += 1;
            if len == 0 {
                self.reached_terminator = true;
                return Ok(None);
            }
            self.sub_remaining = len;
        }
        if self.pos >= self.source.len() {
            return Err(LzwError::NoData);
        }
        let byte = self.source[self.pos];
        self.pos += 1;
        self.sub_remaining -= 1;
        Ok(Some(byte))
    }

    fn pull_code(&mut self) -> Result<Option<u16>, LzwError> {
        while self.bit_count < self.code_width as u32 {
            match self.next_raw_byte()? {
                Some(byte) => {
                    self.bit_buf |= (byte as u32) << self.bit_count;
                    self.bit_count += 8;
                }
                None => {
                    if self.bit_count == 0 {
                        return Ok(None);
                    }
                    return Err(LzwError::NoData);
                }
            }
        }
        let mask = (1u32 << self.code_width) - 1;
        let code = (self.bit_buf & mask) as u16;
        self.bit_buf >>= self.code_width;
        self.bit_count -= self.code_width as u32;
        Ok(Some(code))
    }

    fn first_byte(&self, code: u16) -> u8 {
        if code < self.clear_code {
            code as u8
        } else {
            self.entries[code as usize].first
        }
    }

    fn length(&self, code: u16) -> u16 {
        if code < self.clear_code {
            1
        } else {
            self.entries[code as usize].length
        }
    }

    /// Expands `code` into `out`, appending bytes left-to-right.
    fn emit(&mut self, code: u16, out: &mut Vec<u8>) -> Result<(), LzwError> {
        if code < self.clear_code {
            out.push(code as u8);
            return Ok(());
        }
        self.stack_scratch.clear();
        let mut current = code;
        loop {
            let entry = self.entries[current as usize];
            self.stack_scratch.push(entry.suffix);
            if entry.prefix < self.clear_code {
                self.stack_scratch.push(entry.prefix as u8);
                break;
            }
            current = entry.prefix;
        }
        out.extend(self.stack_scratch.iter().rev());
        Ok(())
    }

    /// Pulls the next run of uncompressed index bytes produced by a single LZW code.
    ///
    /// Clear codes are absorbed internally (never surfaced as an empty `Data` chunk); a caller
    /// only ever observes `Data` (scratch non-empty) or `End`.
    pub fn next_chunk(&mut self, out: &mut Vec<u8>) -> Result<LzwChunk, LzwError> {
        out.clear();
        loop {
            if self.finished {
                return Ok(LzwChunk::End);
            }
            let code = match self.pull_code()? {
                Some(code) => code,
                None => {
                    self.finished = true;
                    return Ok(LzwChunk::End);
                }
            };

            if code == self.clear_code {
                self.reset_dictionary();
                continue;
            }
            if code == self.eoi_code {
                self.finished = true;
                if self.prev_code.is_none() {
                    return Err(LzwError::EoiCode);
                }
                return Ok(LzwChunk::End);
            }

            if let Some(prev) = self.prev_code {
                let next_free = self.next_free;
                if code > next_free {
                    return Err(LzwError::BadCode(code, next_free));
                }
                let resolved = if code == next_free { prev } else { code };
                if code == next_free {
                    // The code being defined isn't in the dictionary yet: its string is prev's
                    // string with prev's own first byte appended (the classic KwKwK case).
                    self.emit(prev, out)?;
                    out.push(self.first_byte(prev));
                } else {
                    self.emit(resolved, out)?;
                }

                if (next_free as usize) < DICTIONARY_CAPACITY {
                    let first = self.first_byte(prev);
                    let suffix = self.first_byte(resolved);
                    let length = self.length(prev) + 1;
                    self.entries[next_free as usize] = Entry { prefix: prev, suffix, first, length };
                    self.next_free += 1;
                    if self.next_free == (1u16 << self.code_width) && self.code_width < MAX_CODE_WIDTH {
                        self.code_width += 1;
                    }
                }
                self.prev_code = Some(code);
            } else {
                if code >= self.clear_code {
                    return Err(LzwError::BadICode(code));
                }
                self.emit(code, out)?;
                self.prev_code = Some(code);
            }
            return Ok(LzwChunk::Data);
        }
    }

    /// Decodes directly into a 32-bit RGBA destination buffer, mapping each index through
    /// `palette` and skipping the write (but still advancing) where the index equals
    /// `transparent_index`. Returns the number of destination pixels advanced, which is exactly
    /// `dest.len()` unless decoding ends early (clean EOI or an error).
    pub fn decode_map(
        &mut self,
        dest: &mut [[u8; 4]],
        palette: &crate::color::ColorTable,
        transparent_index: Option<u8>,
    ) -> Result<usize, LzwError> {
        let mut written = 0usize;
        let mut chunk_buf = Vec::with_capacity(DICTIONARY_CAPACITY);

        while written < dest.len() {
            match self.next_chunk(&mut chunk_buf)? {
                LzwChunk::End => break,
                LzwChunk::Data => {
                    for &index in chunk_buf.iter() {
                        if written >= dest.len() {
                            break;
                        }
                        let skip = matches!(transparent_index, Some(ti) if ti == index);
                        if !skip {
                            dest[written] = palette.get(index);
                        }
                        written += 1;
                    }
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorTable;

    /// A single-pixel frame's image data: min_code_size=2, sub-block of length 2 holding
    /// `[0x44, 0x01]`, then the zero-length terminator.
    #[test]
    fn single_pixel_literal() {
        let source = [0x02u8, 0x44, 0x01, 0x00];
        let mut decoder = LzwDecoder::new(&source, 0, 2).unwrap();
        let mut out = Vec::new();
        let chunk = decoder.next_chunk(&mut out).unwrap();
        assert_eq!(chunk, LzwChunk::Data);
        assert_eq!(out, vec![0u8]);
        let chunk = decoder.next_chunk(&mut out).unwrap();
        assert_eq!(chunk, LzwChunk::End);
        assert_eq!(decoder.final_cursor(), source.len());
    }

    /// `min_code_size=2`, code stream `[CLEAR, 1, 6, EOI]`: code 6 equals the dictionary slot
    /// about to be created (the KwKwK case), whose string is `string(prev) + first_byte(prev)`,
    /// i.e. one byte longer than `prev` alone. Decodes the index run `[1, 1, 1]`.
    #[test]
    fn self_referential_code_repeats_prefix_byte() {
        let source = [0x02u8, 0x8C, 0x0B, 0x00];
        let mut decoder = LzwDecoder::new(&source, 0, 2).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.next_chunk(&mut out), Ok(LzwChunk::Data));
        assert_eq!(out, vec![1u8]);
        assert_eq!(decoder.next_chunk(&mut out), Ok(LzwChunk::Data));
        assert_eq!(out, vec![1u8, 1u8]);
        assert_eq!(decoder.next_chunk(&mut out), Ok(LzwChunk::End));
    }

    /// `min_code_size=3`, code stream `[CLEAR, 1, 2, 10, 1, 13, EOI]` decodes the index run
    /// `[1, 2, 1, 2, 1, 1, 1]`: code 10 is dictionary entry `(1, 2)` referenced a genuine second
    /// time (not self-referential), and code 13 is a KwKwK occurrence later in the same stream.
    #[test]
    fn dictionary_entry_reused_then_self_referential() {
        let source = [0x04u8, 0x18, 0xA2, 0xD1, 0x09, 0x00];
        let mut decoder = LzwDecoder::new(&source, 0, 3).unwrap();
        let mut all = Vec::new();
        let mut out = Vec::new();
        loop {
            match decoder.next_chunk(&mut out).unwrap() {
                LzwChunk::Data => all.extend_from_slice(&out),
                LzwChunk::End => break,
            }
        }
        assert_eq!(all, vec![1u8, 2, 1, 2, 1, 1, 1]);
    }

    #[test]
    fn rejects_bad_min_code_size() {
        let source = [0u8; 4];
        assert_eq!(LzwDecoder::new(&source, 0, 1).unwrap_err(), LzwError::BadParam(1));
        assert_eq!(LzwDecoder::new(&source, 0, 12).unwrap_err(), LzwError::BadParam(12));
    }

    #[test]
    fn truncated_subblock_yields_no_data() {
        // length byte claims 5 bytes but only 1 is actually present, with no terminator.
        // The buffered clear+literal codes decode fine; the next pull runs off the end.
        let source = [0x05u8, 0x44];
        let mut decoder = LzwDecoder::new(&source, 0, 2).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.next_chunk(&mut out), Ok(LzwChunk::Data));
        assert_eq!(out, vec![0u8]);
        assert_eq!(decoder.next_chunk(&mut out), Err(LzwError::NoData));
    }

    #[test]
    fn map_mode_respects_transparency_and_palette() {
        let source = [0x02u8, 0x44, 0x01, 0x00];
        let mut decoder = LzwDecoder::new(&source, 0, 2).unwrap();
        let palette = ColorTable::from_rgb_triples(&[[1, 2, 3], [4, 5, 6]]);
        let mut dest = vec![[9u8, 9, 9, 9]; 1];
        let written = decoder.decode_map(&mut dest, &palette, None).unwrap();
        assert_eq!(written, 1);
        assert_eq!(dest[0], [1, 2, 3, 0xFF]);
    }

    #[test]
    fn map_mode_skips_transparent_index_but_still_advances() {
        let source = [0x02u8, 0x44, 0x01, 0x00];
        let mut decoder = LzwDecoder::new(&source, 0, 2).unwrap();
        let palette = ColorTable::from_rgb_triples(&[[1, 2, 3], [4, 5, 6]]);
        let mut dest = vec![[9u8, 9, 9, 9]; 1];
        let written = decoder.decode_map(&mut dest, &palette, Some(0)).unwrap();
        assert_eq!(written, 1);
        assert_eq!(dest[0], [9, 9, 9, 9]);
    }
}
