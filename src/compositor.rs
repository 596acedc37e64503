//! Canvas compositing: disposal handling, previous-frame snapshots, and pixel emission.
//!
//! A fast path decodes a full-width, non-interlaced frame straight into a contiguous canvas
//! slice; a general path walks row by row (honouring interlace order and transparency) for
//! everything else.

use crate::color::ColorTable;
use crate::error::{GifError, LzwError};
use crate::frame::{Disposal, FrameRecord, Rect};
use crate::lzw::{LzwChunk, LzwDecoder};

/// A captured copy of the canvas, kept around for `Disposal::RestorePrevious`.
pub struct Snapshot {
    pixels: Vec<[u8; 4]>,
    width: u32,
    height: u32,
}

impl Snapshot {
    pub fn capture(canvas: &[[u8; 4]], width: u32, height: u32) -> Self {
        Snapshot { pixels: canvas.to_vec(), width, height }
    }
}

fn fill_transparent(canvas: &mut [[u8; 4]]) {
    for pixel in canvas.iter_mut() {
        *pixel = [0, 0, 0, 0];
    }
}

fn fill_rect(canvas: &mut [[u8; 4]], canvas_w: u32, canvas_h: u32, rect: &Rect, color: [u8; 4]) {
    let Some(clipped) = rect.clip_to_canvas(canvas_w, canvas_h) else {
        return;
    };
    for y in clipped.y0..clipped.y1 {
        let row_start = (y * canvas_w) as usize;
        for x in clipped.x0..clipped.x1 {
            canvas[row_start + x as usize] = color;
        }
    }
}

fn copy_snapshot(canvas: &mut [[u8; 4]], canvas_w: u32, canvas_h: u32, snapshot: &Snapshot) {
    let w = canvas_w.min(snapshot.width);
    let h = canvas_h.min(snapshot.height);
    for y in 0..h {
        let dst_row = (y * canvas_w) as usize;
        let src_row = (y * snapshot.width) as usize;
        canvas[dst_row..dst_row + w as usize]
            .copy_from_slice(&snapshot.pixels[src_row..src_row + w as usize]);
    }
}

/// Pre-compose step: prepares the canvas for frame `i` by inspecting frame `i-1`'s disposal.
/// `previous` is `None` when no frame has been materialised yet (including frame 0).
pub fn prepare_canvas(
    canvas: &mut [[u8; 4]],
    canvas_w: u32,
    canvas_h: u32,
    previous: Option<&FrameRecord>,
    background: [u8; 4],
    snapshot: Option<&Snapshot>,
) {
    let Some(previous) = previous else {
        fill_transparent(canvas);
        return;
    };

    match previous.disposal {
        Disposal::Unspecified | Disposal::None => {}
        Disposal::RestoreBackground => {
            let color = if previous.transparent { [0, 0, 0, 0] } else { background };
            fill_rect(canvas, canvas_w, canvas_h, &previous.rect, color);
        }
        Disposal::RestorePrevious => match snapshot {
            Some(snapshot) => copy_snapshot(canvas, canvas_w, canvas_h, snapshot),
            None => {
                let color = if previous.transparent { [0, 0, 0, 0] } else { background };
                fill_rect(canvas, canvas_w, canvas_h, &previous.rect, color);
            }
        },
    }
}

/// The four-pass interlace row order: (0, 8, 16, ...), (4, 12, 20, ...),
/// (2, 6, 10, ...), (1, 3, 5, ...).
const INTERLACE_PASSES: [(u32, u32); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

fn interlace_rows(height: u32) -> impl Iterator<Item = u32> {
    INTERLACE_PASSES.iter().flat_map(move |&(start, stride)| (start..height).step_by(stride as usize))
}

/// Maps a mid-decode "ran off the end of the available bytes" into the decode pass's own
/// recoverable status, distinct from the survey pass's `InsufficientFrameData`.
fn as_working(err: LzwError) -> GifError {
    match err {
        LzwError::NoData => GifError::Working,
        other => GifError::Lzw(other),
    }
}

fn pull_index_byte(
    lzw: &mut LzwDecoder,
    pending: &mut Vec<u8>,
    pending_pos: &mut usize,
    chunk: &mut Vec<u8>,
) -> Result<Option<u8>, LzwError> {
    loop {
        if *pending_pos < pending.len() {
            let byte = pending[*pending_pos];
            *pending_pos += 1;
            return Ok(Some(byte));
        }
        match lzw.next_chunk(chunk)? {
            LzwChunk::End => return Ok(None),
            LzwChunk::Data => {
                pending.clear();
                pending.extend_from_slice(chunk);
                *pending_pos = 0;
            }
        }
    }
}

/// General-path decode: row by row, honouring interlace order, transparency, and clipping.
/// A transparent source index leaves the canvas pixel untouched. Returns `true` if the stream
/// supplied an index byte for every pixel in the frame's declared rectangle, `false` if the LZW
/// stream ended cleanly before that.
fn decode_general(
    lzw: &mut LzwDecoder,
    canvas: &mut [[u8; 4]],
    canvas_w: u32,
    canvas_h: u32,
    rect: &Rect,
    interlaced: bool,
    palette: &ColorTable,
    transparent_index: Option<u8>,
) -> Result<bool, GifError> {
    let frame_width = rect.width();
    let frame_height = rect.height();
    let mut pending = Vec::new();
    let mut pending_pos = 0usize;
    let mut chunk = Vec::new();

    let rows: Box<dyn Iterator<Item = u32>> =
        if interlaced { Box::new(interlace_rows(frame_height)) } else { Box::new(0..frame_height) };

    for row in rows {
        let canvas_y = rect.y0 + row;
        let row_in_canvas = canvas_y < canvas_h;
        for col in 0..frame_width {
            let index = match pull_index_byte(lzw, &mut pending, &mut pending_pos, &mut chunk)
                .map_err(as_working)?
            {
                Some(index) => index,
                None => return Ok(false),
            };
            if !row_in_canvas {
                continue;
            }
            let canvas_x = rect.x0 + col;
            if canvas_x >= canvas_w {
                continue;
            }
            let skip = matches!(transparent_index, Some(ti) if ti == index);
            if !skip {
                let offset = (canvas_y * canvas_w + canvas_x) as usize;
                canvas[offset] = palette.get(index);
            }
        }
    }
    Ok(true)
}

/// Fast-path decode: the frame spans the full canvas width at x = 0 and is not interlaced, so
/// rows land contiguously and `LzwDecoder::decode_map` can write straight into a single canvas
/// slice. Returns `true` if every pixel in the (canvas-clipped) destination was written.
fn decode_fast(
    lzw: &mut LzwDecoder,
    canvas: &mut [[u8; 4]],
    canvas_w: u32,
    canvas_h: u32,
    rect: &Rect,
    palette: &ColorTable,
    transparent_index: Option<u8>,
) -> Result<bool, GifError> {
    let effective_height = rect.height().min(canvas_h.saturating_sub(rect.y0));
    if effective_height == 0 {
        return Ok(true);
    }
    let start = (rect.y0 * canvas_w) as usize;
    let len = (effective_height * canvas_w) as usize;
    let dest = &mut canvas[start..start + len];
    let written = lzw.decode_map(dest, palette, transparent_index).map_err(as_working)?;
    Ok(written == dest.len())
}

/// Decodes `record` onto `canvas`, choosing the fast or general path. Returns `true` if the
/// frame's declared rectangle was fully supplied by the LZW stream, `false` if it ended early
/// (a clean `EndOfFrame` condition rather than an error).
pub fn decode_frame(
    canvas: &mut [[u8; 4]],
    canvas_w: u32,
    canvas_h: u32,
    record: &FrameRecord,
    palette: &ColorTable,
    lzw: &mut LzwDecoder,
) -> Result<bool, GifError> {
    let transparent_index = record.transparent_index_u8();
    let fast_path =
        !record.flags.interlaced && record.rect.width() == canvas_w && record.rect.x0 == 0;

    if fast_path {
        decode_fast(lzw, canvas, canvas_w, canvas_h, &record.rect, palette, transparent_index)
    } else {
        decode_general(
            lzw,
            canvas,
            canvas_w,
            canvas_h,
            &record.rect,
            record.flags.interlaced,
            palette,
            transparent_index,
        )
    }
}
