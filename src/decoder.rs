//! Public façade: object lifecycle, scan/prepare/decode dispatch, loop accounting.

use log::{debug, trace, warn};

use crate::bitmap::BitmapProvider;
use crate::color::ColorTable;
use crate::compositor::{self, Snapshot};
use crate::container::{
    clamp_screen_size, parse_color_table, parse_header, parse_logical_screen_descriptor,
    survey_step, ByteReader, GraphicControlInfo, SurveyStep,
};
use crate::error::{GifError, Result};
use crate::frame::{Disposal, FrameIndex, Rect, MAX_FRAMES};
use crate::lzw::LzwDecoder;

/// Snapshot of decoder-wide facts, returned by [`Decoder::get_info`].
#[derive(Debug, Clone, Copy)]
pub struct GifInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub loop_max: u16,
    pub loop_count: u32,
    pub delay_min: Option<u16>,
}

/// Result of [`Decoder::frame_prepare`]: which frame to show next and how to redraw it.
#[derive(Debug, Clone, Copy)]
pub struct FramePrepareInfo {
    pub redraw_rect: Rect,
    pub delay_cs: u16,
    pub next_frame: usize,
}

/// Reinterprets a `width * height * 4`-byte buffer as packed RGBA pixels.
fn pixels_mut(buffer: &mut [u8]) -> &mut [[u8; 4]] {
    debug_assert_eq!(buffer.len() % 4, 0);
    let len = buffer.len() / 4;
    // SAFETY: `[u8; 4]` has the same size and alignment as four `u8`s (alignment 1 either way),
    // and `buffer`'s length is a multiple of 4 by the `BitmapProvider::get_buffer` contract.
    unsafe { std::slice::from_raw_parts_mut(buffer.as_mut_ptr() as *mut [u8; 4], len) }
}

/// A progressive GIF decoder: feed it bytes as they arrive via [`Decoder::scan`], then drive
/// [`Decoder::frame_prepare`]/[`Decoder::frame_decode`] to render discovered frames. One instance
/// per stream.
pub struct Decoder<P: BitmapProvider> {
    capability: P,
    bitmap: Option<P::Handle>,

    canvas_w: u32,
    canvas_h: u32,
    background_index: u8,
    global_color_table: ColorTable,

    frames: FrameIndex,
    local_color_tables: Vec<Option<ColorTable>>,

    header_parsed: bool,
    cursor: usize,
    pending_gce: Option<GraphicControlInfo>,
    complete: bool,

    loop_max: u16,
    loop_count: u32,
    current_frame: Option<usize>,

    snapshot: Option<Snapshot>,
}

impl<P: BitmapProvider> Decoder<P> {
    /// Creates a decoder with no allocations beyond the object itself.
    pub fn create(capability: P) -> Self {
        Decoder {
            capability,
            bitmap: None,
            canvas_w: 0,
            canvas_h: 0,
            background_index: 0,
            global_color_table: ColorTable::unpopulated(),
            frames: FrameIndex::new(),
            local_color_tables: Vec::new(),
            header_parsed: false,
            cursor: 0,
            pending_gce: None,
            complete: false,
            loop_max: 1,
            loop_count: 0,
            current_frame: None,
            snapshot: None,
        }
    }

    fn background_color(&self) -> [u8; 4] {
        if (self.background_index as usize) < self.global_color_table.len() {
            self.global_color_table.get(self.background_index)
        } else {
            self.global_color_table.get(0)
        }
    }

    /// Registers a new, possibly-grown view of the source bytes and advances the survey pass as
    /// far as it will go. `data[0..n]` for any `n` seen on a prior call must be unchanged.
    pub fn scan(&mut self, data: &[u8]) -> Result<()> {
        if !self.header_parsed {
            let mut reader = ByteReader::new(data, 0);
            parse_header(&mut reader)?;
            let lsd = parse_logical_screen_descriptor(&mut reader)?;
            let (width, height) = clamp_screen_size(lsd.width, lsd.height);
            self.canvas_w = width;
            self.canvas_h = height;
            self.background_index = lsd.background_index;
            self.global_color_table = if lsd.has_global_color_table {
                parse_color_table(&mut reader, lsd.global_color_table_size)?
            } else {
                ColorTable::default_black_white()
            };
            self.cursor = reader.position();
            self.header_parsed = true;
            debug!(
                "parsed GIF header: canvas {}x{}, global table present={}",
                width, height, lsd.has_global_color_table
            );
        }

        while !self.complete {
            let mut reader = ByteReader::new(data, self.cursor);
            match survey_step(&mut reader, self.pending_gce) {
                Ok(SurveyStep::Trailer) => {
                    self.complete = true;
                    self.cursor = reader.position();
                }
                Ok(SurveyStep::GraphicControl(info)) => {
                    self.pending_gce = Some(info);
                    self.cursor = reader.position();
                }
                Ok(SurveyStep::LoopCount(count)) => {
                    self.loop_max = count;
                    self.cursor = reader.position();
                }
                Ok(SurveyStep::ExtensionSkipped) => {
                    self.cursor = reader.position();
                }
                Ok(SurveyStep::Frame { mut record, local_color_table }) => {
                    if self.frames.len() >= MAX_FRAMES {
                        return Err(GifError::DataError);
                    }
                    if self.frames.is_empty() {
                        let union =
                            Rect::new(0, 0, self.canvas_w, self.canvas_h).union(&record.rect);
                        self.canvas_w = union.width();
                        self.canvas_h = union.height();
                    }
                    record.displayable = true;
                    self.pending_gce = None;
                    trace!("surveyed frame {} at offset {}", self.frames.len(), record.offset);
                    self.frames.push(record);
                    self.local_color_tables.push(local_color_table);
                    self.cursor = reader.position();
                }
                Err(GifError::InsufficientData) | Err(GifError::InsufficientFrameData) => {
                    break;
                }
                Err(GifError::FrameDataError) => {
                    warn!("frame rejected as malformed; stream remains decodable up to here");
                    self.complete = true;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Decoder-wide facts: canvas size, frame counts, and loop/delay accounting.
    pub fn get_info(&self) -> GifInfo {
        GifInfo {
            width: self.canvas_w,
            height: self.canvas_h,
            frame_count: self.frames.frame_count(),
            loop_max: self.loop_max,
            loop_count: self.loop_count,
            delay_min: self.frames.delay_min(),
        }
    }

    /// Mutable access to the current bitmap's pixel storage, for embedders that need to read
    /// decoded pixels back out via the same buffer `frame_decode` wrote into. `None` before the
    /// first decode.
    pub fn bitmap_buffer(&mut self) -> Option<&mut [u8]> {
        let capability = &mut self.capability;
        let bitmap = self.bitmap.as_mut()?;
        Some(capability.get_buffer(bitmap))
    }

    /// Advances playback and returns the next frame to show, honouring loop accounting.
    pub fn frame_prepare(&mut self) -> Result<FramePrepareInfo> {
        let frame_count = self.frames.frame_count();
        if frame_count == 0 {
            return Err(GifError::FrameNoDisplay);
        }

        let next_frame = match self.current_frame {
            None => 0,
            Some(previous) => {
                let advanced = previous + 1;
                if advanced >= frame_count {
                    self.loop_count += 1;
                    if self.loop_max != 0 && self.loop_count >= self.loop_max as u32 {
                        return Err(GifError::AnimationComplete);
                    }
                    0
                } else {
                    advanced
                }
            }
        };

        let record = self.frames.get(next_frame).ok_or(GifError::FrameInvalid(next_frame))?;
        let redraw_rect = if record.disposal.requires_redraw() {
            match self.current_frame.and_then(|i| self.frames.get(i)) {
                Some(previous) => previous.rect.union(&record.rect),
                None => record.rect,
            }
        } else {
            record.rect
        };

        self.current_frame = Some(next_frame);
        Ok(FramePrepareInfo { redraw_rect, delay_cs: record.delay_cs, next_frame })
    }

    /// Materialises `index` onto the canvas and returns the bitmap handle. Any already-surveyed
    /// index is accepted, not only the one `frame_prepare` last returned.
    pub fn frame_decode(&mut self, data: &[u8], index: usize) -> Result<&mut P::Handle> {
        let record = self.frames.get(index).cloned().ok_or(GifError::FrameInvalid(index))?;
        if !record.displayable {
            return Err(GifError::FrameNoDisplay);
        }

        if self.bitmap.is_none() {
            let handle = self
                .capability
                .create(self.canvas_w, self.canvas_h)
                .ok_or(GifError::InsufficientMemory)?;
            self.bitmap = Some(handle);
        }

        let background = self.background_color();
        let canvas_w = self.canvas_w;
        let canvas_h = self.canvas_h;
        let previous = if index == 0 { None } else { self.frames.get(index - 1) }.cloned();
        let snapshot_for_restore = self.snapshot.take();

        let palette: ColorTable = self
            .local_color_tables
            .get(index)
            .and_then(|lct| lct.clone())
            .unwrap_or_else(|| self.global_color_table.clone());

        let min_code_size = *data.get(record.offset).ok_or(GifError::Working)?;
        let mut lzw = LzwDecoder::new(data, record.offset + 1, min_code_size)?;

        let capability = &mut self.capability;
        let bitmap = self.bitmap.as_mut().expect("bitmap created above");
        let buffer = capability.get_buffer(bitmap);
        let canvas = pixels_mut(buffer);

        compositor::prepare_canvas(
            canvas,
            canvas_w,
            canvas_h,
            previous.as_ref(),
            background,
            snapshot_for_restore.as_ref(),
        );

        let new_snapshot = if record.disposal == Disposal::RestorePrevious {
            Some(Snapshot::capture(canvas, canvas_w, canvas_h))
        } else {
            snapshot_for_restore
        };

        let completed = compositor::decode_frame(canvas, canvas_w, canvas_h, &record, &palette, &mut lzw)?;

        capability.modified(bitmap);
        if completed && !record.decoded {
            if let Some(opaque) = capability.test_opaque(bitmap) {
                capability.set_opaque(bitmap, opaque);
                if let Some(stored) = self.frames.get_mut(index) {
                    stored.opaque = opaque;
                }
            }
            if let Some(stored) = self.frames.get_mut(index) {
                stored.decoded = true;
            }
        }

        self.snapshot = new_snapshot;
        if completed {
            Ok(self.bitmap.as_mut().expect("bitmap created above"))
        } else {
            Err(GifError::EndOfFrame)
        }
    }

    /// Zeroes the loop counter and clears the "currently decoded" latch.
    pub fn reset(&mut self) {
        self.loop_count = 0;
        self.current_frame = None;
    }
}

impl<P: BitmapProvider> Drop for Decoder<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.bitmap.take() {
            self.capability.destroy(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct TestProvider {
        next_id: usize,
        buffers: HashMap<usize, Vec<u8>>,
    }

    impl TestProvider {
        fn new() -> Self {
            TestProvider { next_id: 0, buffers: HashMap::new() }
        }
    }

    impl BitmapProvider for TestProvider {
        type Handle = usize;

        fn create(&mut self, width: u32, height: u32) -> Option<usize> {
            let id = self.next_id;
            self.next_id += 1;
            self.buffers.insert(id, vec![0u8; (width * height * 4) as usize]);
            Some(id)
        }

        fn destroy(&mut self, handle: usize) {
            self.buffers.remove(&handle);
        }

        fn get_buffer<'a>(&'a mut self, handle: &'a mut usize) -> &'a mut [u8] {
            self.buffers.get_mut(handle).unwrap()
        }
    }

    /// A minimal 1x1 opaque GIF: header, LSD with a 2-entry global table, one frame, trailer.
    fn minimal_gif() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"GIF89a");
        data.extend_from_slice(&1u16.to_le_bytes()); // width
        data.extend_from_slice(&1u16.to_le_bytes()); // height
        data.push(0b1000_0000); // gct present, size exponent 0 -> 2 entries
        data.push(0); // background index
        data.push(0); // aspect ratio
        data.extend_from_slice(&[0xFF, 0, 0]); // entry 0: red
        data.extend_from_slice(&[0, 0xFF, 0]); // entry 1: green
        data.push(0x2C); // image separator
        data.extend_from_slice(&0u16.to_le_bytes()); // left
        data.extend_from_slice(&0u16.to_le_bytes()); // top
        data.extend_from_slice(&1u16.to_le_bytes()); // width
        data.extend_from_slice(&1u16.to_le_bytes()); // height
        data.push(0); // no local table, no interlace
        data.push(0x02); // min code size
        data.push(0x02); // sub-block length
        data.extend_from_slice(&[0x44, 0x01]); // clear, literal(0), eoi packed
        data.push(0x00); // terminator
        data.push(0x3B); // trailer
        data
    }

    #[test]
    fn scan_discovers_one_frame_and_completes() {
        let data = minimal_gif();
        let mut decoder = Decoder::create(TestProvider::new());
        decoder.scan(&data).unwrap();
        let info = decoder.get_info();
        assert_eq!(info.width, 1);
        assert_eq!(info.height, 1);
        assert_eq!(info.frame_count, 1);
        assert_eq!(info.loop_max, 1);
    }

    #[test]
    fn scan_is_idempotent_on_truncated_then_complete_buffer() {
        let data = minimal_gif();
        let mut decoder = Decoder::create(TestProvider::new());
        decoder.scan(&data[..data.len() - 5]).unwrap();
        assert_eq!(decoder.get_info().frame_count, 0);
        decoder.scan(&data).unwrap();
        assert_eq!(decoder.get_info().frame_count, 1);
    }

    #[test]
    fn frame_decode_writes_red_pixel() {
        let data = minimal_gif();
        let mut decoder = Decoder::create(TestProvider::new());
        decoder.scan(&data).unwrap();
        let prepared = decoder.frame_prepare().unwrap();
        assert_eq!(prepared.next_frame, 0);
        let handle = *decoder.frame_decode(&data, 0).unwrap();
        let buffer = decoder.capability.buffers.get(&handle).unwrap();
        assert_eq!(&buffer[0..4], &[0xFF, 0, 0, 0xFF]);
    }

    #[test]
    fn frame_prepare_reports_animation_complete_after_single_loop() {
        let data = minimal_gif();
        let mut decoder = Decoder::create(TestProvider::new());
        decoder.scan(&data).unwrap();
        decoder.frame_prepare().unwrap();
        assert_eq!(decoder.frame_prepare(), Err(GifError::AnimationComplete));
        decoder.reset();
        assert_eq!(decoder.frame_prepare().unwrap().next_frame, 0);
    }

    #[test]
    fn frame_decode_rejects_unsurveyed_index() {
        let data = minimal_gif();
        let mut decoder = Decoder::create(TestProvider::new());
        decoder.scan(&data).unwrap();
        assert_eq!(decoder.frame_decode(&data, 5), Err(GifError::FrameInvalid(5)));
    }
}
