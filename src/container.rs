//! The two-pass GIF container parser.
//!
//! A survey pass walks the header, logical screen descriptor, colour tables, extensions, and
//! image descriptors to locate frame byte ranges without touching the LZW layer. Nothing here
//! commits its cursor until a record parses in full, which is what makes the survey resumable
//! across calls on a growing buffer.

use crate::color::ColorTable;
use crate::error::GifError;
use crate::frame::{Disposal, FrameRecord, ImageFlags, Rect};
use crate::lzw::LZW_CODE_MAX;

/// A cursor over a borrowed byte window that reports `InsufficientData` rather than panicking
/// when a read would run past the end. Never retains a slice past the call that produced it —
/// every accessor returns owned values or short-lived borrows.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        ByteReader { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, GifError> {
        let byte = *self.data.get(self.pos).ok_or(GifError::InsufficientData)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, GifError> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], GifError> {
        let end = self.pos.checked_add(len).ok_or(GifError::InsufficientData)?;
        let slice = self.data.get(self.pos..end).ok_or(GifError::InsufficientData)?;
        self.pos = end;
        Ok(slice)
    }
}

/// Maps a raw "ran off the end" read into the frame-scoped variant, since every read after the
/// initial header/LSD belongs to some frame's associated extension/image block.
fn as_frame_error(err: GifError) -> GifError {
    match err {
        GifError::InsufficientData => GifError::InsufficientFrameData,
        other => other,
    }
}

pub const GIF_TRAILER: u8 = 0x3B;
pub const EXTENSION_INTRODUCER: u8 = 0x21;
pub const IMAGE_SEPARATOR: u8 = 0x2C;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const APPLICATION_LABEL: u8 = 0xFF;
const NETSCAPE_LOOP_ID: &[u8] = b"NETSCAPE2.0";

#[derive(Debug, Clone, Copy)]
pub struct LogicalScreenDescriptor {
    pub width: u16,
    pub height: u16,
    pub has_global_color_table: bool,
    pub global_color_table_size: usize,
    pub background_index: u8,
}

/// Common screen dimensions GIF encoders falsely report instead of the true image size,
/// triggering the canvas-size-quirk clamp below.
const QUIRK_SCREEN_SIZES: &[(u16, u16)] =
    &[(640, 480), (640, 512), (800, 600), (1024, 768), (1280, 1024), (1600, 1200)];

const MAX_CANVAS_DIMENSION: u16 = 2048;

/// Clamps an implausible or out-of-range logical screen size down to a 1x1 canvas, returning the
/// canvas dimensions to use.
pub fn clamp_screen_size(width: u16, height: u16) -> (u16, u16) {
    if width == 0
        || height == 0
        || width > MAX_CANVAS_DIMENSION
        || height > MAX_CANVAS_DIMENSION
        || QUIRK_SCREEN_SIZES.contains(&(width, height))
    {
        (1, 1)
    } else {
        (width, height)
    }
}

pub fn parse_header(reader: &mut ByteReader) -> Result<(), GifError> {
    let magic = reader.read_slice(6)?;
    if &magic[0..3] != b"GIF" {
        return Err(GifError::DataError);
    }
    Ok(())
}

pub fn parse_logical_screen_descriptor(
    reader: &mut ByteReader,
) -> Result<LogicalScreenDescriptor, GifError> {
    let width = reader.read_u16_le()?;
    let height = reader.read_u16_le()?;
    let flags = reader.read_u8()?;
    let background_index = reader.read_u8()?;
    let _aspect_ratio = reader.read_u8()?;

    let has_global_color_table = flags & 0b1000_0000 != 0;
    let global_color_table_size = 1usize << ((flags & 0b0000_0111) + 1);

    Ok(LogicalScreenDescriptor {
        width,
        height,
        has_global_color_table,
        global_color_table_size,
        background_index,
    })
}

pub fn parse_color_table(reader: &mut ByteReader, size: usize) -> Result<ColorTable, GifError> {
    let bytes = reader.read_slice(size * 3)?;
    let mut triples = Vec::with_capacity(size);
    for chunk in bytes.chunks_exact(3) {
        triples.push([chunk[0], chunk[1], chunk[2]]);
    }
    Ok(ColorTable::from_rgb_triples(&triples))
}

#[derive(Debug, Clone, Copy)]
pub struct GraphicControlInfo {
    pub disposal: Disposal,
    pub transparent: bool,
    pub transparent_index: u8,
    pub delay_cs: u16,
}

/// Outcome of surveying one top-level record following the header/LSD/global colour table.
pub enum SurveyStep {
    /// The GIF trailer (0x3B) was reached; the stream is complete.
    Trailer,
    /// A graphic control extension was parsed; stash it for the next image descriptor.
    GraphicControl(GraphicControlInfo),
    /// A NETSCAPE2.0 application extension set the loop counter.
    LoopCount(u16),
    /// An extension was recognised but carries no state this decoder tracks (comment, plain
    /// text, application extensions other than NETSCAPE2.0, or anything unknown).
    ExtensionSkipped,
    /// A complete frame was surveyed: its image descriptor, optional local colour table, and
    /// full image-data sub-block chain were all present.
    Frame { record: FrameRecord, local_color_table: Option<ColorTable> },
}

/// Parses any extension immediately following a `0x21` introducer (already consumed by the
/// caller). Every GIF extension is, underneath, a fixed-format label byte followed by a chain
/// of length-prefixed sub-blocks — the graphic control extension is simply the case where that
/// chain has exactly one four-byte sub-block, so this single routine handles all of them
/// uniformly, matching the way `alex210-1-embedded-gif::gif_decoder::parse_frame_metadata`
/// dispatches only on the label rather than on distinct fixed-size structs per label.
fn parse_extension(reader: &mut ByteReader) -> Result<SurveyStep, GifError> {
    let label = reader.read_u8().map_err(as_frame_error)?;
    let first_len = reader.read_u8().map_err(as_frame_error)?;

    match label {
        GRAPHIC_CONTROL_LABEL => {
            if first_len != 4 {
                return Err(GifError::FrameDataError);
            }
            let flags = reader.read_u8().map_err(as_frame_error)?;
            let delay_cs = reader.read_u16_le().map_err(as_frame_error)?;
            let transparent_index = reader.read_u8().map_err(as_frame_error)?;
            let terminator = reader.read_u8().map_err(as_frame_error)?;
            if terminator != 0 {
                return Err(GifError::FrameDataError);
            }
            let disposal = Disposal::from_packed((flags >> 2) & 0b111);
            let transparent = flags & 1 != 0;
            Ok(SurveyStep::GraphicControl(GraphicControlInfo {
                disposal,
                transparent,
                transparent_index,
                delay_cs,
            }))
        }
        APPLICATION_LABEL => {
            let header = if first_len > 0 {
                Some(reader.read_slice(first_len as usize).map_err(as_frame_error)?)
            } else {
                None
            };
            let mut loop_count = None;
            let mut len = reader.read_u8().map_err(as_frame_error)?;
            while len != 0 {
                let sub = reader.read_slice(len as usize).map_err(as_frame_error)?;
                if let Some(id) = header {
                    if id.len() >= NETSCAPE_LOOP_ID.len()
                        && &id[..NETSCAPE_LOOP_ID.len()] == NETSCAPE_LOOP_ID
                        && sub.len() == 3
                        && sub[0] == 0x01
                    {
                        loop_count = Some(u16::from_le_bytes([sub[1], sub[2]]));
                    }
                }
                len = reader.read_u8().map_err(as_frame_error)?;
            }
            match loop_count {
                Some(n) => Ok(SurveyStep::LoopCount(n)),
                None => Ok(SurveyStep::ExtensionSkipped),
            }
        }
        _ => {
            let mut len = first_len;
            while len != 0 {
                reader.read_slice(len as usize).map_err(as_frame_error)?;
                len = reader.read_u8().map_err(as_frame_error)?;
            }
            Ok(SurveyStep::ExtensionSkipped)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ImageDescriptorRaw {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    flags: u8,
}

fn parse_image_descriptor(reader: &mut ByteReader) -> Result<ImageDescriptorRaw, GifError> {
    Ok(ImageDescriptorRaw {
        x: reader.read_u16_le().map_err(as_frame_error)?,
        y: reader.read_u16_le().map_err(as_frame_error)?,
        width: reader.read_u16_le().map_err(as_frame_error)?,
        height: reader.read_u16_le().map_err(as_frame_error)?,
        flags: reader.read_u8().map_err(as_frame_error)?,
    })
}

/// Surveys one image descriptor block (separator already consumed): its optional local colour
/// table, then walks (without LZW-decoding) the image-data sub-block chain to find where the
/// next record starts.
fn survey_frame(
    reader: &mut ByteReader,
    pending_gce: Option<GraphicControlInfo>,
) -> Result<SurveyStep, GifError> {
    let descriptor = parse_image_descriptor(reader)?;

    let has_lct = descriptor.flags & 0b1000_0000 != 0;
    let interlaced = descriptor.flags & 0b0100_0000 != 0;
    let lct_size = 1usize << ((descriptor.flags & 0b0000_0111) + 1);

    let local_color_table = if has_lct {
        Some(parse_color_table(reader, lct_size).map_err(as_frame_error)?)
    } else {
        None
    };

    let image_data_offset = reader.position();

    let min_code_size = reader.read_u8().map_err(as_frame_error)?;
    if !(2..=LZW_CODE_MAX).contains(&min_code_size) {
        return Err(GifError::FrameDataError);
    }

    let mut len = reader.read_u8().map_err(as_frame_error)?;
    while len != 0 {
        reader.read_slice(len as usize).map_err(as_frame_error)?;
        len = reader.read_u8().map_err(as_frame_error)?;
    }

    let rect = Rect::new(
        descriptor.x as u32,
        descriptor.y as u32,
        descriptor.width as u32,
        descriptor.height as u32,
    );

    let mut record = FrameRecord::new(image_data_offset, rect);
    record.displayable = true;
    record.flags = ImageFlags { interlaced, has_local_color_table: has_lct, local_color_table_size: lct_size };

    if let Some(gce) = pending_gce {
        record.disposal = gce.disposal;
        record.transparent = gce.transparent;
        record.transparent_index = gce.transparent_index as u32;
        record.delay_cs = gce.delay_cs;
    }

    Ok(SurveyStep::Frame { record, local_color_table })
}

/// Surveys exactly one top-level record starting at `reader`'s current position: an extension,
/// an image descriptor block, or the trailer. Returns `Err` without having committed any partial
/// progress the caller should retry once more bytes arrive — `reader` is a fresh, cheap-to-drop
/// cursor, so callers simply re-run this from the last *committed* offset.
pub fn survey_step(
    reader: &mut ByteReader,
    pending_gce: Option<GraphicControlInfo>,
) -> Result<SurveyStep, GifError> {
    let introducer = reader.read_u8()?;
    match introducer {
        GIF_TRAILER => Ok(SurveyStep::Trailer),
        EXTENSION_INTRODUCER => parse_extension(reader),
        IMAGE_SEPARATOR => survey_frame(reader, pending_gce),
        _ => Err(GifError::FrameDataError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_bad_magic() {
        let data = b"XYZ89a";
        let mut reader = ByteReader::new(data, 0);
        assert_eq!(parse_header(&mut reader), Err(GifError::DataError));
    }

    #[test]
    fn header_accepts_gif87a_and_gif89a() {
        for magic in [b"GIF87a", b"GIF89a"] {
            let mut reader = ByteReader::new(magic, 0);
            assert!(parse_header(&mut reader).is_ok());
        }
    }

    #[test]
    fn size_quirk_clamps_common_screen_dimensions() {
        assert_eq!(clamp_screen_size(640, 480), (1, 1));
        assert_eq!(clamp_screen_size(1024, 768), (1, 1));
        assert_eq!(clamp_screen_size(0, 10), (1, 1));
        assert_eq!(clamp_screen_size(3000, 10), (1, 1));
        assert_eq!(clamp_screen_size(64, 64), (64, 64));
    }

    #[test]
    fn logical_screen_descriptor_parses_global_table_size() {
        // width=1,height=1, flags: gct present, size exponent 0 -> 2 entries, bg=0, aspect=0
        let data = [0x01, 0x00, 0x01, 0x00, 0b1000_0000u8, 0x00, 0x00];
        let mut reader = ByteReader::new(&data, 0);
        let lsd = parse_logical_screen_descriptor(&mut reader).unwrap();
        assert_eq!(lsd.width, 1);
        assert_eq!(lsd.height, 1);
        assert!(lsd.has_global_color_table);
        assert_eq!(lsd.global_color_table_size, 2);
    }

    #[test]
    fn insufficient_bytes_report_insufficient_data_before_first_frame() {
        let data = [0x01, 0x00];
        let mut reader = ByteReader::new(&data, 0);
        assert_eq!(parse_logical_screen_descriptor(&mut reader), Err(GifError::InsufficientData));
    }

    #[test]
    fn trailer_step_is_recognised() {
        let data = [GIF_TRAILER];
        let mut reader = ByteReader::new(&data, 0);
        assert!(matches!(survey_step(&mut reader, None), Ok(SurveyStep::Trailer)));
    }

    #[test]
    fn graphic_control_extension_normalises_quirk_disposal() {
        // introducer handled by caller; here we start right after 0x21
        // label=0xF9, block_size=4, flags: disposal=4 (quirk) in bits 2-4, transparent=0, delay=10, idx=0, terminator=0
        let disposal_bits = 4u8 << 2;
        let data = [0xF9, 0x04, disposal_bits, 0x0A, 0x00, 0x00, 0x00];
        let mut reader = ByteReader::new(&data, 0);
        match parse_extension(&mut reader).unwrap() {
            SurveyStep::GraphicControl(info) => {
                assert_eq!(info.disposal, Disposal::RestorePrevious);
                assert_eq!(info.delay_cs, 10);
            }
            _ => panic!("expected graphic control extension"),
        }
    }

    #[test]
    fn netscape_application_extension_sets_loop_count() {
        let mut data = vec![0xFF, 0x0B];
        data.extend_from_slice(NETSCAPE_LOOP_ID);
        data.push(0x03); // sub-block length
        data.push(0x01);
        data.push(0x00); // loop_lo
        data.push(0x00); // loop_hi -> infinite
        data.push(0x00); // terminator
        let mut reader = ByteReader::new(&data, 0);
        match parse_extension(&mut reader).unwrap() {
            SurveyStep::LoopCount(n) => assert_eq!(n, 0),
            _ => panic!("expected loop count"),
        }
    }
}
