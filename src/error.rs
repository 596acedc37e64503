//! Error catalogue for the decoder: a closed `thiserror`-derived enum per layer, with `#[from]`
//! wiring the LZW sub-errors into the top-level GIF error.

use thiserror::Error;

/// Errors the LZW bitstream decoder can report.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzwError {
    /// The sub-block chain ran out of bytes before a full code (or code's sub-block length)
    /// could be read. Recoverable: retry once more bytes are appended to the source window.
    #[error("LZW sub-block ran past the end of the available source window")]
    NoData,
    /// The dictionary could not grow further (should not happen with a `Vec`-backed table).
    #[error("LZW dictionary exhausted available memory")]
    NoMem,
    /// End-of-information code read as the very first code, i.e. an empty frame.
    #[error("LZW stream ended on the very first code (empty frame)")]
    EoiCode,
    /// The first non-clear code read was not a valid literal.
    #[error("LZW stream's initial code {0} is not a valid literal")]
    BadICode(u16),
    /// A later code referenced a dictionary entry that does not exist yet.
    #[error("LZW code {0} is out of range for a dictionary of size {1}")]
    BadCode(u16, u16),
    /// `min_code_size` was outside the supported 2..=11 range.
    #[error("LZW minimum code size {0} is out of the supported 2..=11 range")]
    BadParam(u8),
}

/// The closed catalogue of errors the public façade can return.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GifError {
    /// A bitmap allocation (via the embedder's capability) failed.
    #[error("bitmap allocation failed")]
    InsufficientMemory,
    /// Pre-frame corruption: bad magic, an impossible logical screen descriptor, or a
    /// malformed extension before any frame was reached.
    #[error("GIF stream is corrupt")]
    DataError,
    /// Corruption local to one frame's data; earlier frames remain decodable.
    #[error("frame data is corrupt")]
    FrameDataError,
    /// The source window ended before a pre-frame record (header/LSD/global colour table)
    /// could be fully parsed.
    #[error("need more source bytes to continue parsing")]
    InsufficientData,
    /// The source window ended before one frame's sub-block chain could be fully walked.
    #[error("need more source bytes to finish surveying this frame")]
    InsufficientFrameData,
    /// A frame exists in the index but its image data was never fully surveyed.
    #[error("frame is not yet displayable")]
    FrameNoDisplay,
    /// `frame_decode` was asked for an index that was never surveyed.
    #[error("frame index {0} was never surveyed")]
    FrameInvalid(usize),
    /// `frame_prepare` was called after the last permitted loop iteration.
    #[error("animation has completed its final loop")]
    AnimationComplete,
    /// The source window passed to `frame_decode` ran out of bytes partway through this frame's
    /// sub-block chain. Recoverable: retry once more bytes are appended to the source window,
    /// the same way `InsufficientFrameData` is recovered from during the survey pass.
    #[error("need more source bytes to finish decoding this frame")]
    Working,
    /// The LZW stream reached a clean end-of-information code before producing enough index
    /// bytes to fill the frame's declared rectangle. Whatever pixels were produced remain in the
    /// bitmap; this frame's "decoded" latch is not set.
    #[error("frame's image data ended before its declared rectangle was filled")]
    EndOfFrame,
    /// Bubbled from the LZW layer during a decode pass.
    #[error("LZW decoding error")]
    Lzw(#[from] LzwError),
}

pub type Result<T> = core::result::Result<T, GifError>;
