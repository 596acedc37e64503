//! The embedder-supplied bitmap capability.
//!
//! The decoder never allocates final pixel storage itself — it asks the embedder for a handle
//! once, lazily, and holds it for the stream's lifetime.

/// Capability the embedder supplies so decoded pixels live in memory it owns.
///
/// `create`/`destroy`/`get_buffer` are required. `set_opaque`/`test_opaque`/`modified` are
/// advisory hooks with no-op/`None` defaults.
pub trait BitmapProvider {
    type Handle;

    /// Allocates an opaque bitmap of `width * height` 32-bit RGBA pixels. `None` on OOM.
    fn create(&mut self, width: u32, height: u32) -> Option<Self::Handle>;

    /// Frees a bitmap previously returned by `create`.
    fn destroy(&mut self, handle: Self::Handle);

    /// Mutable access to `width * height * 4` bytes of pixel storage, stable for the handle's
    /// lifetime.
    fn get_buffer<'a>(&'a mut self, handle: &'a mut Self::Handle) -> &'a mut [u8];

    /// Advises the embedder that the current composite has no transparent pixels.
    fn set_opaque(&mut self, _handle: &mut Self::Handle, _opaque: bool) {}

    /// Asks the embedder whether the composite is fully opaque, if it tracks that itself.
    fn test_opaque(&mut self, _handle: &Self::Handle) -> Option<bool> {
        None
    }

    /// Fired after every successful decode.
    fn modified(&mut self, _handle: &mut Self::Handle) {}
}
