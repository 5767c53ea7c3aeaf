//! The encoded frame buffer and the raw snapshot that feeds it.

/// A snapshot of a binding's pixels, already converted to tightly packed
/// top-down RGB by the input collector.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An encoded frame, immutable once published. Shared by reference
/// counted handle: one encode can serve every request pending at the
/// moment it is produced, so the time-code is not part of this type --
/// it is supplied per delivery by the request that consumes the buffer.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub subtype: u16,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}
