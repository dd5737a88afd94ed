/// Represents the physical location where variable data is stored.
///
/// Buffers on different devices never alias each other; moving data between
/// devices is always an explicit copy (see [`crate::buffer::Buffer::transfer`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageDevice {
    /// Data is stored in main system memory (RAM). This is the default device.
    #[default]
    CPU,
    /// Data is stored in accelerator memory.
    ///
    /// The GPU backend is modeled as a host-mirrored staging buffer with the
    /// explicit-copy transfer semantics of a real device.
    GPU,
}
