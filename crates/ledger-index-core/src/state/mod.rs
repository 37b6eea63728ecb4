// # Pin Store Implementations
//
// Implementations of the PinStore trait for different persistence
// strategies.

pub mod file;
pub mod memory;

pub use file::FilePinStore;
pub use memory::MemoryPinStore;
