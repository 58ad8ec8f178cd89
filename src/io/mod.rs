//! Stream abstractions for windowed, in-place access to a container.

mod slice;
mod stream;

pub use slice::RecordSlice;
pub use stream::ContainerStream;
