/// 工具模块
/// Utility modules
pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
