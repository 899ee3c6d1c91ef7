pub mod block_stream;
pub mod broadcast_stream;
pub mod operators;
pub mod vision_stream;
