pub mod analysis;
pub mod context;
pub mod decode;
pub mod device;
pub mod features;
pub mod node;
pub mod source;
