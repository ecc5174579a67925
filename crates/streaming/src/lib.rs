pub mod cache;
pub mod config;
pub mod loader;
pub mod offset;
pub mod projection;
pub mod protocol;
pub mod queue;
pub mod record;
pub mod request;
pub mod sampler;
pub mod sequence;
pub mod tile;

pub use cache::*;
pub use config::*;
pub use loader::*;
pub use offset::*;
pub use projection::*;
pub use protocol::*;
pub use queue::*;
pub use record::*;
pub use request::*;
pub use sampler::*;
pub use sequence::*;
pub use tile::*;
