pub mod metrics;
pub mod work_queue;

pub use metrics::*;
pub use work_queue::*;
