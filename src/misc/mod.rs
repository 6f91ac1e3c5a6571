mod hashmap;
pub mod dispatch_queue;

pub use hashmap::*;
