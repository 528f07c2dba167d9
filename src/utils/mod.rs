pub mod keyed_lock;

pub use keyed_lock::KeyedLock;
