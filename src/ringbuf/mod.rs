//! Lock-free per-worker rings living in shared memory

pub mod queue;


pub use queue::RingQueue;
