//! Steady-state loops: the owner's distributor and the workers' consumers

pub mod distributor;
pub mod idle;
pub mod worker;

pub use distributor::{Distributor, DistributorStats};
pub use idle::{BackoffIdle, BusySpin, IdleStrategy, SleepIdle, YieldIdle};
pub use worker::Worker;
