//! Integration tests module

pub mod admission_test;
pub mod exclusion_test;
pub mod fixtures;
pub mod rpc_test;
pub mod session_race_test;
pub mod timesync_test;
