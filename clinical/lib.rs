#![deny(dead_code)]
#![deny(unused_imports)]

pub mod artifact;
pub mod data;
pub mod infer;
pub mod metrics;
pub mod models;
pub mod proportion;
pub mod report;
pub mod scenario;
pub mod threshold;
pub mod validate;
