//! Infrastructure layer - Algorithms, calculators, stores and services

pub mod bucketing;
pub mod calculator;
pub mod experiment;
pub mod logging;
pub mod services;
pub mod store;
