//! PMP Experiment Engine
//!
//! A/B/n experimentation with:
//! - Weighted, distributed, random, bandit and static bucketing
//! - Sticky assignments, overrides, calibration and combined experiments
//! - Conversion tracking per goal with duplicate and multi-goal rules
//! - Z-score and Bayesian winner analysis
//! - In-memory and Redis stores

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::DomainError;
pub use infrastructure::services::{
    AnalysisOptions, Catalog, ChooseRequest, EngineConfig, ExperimentEngine, LifecycleFilter,
    MultipleExperiments, Participant, Trial,
};
pub use infrastructure::store::{StoreConfig, StoreFactory, Stores};
