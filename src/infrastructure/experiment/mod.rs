//! Experiment infrastructure - declaration loading

mod loader;

pub use loader::{
    load_definitions, parse_definitions, ExperimentFile, ExperimentSpec, FileFormat, GoalSpec,
    VariantSpec,
};
