//! Experiment catalog
//!
//! Order-preserving registry of experiments with name, group and combined
//! resolution. Registering an experiment that lists combined siblings derives a
//! combined child for each of them unless one was registered explicitly.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::experiment::{
    Experiment, ExperimentDefinition, ExperimentHooks, ExperimentName, ExperimentPolicy,
    ExperimentValidationError, LifecycleState,
};
use crate::domain::DomainError;

// ============================================================================
// Lifecycle filters
// ============================================================================

/// Selection of experiments by lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleFilter {
    /// Started and no winner declared
    Started,
    /// Running and no winner declared
    Running,
    Scheduled,
    Paused,
    Stopped,
    /// Stopped or decided
    Ended,
    /// Neither started nor scheduled
    Unstarted,
    Calibrating,
}

impl LifecycleFilter {
    pub fn matches(
        &self,
        state: &LifecycleState,
        policy: &ExperimentPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            Self::Started => state.is_started(now) && !state.has_winner(),
            Self::Running => state.is_running(now) && !state.has_winner(),
            Self::Scheduled => state.is_scheduled(now),
            Self::Paused => state.is_paused(now),
            Self::Stopped => state.is_stopped(now),
            Self::Ended => state.is_stopped(now) || state.has_winner(),
            Self::Unstarted => !state.is_started(now) && !state.is_scheduled(now),
            Self::Calibrating => state.is_calibrating(policy, now),
        }
    }
}

impl std::fmt::Display for LifecycleFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Running => write!(f, "running"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Ended => write!(f, "ended"),
            Self::Unstarted => write!(f, "unstarted"),
            Self::Calibrating => write!(f, "calibrating"),
        }
    }
}

impl std::str::FromStr for LifecycleFilter {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(Self::Started),
            "running" => Ok(Self::Running),
            "scheduled" => Ok(Self::Scheduled),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "ended" => Ok(Self::Ended),
            "unstarted" => Ok(Self::Unstarted),
            "calibrating" => Ok(Self::Calibrating),
            _ => Err(DomainError::validation(format!(
                "Unknown lifecycle filter: {}. Valid filters: started, running, scheduled, \
                 paused, stopped, ended, unstarted, calibrating",
                s
            ))),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Registry of the experiments known to an engine
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    experiments: Vec<Experiment>,
    index: HashMap<String, usize>,
    derived: HashSet<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from hook-less definitions
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ExperimentDefinition>,
    ) -> Result<Self, DomainError> {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.add(definition)?;
        }
        Ok(catalog)
    }

    /// Register a definition without hooks
    pub fn add(&mut self, definition: ExperimentDefinition) -> Result<(), DomainError> {
        self.register(definition, ExperimentHooks::default())
    }

    /// Register a definition with its hooks
    pub fn register(
        &mut self,
        definition: ExperimentDefinition,
        hooks: ExperimentHooks,
    ) -> Result<(), DomainError> {
        let definition = definition.validated()?;
        let name = definition.name().clone();

        if let Some(parent) = definition.parent() {
            if let Some(parent) = self.get(parent.as_str()) {
                check_variant_count(&definition, parent.definition())?;
            }
        }

        let experiment = Experiment::new(definition).with_hooks(hooks);

        match self.index.get(name.as_str()).copied() {
            // An explicit registration replaces a derived child
            Some(position) if self.derived.contains(name.as_str()) => {
                if let Some(parent) = self.experiments[position].definition().parent() {
                    if experiment.definition().parent() != Some(parent) {
                        return Err(DomainError::conflict(format!(
                            "Experiment '{}' is combined with '{}'",
                            name, parent
                        )));
                    }
                }
                self.derived.remove(name.as_str());
                debug!(experiment = %name, "Replacing derived combined experiment");
                self.experiments[position] = experiment.clone();
            }
            Some(_) => {
                return Err(DomainError::conflict(format!(
                    "Experiment '{}' is already registered",
                    name
                )));
            }
            None => {
                self.index.insert(name.to_string(), self.experiments.len());
                self.experiments.push(experiment.clone());
            }
        }

        for child in experiment.definition().combined() {
            match self.get(child.as_str()) {
                Some(existing) => {
                    if existing.definition().parent() != Some(&name) {
                        return Err(DomainError::conflict(format!(
                            "Experiment '{}' is listed as combined by '{}' but does not follow it",
                            child, name
                        )));
                    }
                    check_variant_count(existing.definition(), experiment.definition())?;
                }
                None => {
                    debug!(experiment = %child, parent = %name, "Deriving combined experiment");
                    self.index.insert(child.to_string(), self.experiments.len());
                    self.derived.insert(child.to_string());
                    self.experiments.push(experiment.derive_combined(child.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Experiment> {
        self.index
            .get(name)
            .and_then(|position| self.experiments.get(*position))
    }

    /// Every experiment `name_or_group` stands for
    ///
    /// An experiment listing combined siblings resolves to those siblings; any
    /// other experiment resolves to itself; anything else is looked up as a group.
    pub fn resolve(&self, name_or_group: &str) -> Vec<&Experiment> {
        match self.get(name_or_group) {
            Some(experiment) if !experiment.definition().combined().is_empty() => experiment
                .definition()
                .combined()
                .iter()
                .filter_map(|child| self.get(child.as_str()))
                .collect(),
            Some(experiment) => vec![experiment],
            None => self.by_group(name_or_group),
        }
    }

    /// The single experiment `name_or_group` stands for
    pub fn find_one(&self, name_or_group: &str) -> Result<&Experiment, DomainError> {
        let mut found = self.resolve(name_or_group);

        match found.len() {
            0 => Err(DomainError::no_experiments(name_or_group)),
            1 => Ok(found.remove(0)),
            count => Err(DomainError::too_many_experiments(name_or_group, count)),
        }
    }

    pub fn by_group(&self, group: &str) -> Vec<&Experiment> {
        self.experiments
            .iter()
            .filter(|experiment| experiment.definition().groups().iter().any(|g| g == group))
            .collect()
    }

    pub fn all(&self) -> &[Experiment] {
        &self.experiments
    }

    /// The experiment a combined experiment follows
    pub fn parent_of(&self, experiment: &Experiment) -> Option<&Experiment> {
        experiment
            .definition()
            .parent()
            .and_then(|parent| self.get(parent.as_str()))
    }

    /// Whether `name` was derived from a parent's combined list
    pub fn is_derived(&self, name: &str) -> bool {
        self.derived.contains(name)
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

fn check_variant_count(
    child: &ExperimentDefinition,
    parent: &ExperimentDefinition,
) -> Result<(), DomainError> {
    if child.variants().len() != parent.variants().len() {
        return Err(ExperimentValidationError::CombinedVariantMismatch(
            child.name().to_string(),
            child.variants().len(),
            parent.variants().len(),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{Variant, VariantName};
    use chrono::Duration;

    fn definition(name: &str, variants: &[&str]) -> ExperimentDefinition {
        variants.iter().fold(
            ExperimentDefinition::new(ExperimentName::new(name).unwrap()),
            |def, variant| def.with_variant(Variant::new(VariantName::new(*variant).unwrap())),
        )
    }

    mod registry_tests {
        use super::*;

        #[test]
        fn test_register_and_get() {
            let mut catalog = Catalog::new();
            catalog.add(definition("banner", &["a", "b"])).unwrap();
            catalog.add(definition("pricing", &["x", "y"])).unwrap();

            assert_eq!(catalog.len(), 2);
            assert_eq!(catalog.all()[1].name(), "pricing");
            assert!(catalog.get("banner").is_some());
            assert!(catalog.get("missing").is_none());
        }

        #[test]
        fn test_duplicate_registration_conflicts() {
            let mut catalog = Catalog::new();
            catalog.add(definition("banner", &["a"])).unwrap();

            let result = catalog.add(definition("banner", &["a", "b"]));
            assert!(matches!(result, Err(DomainError::Conflict { .. })));
        }

        #[test]
        fn test_invalid_definition_rejected() {
            let mut catalog = Catalog::new();
            let result = catalog.add(definition("banner", &[]));
            assert!(matches!(result, Err(DomainError::Validation { .. })));
            assert!(catalog.is_empty());
        }
    }

    mod combined_tests {
        use super::*;

        fn parent() -> ExperimentDefinition {
            definition("checkout", &["a", "b"])
                .with_combined(ExperimentName::new("checkout-button").unwrap())
                .with_combined(ExperimentName::new("checkout-copy").unwrap())
        }

        #[test]
        fn test_children_derived() {
            let catalog = Catalog::from_definitions([parent()]).unwrap();

            assert_eq!(catalog.len(), 3);
            let child = catalog.get("checkout-button").unwrap();
            assert_eq!(child.definition().parent().unwrap(), "checkout");
            assert_eq!(child.definition().variants().len(), 2);
            assert!(catalog.is_derived("checkout-copy"));
            assert_eq!(catalog.parent_of(child).unwrap().name(), "checkout");
        }

        #[test]
        fn test_explicit_child_replaces_derived() {
            let mut catalog = Catalog::from_definitions([parent()]).unwrap();
            let explicit = definition("checkout-copy", &["short", "long"])
                .combined_with(ExperimentName::new("checkout").unwrap());

            catalog.add(explicit).unwrap();

            assert_eq!(catalog.len(), 3);
            assert!(!catalog.is_derived("checkout-copy"));
            assert_eq!(
                catalog.get("checkout-copy").unwrap().definition().variants()[0].name(),
                "short"
            );
        }

        #[test]
        fn test_explicit_child_before_parent_kept() {
            let explicit = definition("checkout-copy", &["short", "long"])
                .combined_with(ExperimentName::new("checkout").unwrap());
            let catalog = Catalog::from_definitions([explicit, parent()]).unwrap();

            assert!(!catalog.is_derived("checkout-copy"));
            assert!(catalog.is_derived("checkout-button"));
        }

        #[test]
        fn test_child_variant_count_must_match() {
            let mut catalog = Catalog::from_definitions([parent()]).unwrap();
            let explicit = definition("checkout-copy", &["only"])
                .combined_with(ExperimentName::new("checkout").unwrap());

            let result = catalog.add(explicit);
            assert!(matches!(result, Err(DomainError::Validation { .. })));
        }

        #[test]
        fn test_standalone_sibling_conflicts() {
            let standalone = definition("checkout-copy", &["a", "b"]);
            let result = Catalog::from_definitions([standalone, parent()]);
            assert!(matches!(result, Err(DomainError::Conflict { .. })));
        }

        #[test]
        fn test_resolve_parent_yields_children() {
            let catalog = Catalog::from_definitions([parent()]).unwrap();

            let names: Vec<_> = catalog
                .resolve("checkout")
                .iter()
                .map(|e| e.name().to_string())
                .collect();
            assert_eq!(names, vec!["checkout-button", "checkout-copy"]);

            let result = catalog.find_one("checkout");
            assert!(matches!(
                result,
                Err(DomainError::TooManyExperiments { count: 2, .. })
            ));
            assert_eq!(catalog.find_one("checkout-copy").unwrap().name(), "checkout-copy");
        }
    }

    mod group_tests {
        use super::*;

        #[test]
        fn test_group_resolution() {
            let catalog = Catalog::from_definitions([
                definition("banner", &["a"]).with_group("homepage"),
                definition("hero", &["a"]).with_group("homepage"),
                definition("pricing", &["a"]).with_group("billing"),
            ])
            .unwrap();

            assert_eq!(catalog.by_group("homepage").len(), 2);
            assert_eq!(catalog.find_one("billing").unwrap().name(), "pricing");
            assert!(matches!(
                catalog.find_one("homepage"),
                Err(DomainError::TooManyExperiments { .. })
            ));
            assert!(matches!(
                catalog.find_one("nothing"),
                Err(DomainError::NoExperiments { .. })
            ));
        }
    }

    mod filter_tests {
        use super::*;

        #[test]
        fn test_winner_excluded_from_running_and_started() {
            let now = Utc::now();
            let policy = ExperimentPolicy::default();
            let mut state = LifecycleState {
                started_at: Some(now - Duration::minutes(5)),
                ..Default::default()
            };

            assert!(LifecycleFilter::Running.matches(&state, &policy, now));
            assert!(LifecycleFilter::Started.matches(&state, &policy, now));
            assert!(!LifecycleFilter::Ended.matches(&state, &policy, now));

            state.winner = Some(VariantName::new("a").unwrap());
            assert!(!LifecycleFilter::Running.matches(&state, &policy, now));
            assert!(!LifecycleFilter::Started.matches(&state, &policy, now));
            assert!(LifecycleFilter::Ended.matches(&state, &policy, now));
        }

        #[test]
        fn test_unstarted_and_scheduled() {
            let now = Utc::now();
            let policy = ExperimentPolicy::default();
            let fresh = LifecycleState::default();
            let scheduled = LifecycleState {
                started_at: Some(now + Duration::hours(1)),
                ..Default::default()
            };

            assert!(LifecycleFilter::Unstarted.matches(&fresh, &policy, now));
            assert!(!LifecycleFilter::Unstarted.matches(&scheduled, &policy, now));
            assert!(LifecycleFilter::Scheduled.matches(&scheduled, &policy, now));
            assert!(!LifecycleFilter::Calibrating.matches(&fresh, &policy, now));
        }

        #[test]
        fn test_filter_parsing() {
            assert_eq!(
                "Calibrating".parse::<LifecycleFilter>().unwrap(),
                LifecycleFilter::Calibrating
            );
            assert!("archived".parse::<LifecycleFilter>().is_err());
        }
    }
}
