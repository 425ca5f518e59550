//! Experiment engine
//!
//! Owns the catalog, the process-wide engine configuration and the experiment
//! store. Lifecycle transitions, state reads and analysis go through here; the
//! per-participant protocol lives in [`Trial`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::calculator::{
    AnalysisReport, BaseSelection, CalculatorKind, VariantCounts,
};
use crate::domain::experiment::{
    fields, Experiment, ExperimentDefinition, ExperimentEvent, ExperimentName, ExperimentPolicy,
    ExperimentStatus, ExperimentValidationError, Goal, GoalName, LifecycleState, Metadata,
    Variant, VariantName,
};
use crate::domain::store::{parse_counter, parse_timestamp, ExperimentStore, ExperimentStoreExt};
use crate::domain::DomainError;
use crate::infrastructure::bucketing::DEFAULT_FAIRNESS_CONSTANT;
use crate::infrastructure::calculator::{create_calculator, DEFAULT_CONFIDENCE};

use super::catalog::{Catalog, LifecycleFilter};
use super::participant::Participant;
use super::trial::Trial;

// ============================================================================
// Configuration
// ============================================================================

/// Whether a participant may take part in several experiments at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipleExperiments {
    #[default]
    Allow,
    /// Only when every other binding is to a control variant
    ControlOnly,
    Deny,
}

/// Process-wide engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// When disabled every choice is control and nothing is recorded
    pub enabled: bool,
    pub multiple_experiments: MultipleExperiments,
    /// Prior added to both Beta parameters by the bandit
    pub bandit_fairness_constant: f64,
    /// Confidence level, in percent, a best variant needs to become the choice
    pub confidence_level: f64,
    pub base_selection: BaseSelection,
    pub calculator: CalculatorKind,
    /// Policy declarations inherit from
    pub default_policy: ExperimentPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiple_experiments: MultipleExperiments::default(),
            bandit_fairness_constant: DEFAULT_FAIRNESS_CONSTANT,
            confidence_level: DEFAULT_CONFIDENCE,
            base_selection: BaseSelection::default(),
            calculator: CalculatorKind::default(),
            default_policy: ExperimentPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(self.bandit_fairness_constant.is_finite() && self.bandit_fairness_constant > 0.0) {
            return Err(DomainError::configuration(format!(
                "bandit_fairness_constant must be positive, got {}",
                self.bandit_fairness_constant
            )));
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 100.0) {
            return Err(DomainError::configuration(format!(
                "confidence_level must be between 0 and 100, got {}",
                self.confidence_level
            )));
        }

        Ok(())
    }
}

/// Per-call overrides of the configured analysis settings
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    pub calculator: Option<CalculatorKind>,
    pub confidence: Option<f64>,
    pub base: Option<BaseSelection>,
}

// ============================================================================
// Engine
// ============================================================================

/// Entry point of the experiment engine
pub struct ExperimentEngine<S: ExperimentStore + ?Sized = dyn ExperimentStore> {
    config: EngineConfig,
    catalog: Catalog,
    store: Arc<S>,
}

impl<S: ExperimentStore + ?Sized> std::fmt::Debug for ExperimentEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentEngine")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl<S: ExperimentStore + ?Sized> ExperimentEngine<S> {
    pub fn new(config: EngineConfig, catalog: Catalog, store: Arc<S>) -> Self {
        Self {
            config,
            catalog,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn experiment(&self, name: &str) -> Result<&Experiment, DomainError> {
        self.catalog
            .get(name)
            .ok_or_else(|| DomainError::not_found(format!("Experiment '{}' not found", name)))
    }

    /// Start a trial of the experiment `name` (or the single member of a group)
    pub fn trial(&self, name: &str, participant: Participant) -> Result<Trial<'_, S>, DomainError> {
        let experiment = match self.catalog.get(name) {
            Some(experiment) => experiment,
            None => self.catalog.find_one(name)?,
        };

        Ok(Trial::new(self, experiment, participant))
    }

    /// Convert every experiment `name_or_group` resolves to
    ///
    /// Experiments that do not declare `goal` are reported as not converted.
    pub async fn convert_all(
        &self,
        name_or_group: &str,
        participant: &Participant,
        goal: Option<&str>,
        metadata: &Metadata,
    ) -> Result<Vec<(ExperimentName, bool)>, DomainError> {
        let experiments = self.catalog.resolve(name_or_group);
        if experiments.is_empty() {
            return Err(DomainError::no_experiments(name_or_group));
        }

        let mut results = Vec::with_capacity(experiments.len());

        for experiment in experiments {
            let trial = Trial::new(self, experiment, participant.clone());
            let converted = match trial.convert(goal, metadata.clone()).await {
                Ok(converted) => converted,
                Err(DomainError::InvalidGoal { message, .. }) => {
                    debug!(experiment = %experiment.name(), reason = %message, "Skipping group conversion");
                    false
                }
                Err(e) => return Err(e),
            };
            results.push((experiment.name().clone(), converted));
        }

        Ok(results)
    }

    // ========================================================================
    // State
    // ========================================================================

    /// The experiment whose timestamps govern `experiment`
    fn lifecycle_owner<'a>(&'a self, experiment: &'a Experiment) -> Result<&'a Experiment, DomainError> {
        match experiment.definition().parent() {
            Some(parent) => self.experiment(parent.as_str()),
            None => Ok(experiment),
        }
    }

    /// Read the lifecycle snapshot of `experiment`
    pub async fn state(&self, experiment: &Experiment) -> Result<LifecycleState, DomainError> {
        let owner = self.lifecycle_owner(experiment)?;
        let stored = self.store.get_all(owner.name().as_str()).await?;

        let winner = if owner.name() == experiment.name() {
            stored.get(fields::WINNER).cloned()
        } else {
            self.store
                .get(experiment.name().as_str(), fields::WINNER)
                .await?
        };

        let combined_winners = if experiment.definition().combined().is_empty() {
            None
        } else {
            let mut all_decided = true;
            for child in experiment.definition().combined() {
                if !self.store.exists(child.as_str(), fields::WINNER).await? {
                    all_decided = false;
                    break;
                }
            }
            Some(all_decided)
        };

        Ok(LifecycleState {
            started_at: stored_timestamp(&stored, fields::STARTED_AT)?,
            paused_at: stored_timestamp(&stored, fields::PAUSED_AT)?,
            stopped_at: stored_timestamp(&stored, fields::STOPPED_AT)?,
            winner: winner
                .map(|raw| {
                    VariantName::new(raw).map_err(|e| {
                        DomainError::internal(format!(
                            "Invalid winner stored for '{}': {}",
                            experiment.name(),
                            e
                        ))
                    })
                })
                .transpose()?,
            combined_winners,
        })
    }

    pub async fn status(&self, experiment: &Experiment) -> Result<ExperimentStatus, DomainError> {
        let state = self.state(experiment).await?;
        Ok(state.status(experiment.definition().policy(), Utc::now()))
    }

    /// Experiments whose stored state matches `filter`, in catalog order
    pub async fn select(&self, filter: LifecycleFilter) -> Result<Vec<&Experiment>, DomainError> {
        let now = Utc::now();
        let mut selected = Vec::new();

        for experiment in self.catalog.all() {
            let state = self.state(experiment).await?;
            if filter.matches(&state, experiment.definition().policy(), now) {
                selected.push(experiment);
            }
        }

        Ok(selected)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Persist the definition and the creation time
    pub async fn save(&self, experiment: &Experiment) -> Result<(), DomainError> {
        let key = experiment.name().as_str();
        let definition = serde_json::to_string(experiment.definition()).map_err(|e| {
            DomainError::internal(format!("Failed to serialize experiment definition: {}", e))
        })?;

        self.store.set(key, fields::DEFINITION, &definition).await?;
        self.store
            .setnx(key, fields::CREATED_AT, &Utc::now().to_rfc3339())
            .await?;

        Ok(())
    }

    /// Start now; `false` when already started
    ///
    /// A scheduled experiment starts early. A scheduled stop that would then
    /// lie in the past is dropped.
    pub async fn start(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let owner = self.lifecycle_owner(experiment)?;
        let key = owner.name().as_str();
        let now = Utc::now();

        let state = self.state(owner).await?;
        if state.is_started(now) {
            debug!(experiment = %owner.name(), "Experiment already started");
            return Ok(false);
        }

        self.save(owner).await?;
        self.store.set_timestamp(key, fields::STARTED_AT, now).await?;
        if state.stopped_at.is_some_and(|at| at <= now) {
            self.store.delete(key, fields::STOPPED_AT).await?;
        }

        info!(experiment = %owner.name(), "Experiment started");
        owner.emit(&ExperimentEvent::Start);

        Ok(true)
    }

    /// Start at `start_at`, optionally stopping at `stop_at`
    pub async fn schedule(
        &self,
        experiment: &Experiment,
        start_at: DateTime<Utc>,
        stop_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DomainError> {
        if stop_at.is_some_and(|stop_at| stop_at <= start_at) {
            return Err(ExperimentValidationError::InvalidSchedule.into());
        }

        let owner = self.lifecycle_owner(experiment)?;
        let key = owner.name().as_str();

        let started = self
            .store
            .get_timestamp(key, fields::STARTED_AT)
            .await?
            .is_some_and(|at| at <= Utc::now());
        if started {
            return Ok(false);
        }

        self.save(owner).await?;
        self.store
            .set_timestamp(key, fields::STARTED_AT, start_at)
            .await?;
        match stop_at {
            Some(stop_at) => {
                self.store
                    .set_timestamp(key, fields::STOPPED_AT, stop_at)
                    .await?
            }
            None => self.store.delete(key, fields::STOPPED_AT).await?,
        }

        info!(experiment = %owner.name(), start_at = %start_at, "Experiment scheduled");
        owner.emit(&ExperimentEvent::Schedule { start_at, stop_at });

        Ok(true)
    }

    /// Pause a running experiment; requires `can_resume`
    pub async fn pause(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let owner = self.lifecycle_owner(experiment)?;
        if !owner.definition().policy().can_resume {
            return Ok(false);
        }

        let state = self.state(owner).await?;
        if !state.is_running(Utc::now()) {
            return Ok(false);
        }

        self.store
            .set_timestamp(owner.name().as_str(), fields::PAUSED_AT, Utc::now())
            .await?;

        info!(experiment = %owner.name(), "Experiment paused");
        owner.emit(&ExperimentEvent::Pause);

        Ok(true)
    }

    /// Resume a paused experiment; requires `can_resume`
    pub async fn resume(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let owner = self.lifecycle_owner(experiment)?;
        if !owner.definition().policy().can_resume {
            return Ok(false);
        }

        let state = self.state(owner).await?;
        if !state.is_paused(Utc::now()) {
            return Ok(false);
        }

        self.store
            .delete(owner.name().as_str(), fields::PAUSED_AT)
            .await?;

        info!(experiment = %owner.name(), "Experiment resumed");
        owner.emit(&ExperimentEvent::Resume);

        Ok(true)
    }

    /// Stop a started experiment
    pub async fn stop(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let owner = self.lifecycle_owner(experiment)?;
        let state = self.state(owner).await?;
        let now = Utc::now();

        if !state.is_started(now) || state.is_stopped(now) {
            return Ok(false);
        }

        self.store
            .set_timestamp(owner.name().as_str(), fields::STOPPED_AT, now)
            .await?;

        info!(experiment = %owner.name(), "Experiment stopped");
        owner.emit(&ExperimentEvent::Stop);

        Ok(true)
    }

    /// Declare `variant` the winner of `experiment`
    pub async fn declare_winner(
        &self,
        experiment: &Experiment,
        variant: &str,
    ) -> Result<(), DomainError> {
        let definition = experiment.definition();
        let variant = definition.variant(variant).ok_or_else(|| {
            DomainError::validation(format!(
                "Variant '{}' does not belong to experiment '{}'",
                variant,
                definition.name()
            ))
        })?;

        self.store
            .set(
                definition.name().as_str(),
                fields::WINNER,
                variant.name().as_str(),
            )
            .await?;

        info!(experiment = %definition.name(), variant = %variant.name(), "Winner declared");
        experiment.emit(&ExperimentEvent::Winner { variant });

        Ok(())
    }

    /// Remove a declared winner; `false` when there was none
    pub async fn clear_winner(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let key = experiment.name().as_str();

        if !self.store.exists(key, fields::WINNER).await? {
            return Ok(false);
        }

        self.store.delete(key, fields::WINNER).await?;
        info!(experiment = %experiment.name(), "Winner cleared");

        Ok(true)
    }

    /// Destroy the stored state and every variant counter
    pub async fn delete(&self, experiment: &Experiment) -> Result<(), DomainError> {
        let definition = experiment.definition();

        self.store.destroy(definition.name().as_str()).await?;
        for variant in definition.variants() {
            self.store
                .destroy(&definition.variant_key(variant.name()))
                .await?;
        }

        info!(experiment = %definition.name(), "Experiment deleted");
        experiment.emit(&ExperimentEvent::Delete);

        Ok(())
    }

    /// Delete, then persist the definition again
    pub async fn reset(&self, experiment: &Experiment) -> Result<(), DomainError> {
        self.delete(experiment).await?;
        self.save(experiment).await?;

        info!(experiment = %experiment.name(), "Experiment reset");
        experiment.emit(&ExperimentEvent::Reset);

        Ok(())
    }

    // ========================================================================
    // Counters and analysis
    // ========================================================================

    pub(crate) async fn increment_participants(
        &self,
        definition: &ExperimentDefinition,
        variant: &Variant,
    ) -> Result<i64, DomainError> {
        self.store
            .increment(
                &definition.variant_key(variant.name()),
                fields::PARTICIPANTS,
                1,
            )
            .await
    }

    pub(crate) async fn increment_converted(
        &self,
        definition: &ExperimentDefinition,
        variant: &Variant,
        goal: Option<&GoalName>,
    ) -> Result<i64, DomainError> {
        self.store
            .increment(
                &definition.variant_key(variant.name()),
                &fields::converted(goal.map(GoalName::as_str)),
                1,
            )
            .await
    }

    /// Participation and conversion counters of every variant, in declaration order
    pub async fn variant_counts(
        &self,
        definition: &ExperimentDefinition,
        goal: Option<&GoalName>,
    ) -> Result<Vec<VariantCounts>, DomainError> {
        let converted_field = fields::converted(goal.map(GoalName::as_str));
        let mut counts = Vec::with_capacity(definition.variants().len());

        for variant in definition.variants() {
            let stored = self
                .store
                .get_all(&definition.variant_key(variant.name()))
                .await?;

            counts.push(
                VariantCounts::new(
                    variant.name().clone(),
                    stored_counter(&stored, fields::PARTICIPANTS)?,
                    stored_counter(&stored, &converted_field)?,
                )
                .with_control(variant.is_control()),
            );
        }

        Ok(counts)
    }

    /// Compare the variants of `experiment` on `goal`
    pub async fn analyze(
        &self,
        experiment: &Experiment,
        goal: Option<&str>,
        options: &AnalysisOptions,
    ) -> Result<AnalysisReport, DomainError> {
        let definition = experiment.definition();
        let goal = resolve_goal(definition, goal)?.map(|goal| goal.name().clone());
        let counts = self.variant_counts(definition, goal.as_ref()).await?;

        let calculator = create_calculator(
            options.calculator.unwrap_or(self.config.calculator),
            options.confidence.unwrap_or(self.config.confidence_level),
            options.base.unwrap_or(self.config.base_selection),
        );

        let report = calculator.analyze(&counts)?.with_goal(goal);
        debug!(
            experiment = %definition.name(),
            calculator = %report.calculator,
            choice = ?report.choice,
            "Analysis complete"
        );

        Ok(report)
    }
}

/// Resolve the checkpoint of a conversion or analysis against the declared goals
pub(crate) fn resolve_goal<'a>(
    definition: &'a ExperimentDefinition,
    goal: Option<&str>,
) -> Result<Option<&'a Goal>, DomainError> {
    match (definition.goals().is_empty(), goal) {
        (true, None) => Ok(None),
        (true, Some(goal)) => Err(DomainError::invalid_goal(
            definition.name().as_str(),
            format!("no goals are declared, got '{}'", goal),
        )),
        (false, None) => Err(DomainError::invalid_goal(
            definition.name().as_str(),
            "a goal is required",
        )),
        (false, Some(goal)) => definition.goal(goal).map(Some).ok_or_else(|| {
            DomainError::invalid_goal(
                definition.name().as_str(),
                format!("unknown goal '{}'", goal),
            )
        }),
    }
}

fn stored_timestamp(
    stored: &HashMap<String, String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    stored
        .get(field)
        .map(|raw| parse_timestamp(field, raw))
        .transpose()
}

fn stored_counter(stored: &HashMap<String, String>, field: &str) -> Result<u64, DomainError> {
    stored
        .get(field)
        .map(|raw| parse_counter(field, raw))
        .transpose()
        .map(Option::unwrap_or_default)
}
