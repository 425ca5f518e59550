//! Per-participant trial of one experiment
//!
//! A trial binds a participant to an experiment for the duration of a request
//! and runs the assignment (`choose`) and conversion (`convert`) protocols.
//! Store failures at either entry point are reported through the store
//! failover hook and degrade to control or a refused conversion.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::domain::experiment::{
    ConversionContext, Experiment, ExperimentEvent, Metadata, ParticipantBinding, Variant,
};
use crate::domain::store::ExperimentStore;
use crate::domain::DomainError;
use crate::infrastructure::bucketing::{Algorithm, Candidate};

use super::engine::{resolve_goal, ExperimentEngine, MultipleExperiments};
use super::participant::Participant;

/// Request-side inputs of an assignment
#[derive(Debug, Clone, Default)]
pub struct ChooseRequest {
    /// Variant forced by the caller, e.g. from a query parameter
    pub override_variant: Option<String>,
    /// Caller-side exclusion, such as a bot or an internal address
    pub excluded: bool,
    pub metadata: Metadata,
}

impl ChooseRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, variant: impl Into<String>) -> Self {
        self.override_variant = Some(variant.into());
        self
    }

    pub fn with_excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One participant facing one experiment
pub struct Trial<'e, S: ExperimentStore + ?Sized> {
    engine: &'e ExperimentEngine<S>,
    experiment: &'e Experiment,
    participant: Participant,
}

impl<'e, S: ExperimentStore + ?Sized> Trial<'e, S> {
    pub fn new(
        engine: &'e ExperimentEngine<S>,
        experiment: &'e Experiment,
        participant: Participant,
    ) -> Self {
        Self {
            engine,
            experiment,
            participant,
        }
    }

    pub fn experiment(&self) -> &'e Experiment {
        self.experiment
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    fn control(&self) -> Result<&'e Variant, DomainError> {
        self.experiment
            .definition()
            .control_variant()
            .ok_or_else(|| {
                DomainError::internal(format!(
                    "Experiment '{}' has no variants",
                    self.experiment.name()
                ))
            })
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Decide which variant the participant sees
    pub async fn choose(&self, request: &ChooseRequest) -> Result<Variant, DomainError> {
        let control = self.control()?;

        if !self.engine.config().enabled {
            return Ok(control.clone());
        }

        let variant = match self.choose_variant(request).await {
            Ok(variant) => variant,
            Err(error) if error.is_storage() => {
                warn!(experiment = %self.experiment.name(), error = %error, "Store failover while choosing");
                self.experiment
                    .emit(&ExperimentEvent::StoreFailover { error: &error });

                request
                    .override_variant
                    .as_deref()
                    .and_then(|name| self.experiment.definition().variant(name))
                    .unwrap_or(control)
                    .clone()
            }
            Err(error) => return Err(error),
        };

        self.experiment
            .emit(&ExperimentEvent::Use { variant: &variant });

        Ok(variant)
    }

    /// Boxed `choose`, used by combined experiments to ask their parent
    fn choose_boxed<'a>(
        &'a self,
        request: &'a ChooseRequest,
    ) -> BoxFuture<'a, Result<Variant, DomainError>> {
        Box::pin(self.choose(request))
    }

    async fn choose_variant(&self, request: &ChooseRequest) -> Result<Variant, DomainError> {
        let definition = self.experiment.definition();
        let name = definition.name();
        let policy = definition.policy();
        let control = self.control()?;
        let mut state = self.engine.state(self.experiment).await?;
        let mut now = Utc::now();

        if let Some(requested) = request.override_variant.as_deref() {
            let Some(variant) = definition.variant(requested) else {
                debug!(experiment = %name, variant = %requested, "Unknown override, using control");
                return Ok(control.clone());
            };

            if state.is_running(now) && !definition.is_combined() {
                if policy.track_override {
                    self.engine.increment_participants(definition, variant).await?;
                }
                if policy.store_override {
                    self.participant
                        .bind(name, &ParticipantBinding::new(variant.name().clone(), now))
                        .await?;
                }
            }

            debug!(experiment = %name, variant = %variant.name(), "Using override");
            return Ok(variant.clone());
        }

        if state.has_winner() {
            if let Some(winner) = state.winner.as_ref() {
                return self.choose_winner(winner.as_str(), request, now).await;
            }
        }

        if (request.excluded && !policy.skip_request_filter) || state.is_stopped(now) {
            return Ok(control.clone());
        }

        if state.is_scheduled(now) {
            return Ok(control.clone());
        }

        if !state.is_started(now) {
            if policy.start_manually {
                if state.is_calibrating(policy, now) {
                    self.calibrate(control, now).await?;
                }
                return Ok(control.clone());
            }

            self.engine.start(self.experiment).await?;
            state = self.engine.state(self.experiment).await?;
            now = Utc::now();

            if !state.is_running(now) {
                return Ok(control.clone());
            }
        }

        if !state.is_running(now) {
            return Ok(control.clone());
        }

        if policy.sticky_assignment {
            let binding = self
                .participant
                .binding(name)
                .await?
                .filter(|binding| !binding.is_stale(state.started_at));

            if let Some(mut binding) = binding {
                if let Some(variant) = definition.variant(binding.variant().as_str()) {
                    binding.touch(now);
                    self.participant.bind(name, &binding).await?;
                    debug!(experiment = %name, variant = %variant.name(), "Reusing sticky assignment");
                    return Ok(variant.clone());
                }
            }
        }

        let seed = self.multiple_experiments_allowed().await?;
        if !self
            .experiment
            .hooks()
            .participation_allowed(definition, seed, &request.metadata)
        {
            debug!(experiment = %name, "Participation refused");
            return Ok(control.clone());
        }

        let variant = match definition.parent() {
            Some(parent) => {
                let parent = self.engine.experiment(parent.as_str())?;
                let trial = Trial::new(self.engine, parent, self.participant.clone());
                let parent_request = ChooseRequest {
                    override_variant: None,
                    ..request.clone()
                };
                let chosen = trial.choose_boxed(&parent_request).await?;

                parent
                    .definition()
                    .variant_index(chosen.name().as_str())
                    .and_then(|index| definition.variants().get(index))
                    .unwrap_or(control)
                    .clone()
            }
            None => self.bucket(&request.metadata).await?,
        };

        if self
            .experiment
            .hooks()
            .participation_tracked(definition, &variant)
        {
            self.engine.increment_participants(definition, &variant).await?;
        }

        if policy.sticky_assignment {
            self.participant
                .bind(name, &ParticipantBinding::new(variant.name().clone(), now))
                .await?;
        }

        debug!(experiment = %name, variant = %variant.name(), "Variant chosen");
        self.experiment
            .emit(&ExperimentEvent::Choose { variant: &variant });

        Ok(variant)
    }

    /// Serve a declared winner, through the rollout chain
    async fn choose_winner(
        &self,
        winner: &str,
        request: &ChooseRequest,
        now: DateTime<Utc>,
    ) -> Result<Variant, DomainError> {
        let definition = self.experiment.definition();
        let Some(winner) = definition.variant(winner) else {
            warn!(experiment = %definition.name(), variant = %winner, "Declared winner is not a variant");
            return Ok(self.control()?.clone());
        };

        if definition.policy().track_winner_conversions {
            let binding = self.participant.binding(definition.name()).await?;

            if binding.as_ref().map(ParticipantBinding::variant) != Some(winner.name()) {
                if binding.is_some() {
                    self.participant.exit(definition.name()).await?;
                }
                self.engine.increment_participants(definition, winner).await?;
                self.participant
                    .bind(
                        definition.name(),
                        &ParticipantBinding::new(winner.name().clone(), now),
                    )
                    .await?;
            }
        }

        Ok(self
            .experiment
            .hooks()
            .rolled_out_winner(definition, winner.clone(), &request.metadata))
    }

    /// Count the participant on control before the start
    async fn calibrate(&self, control: &Variant, now: DateTime<Utc>) -> Result<(), DomainError> {
        let definition = self.experiment.definition();
        let binding = self.participant.binding(definition.name()).await?;

        if binding.is_some_and(|binding| binding.variant() == control.name()) {
            return Ok(());
        }

        self.engine.increment_participants(definition, control).await?;

        if let Some(parent) = self.engine.catalog().parent_of(self.experiment) {
            if let Some(parent_control) = parent.definition().control_variant() {
                self.engine
                    .increment_participants(parent.definition(), parent_control)
                    .await?;
            }
        }

        self.participant
            .bind(
                definition.name(),
                &ParticipantBinding::new(control.name().clone(), now),
            )
            .await?;

        debug!(experiment = %definition.name(), "Calibration participant recorded");
        Ok(())
    }

    /// Seed of the participation chain under the multiple-experiments policy
    async fn multiple_experiments_allowed(&self) -> Result<bool, DomainError> {
        let mode = self.engine.config().multiple_experiments;
        if mode == MultipleExperiments::Allow {
            return Ok(true);
        }

        let definition = self.experiment.definition();
        let catalog = self.engine.catalog();
        let bindings = self.participant.bindings().await?;

        let related = |other: &Experiment| {
            other.name() == definition.name()
                || definition.parent() == Some(other.name())
                || other.definition().parent() == Some(definition.name())
                || (definition.parent().is_some()
                    && other.definition().parent() == definition.parent())
        };

        let allowed = bindings
            .iter()
            .filter_map(|(name, binding)| catalog.get(name).map(|other| (other, binding)))
            .filter(|(other, _)| !related(*other))
            .all(|(other, binding)| match mode {
                MultipleExperiments::Allow => true,
                MultipleExperiments::Deny => false,
                MultipleExperiments::ControlOnly => other
                    .definition()
                    .control_variant()
                    .is_some_and(|control| control.name() == binding.variant()),
            });

        Ok(allowed)
    }

    /// Run the experiment's bucketing algorithm
    async fn bucket(&self, metadata: &Metadata) -> Result<Variant, DomainError> {
        let definition = self.experiment.definition();
        let algorithm = Algorithm::from_kind(
            definition.algorithm(),
            self.engine.config().bandit_fairness_constant,
            self.experiment.hooks().static_matcher().cloned(),
        );

        let counts = if algorithm.needs_counters() {
            let goal = definition.goals().first().map(|goal| goal.name());
            self.engine
                .variant_counts(definition, goal)
                .await?
                .into_iter()
                .map(|counts| (counts.participants, counts.converted))
                .collect()
        } else {
            vec![(0, 0); definition.variants().len()]
        };

        let candidates: Vec<Candidate<'_>> = definition
            .variants()
            .iter()
            .zip(counts)
            .map(|(variant, (participants, converted))| {
                Candidate::new(variant).with_counts(participants, converted)
            })
            .collect();

        let index = {
            let mut rng = rand::thread_rng();
            algorithm.choose(&candidates, metadata, &mut rng)
        };

        index
            .and_then(|index| definition.variants().get(index))
            .cloned()
            .ok_or_else(|| {
                DomainError::internal(format!(
                    "No variant chosen for experiment '{}'",
                    definition.name()
                ))
            })
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// Record a conversion of `goal`; `false` when the rules refuse it
    pub async fn convert(&self, goal: Option<&str>, metadata: Metadata) -> Result<bool, DomainError> {
        if !self.engine.config().enabled {
            return Ok(false);
        }

        match self.convert_binding(goal, metadata).await {
            Ok(converted) => Ok(converted),
            Err(error) if error.is_storage() => {
                warn!(experiment = %self.experiment.name(), error = %error, "Store failover while converting");
                self.experiment
                    .emit(&ExperimentEvent::StoreFailover { error: &error });
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    async fn convert_binding(
        &self,
        goal: Option<&str>,
        metadata: Metadata,
    ) -> Result<bool, DomainError> {
        let definition = self.experiment.definition();
        let name = definition.name();
        let policy = definition.policy();
        let state = self.engine.state(self.experiment).await?;
        let now = Utc::now();

        let Some(mut binding) = self.participant.binding(name).await? else {
            debug!(experiment = %name, "Conversion without assignment");
            return Ok(false);
        };

        if !state.is_started(now) {
            let calibrating = state.is_calibrating(policy, now)
                && binding.variant() == self.control()?.name();
            if !calibrating {
                return Ok(false);
            }
        } else {
            if !state.is_running(now) || binding.is_stale(state.started_at) {
                return Ok(false);
            }

            if state.has_winner() {
                let counts = policy.track_winner_conversions
                    && state.winner.as_ref() == Some(binding.variant());
                if !counts {
                    return Ok(false);
                }
            }
        }

        let goal = resolve_goal(definition, goal)?;
        let goal_name = goal.map(|goal| goal.name());

        if binding.has_converted(goal_name) {
            if !definition.allows_multiple_conversions(goal) {
                debug!(experiment = %name, "Duplicate conversion refused");
                return Ok(false);
            }
        } else if binding.has_converted_other(goal_name) && !policy.allow_multiple_goals {
            debug!(experiment = %name, "Conversion of another goal refused");
            return Ok(false);
        }

        let context = ConversionContext {
            variant: binding.variant().clone(),
            goal: goal_name.cloned(),
            metadata,
        };
        if !self.experiment.hooks().conversion_allowed(definition, &context) {
            return Ok(false);
        }

        let Some(variant) = definition.variant(binding.variant().as_str()) else {
            warn!(experiment = %name, variant = %binding.variant(), "Binding to an unknown variant");
            return Ok(false);
        };

        if policy.reset_manually {
            binding.record_conversion(goal_name, now);
            self.participant.bind(name, &binding).await?;
        } else {
            self.participant.exit(name).await?;
        }

        self.engine
            .increment_converted(definition, variant, goal_name)
            .await?;

        debug!(experiment = %name, variant = %variant.name(), goal = ?goal_name, "Conversion recorded");
        self.experiment.hooks().emit_convert(
            definition,
            goal_name,
            &ExperimentEvent::Convert {
                variant,
                goal: goal_name,
            },
        );

        Ok(true)
    }

    /// Forget the participant's assignment
    pub async fn exit(&self) -> Result<(), DomainError> {
        self.participant.exit(self.experiment.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{
        AlgorithmKind, EventKind, ExperimentDefinition, ExperimentHooks, ExperimentName,
        ExperimentPolicy, Goal, GoalName, VariantName,
    };
    use crate::domain::store::{ExperimentStoreExt, MockExperimentStore};
    use crate::infrastructure::services::{Catalog, EngineConfig};
    use crate::infrastructure::store::{InMemoryExperimentStore, InMemoryParticipantStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Engine = ExperimentEngine<InMemoryExperimentStore>;

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn pro() -> Metadata {
        metadata(json!({"plan": "pro"}))
    }

    /// `a` is control; the static algorithm picks `b` for pro requests
    fn definition(name: &str, policy: ExperimentPolicy) -> ExperimentDefinition {
        ExperimentDefinition::new(ExperimentName::new(name).unwrap())
            .with_variant(Variant::new(VariantName::new("a").unwrap()))
            .with_variant(Variant::new(VariantName::new("b").unwrap()).with_metadata(pro()))
            .with_algorithm(AlgorithmKind::Static)
            .with_policy(policy)
    }

    fn engine(definitions: Vec<ExperimentDefinition>) -> Engine {
        engine_with(EngineConfig::default(), Catalog::from_definitions(definitions).unwrap())
    }

    fn engine_with(config: EngineConfig, catalog: Catalog) -> Engine {
        ExperimentEngine::new(config, catalog, Arc::new(InMemoryExperimentStore::new()))
    }

    fn participant() -> Participant {
        Participant::new(Arc::new(InMemoryParticipantStore::new()))
    }

    fn pro_request() -> ChooseRequest {
        ChooseRequest::new().with_metadata(pro())
    }

    async fn participants(engine: &Engine, key: &str) -> u64 {
        engine
            .store()
            .get_counter(key, "participants")
            .await
            .unwrap()
    }

    async fn converted(engine: &Engine, key: &str, field: &str) -> u64 {
        engine.store().get_counter(key, field).await.unwrap()
    }

    async fn start(engine: &Engine, name: &str) {
        assert!(engine.start(engine.experiment(name).unwrap()).await.unwrap());
    }

    mod choose_tests {
        use super::*;

        #[tokio::test]
        async fn test_unstarted_experiment_serves_control() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            let trial = engine.trial("banner", participant()).unwrap();

            let variant = trial.choose(&pro_request()).await.unwrap();

            assert_eq!(variant.name(), "a");
            assert_eq!(participants(&engine, "banner:a").await, 0);
            assert!(engine.store().get_all("banner").await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_auto_start() {
            let policy = ExperimentPolicy {
                start_manually: false,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            let trial = engine.trial("banner", participant()).unwrap();

            let variant = trial.choose(&pro_request()).await.unwrap();

            assert_eq!(variant.name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 1);
            let banner = engine.experiment("banner").unwrap();
            assert!(engine.state(banner).await.unwrap().is_running(Utc::now()));
        }

        #[tokio::test]
        async fn test_sticky_assignment_counts_once() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "b");
            for _ in 0..4 {
                // The binding wins over the request metadata
                assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "b");
            }

            assert_eq!(participants(&engine, "banner:b").await, 1);
            assert_eq!(participants(&engine, "banner:a").await, 0);
        }

        #[tokio::test]
        async fn test_non_sticky_counts_every_choice_without_binding() {
            let policy = ExperimentPolicy {
                sticky_assignment: false,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "b");
            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "b");
            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "a");

            assert_eq!(participants(&engine, "banner:b").await, 2);
            assert_eq!(participants(&engine, "banner:a").await, 1);
            assert!(trial
                .participant()
                .binding(trial.experiment().name())
                .await
                .unwrap()
                .is_none());
            // Nothing to convert without a binding
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
        }

        #[tokio::test]
        async fn test_non_sticky_random_single_variant() {
            let policy = ExperimentPolicy {
                sticky_assignment: false,
                ..Default::default()
            };
            let definition = ExperimentDefinition::new(ExperimentName::new("banner").unwrap())
                .with_variant(Variant::new(VariantName::new("a").unwrap()))
                .with_algorithm(AlgorithmKind::Random)
                .with_policy(policy);
            let engine = engine(vec![definition]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            for _ in 0..3 {
                assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "a");
            }

            assert_eq!(participants(&engine, "banner:a").await, 3);
            assert!(trial
                .participant()
                .bindings()
                .await
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn test_disabled_engine_serves_control_silently() {
            let uses = Arc::new(AtomicUsize::new(0));
            let counter = uses.clone();
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new().on(EventKind::Use, move |_, _| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
            let config = EngineConfig {
                enabled: false,
                ..Default::default()
            };
            let engine = engine_with(config, catalog);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "a");
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
            assert_eq!(participants(&engine, "banner:b").await, 0);
            assert_eq!(uses.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_override() {
            let policy = ExperimentPolicy {
                track_override: true,
                store_override: true,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            let unknown = ChooseRequest::new().with_override("zzz");
            assert_eq!(trial.choose(&unknown).await.unwrap().name(), "a");

            let forced = ChooseRequest::new().with_override("b");
            assert_eq!(trial.choose(&forced).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 1);

            let binding = trial
                .participant()
                .binding(trial.experiment().name())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(binding.variant(), "b");
        }

        #[tokio::test]
        async fn test_override_not_tracked_by_default() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            let forced = ChooseRequest::new().with_override("b");
            assert_eq!(trial.choose(&forced).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 0);
            assert!(trial
                .participant()
                .binding(trial.experiment().name())
                .await
                .unwrap()
                .is_none());
        }

        #[tokio::test]
        async fn test_excluded_request() {
            let engine = engine(vec![
                definition("banner", ExperimentPolicy::default()),
                definition(
                    "pricing",
                    ExperimentPolicy {
                        skip_request_filter: true,
                        ..Default::default()
                    },
                ),
            ]);
            start(&engine, "banner").await;
            start(&engine, "pricing").await;
            let excluded = pro_request().with_excluded(true);

            let banner = engine.trial("banner", participant()).unwrap();
            assert_eq!(banner.choose(&excluded).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "banner:a").await, 0);

            let pricing = engine.trial("pricing", participant()).unwrap();
            assert_eq!(pricing.choose(&excluded).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "pricing:b").await, 1);
        }

        #[tokio::test]
        async fn test_stopped_paused_and_scheduled_serve_control() {
            let resumable = ExperimentPolicy {
                can_resume: true,
                ..Default::default()
            };
            let engine = engine(vec![
                definition("stopped", ExperimentPolicy::default()),
                definition("paused", resumable),
                definition("scheduled", ExperimentPolicy::default()),
            ]);
            start(&engine, "stopped").await;
            start(&engine, "paused").await;
            engine.stop(engine.experiment("stopped").unwrap()).await.unwrap();
            engine.pause(engine.experiment("paused").unwrap()).await.unwrap();
            engine
                .schedule(
                    engine.experiment("scheduled").unwrap(),
                    Utc::now() + chrono::Duration::hours(1),
                    None,
                )
                .await
                .unwrap();

            for name in ["stopped", "paused", "scheduled"] {
                let trial = engine.trial(name, participant()).unwrap();
                assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "a");
                assert_eq!(participants(&engine, &format!("{}:b", name)).await, 0);
            }
        }

        #[tokio::test]
        async fn test_participation_refused_by_hook() {
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new()
                        .allow_participation(|_, allowed, metadata| {
                            allowed && !metadata.contains_key("bot")
                        }),
                )
                .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            let bot = ChooseRequest::new().with_metadata(metadata(json!({"plan": "pro", "bot": true})));
            assert_eq!(trial.choose(&bot).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "banner:a").await, 0);
            assert_eq!(participants(&engine, "banner:b").await, 0);
        }

        #[tokio::test]
        async fn test_untracked_participation_still_sticks() {
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new().track_participation(|_, _, _| false),
                )
                .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "b");
            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 0);
        }

        #[tokio::test]
        async fn test_choose_hooks() {
            let chosen = Arc::new(AtomicUsize::new(0));
            let used = Arc::new(AtomicUsize::new(0));
            let (on_choose, on_use) = (chosen.clone(), used.clone());
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new()
                        .on(EventKind::Choose, move |_, _| {
                            on_choose.fetch_add(1, Ordering::SeqCst);
                        })
                        .on(EventKind::Use, move |_, _| {
                            on_use.fetch_add(1, Ordering::SeqCst);
                        }),
                )
                .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            trial.choose(&pro_request()).await.unwrap();

            assert_eq!(chosen.load(Ordering::SeqCst), 1);
            assert_eq!(used.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_stale_binding_ignored_after_reset() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            engine.reset(trial.experiment()).await.unwrap();
            start(&engine, "banner").await;

            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "banner:a").await, 1);
        }
    }

    mod winner_tests {
        use super::*;

        #[tokio::test]
        async fn test_winner_served_without_counting() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            engine
                .declare_winner(engine.experiment("banner").unwrap(), "b")
                .await
                .unwrap();
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 0);
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
        }

        #[tokio::test]
        async fn test_winner_tracking() {
            let policy = ExperimentPolicy {
                track_winner_conversions: true,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "a");
            engine
                .declare_winner(trial.experiment(), "b")
                .await
                .unwrap();

            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "b");
            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 1);

            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert_eq!(converted(&engine, "banner:b", "converted").await, 1);
        }

        #[tokio::test]
        async fn test_rollout_chain() {
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new().rollout_winner(|definition, winner, metadata| {
                        if metadata.contains_key("beta") {
                            winner
                        } else {
                            definition.variants()[0].clone()
                        }
                    }),
                )
                .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            engine
                .declare_winner(engine.experiment("banner").unwrap(), "b")
                .await
                .unwrap();
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&ChooseRequest::new()).await.unwrap().name(), "a");
            let beta = ChooseRequest::new().with_metadata(metadata(json!({"beta": true})));
            assert_eq!(trial.choose(&beta).await.unwrap().name(), "b");
        }
    }

    mod calibration_tests {
        use super::*;

        #[tokio::test]
        async fn test_calibration_counts_control_once() {
            let policy = ExperimentPolicy {
                enable_calibration: true,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            let trial = engine.trial("banner", participant()).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "banner:a").await, 1);

            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert_eq!(converted(&engine, "banner:a", "converted").await, 1);

            // The calibration binding does not survive the start
            start(&engine, "banner").await;
            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "b");
            assert_eq!(participants(&engine, "banner:b").await, 1);
        }

        #[tokio::test]
        async fn test_combined_calibration_counts_parent_control() {
            let policy = ExperimentPolicy {
                enable_calibration: true,
                ..Default::default()
            };
            let catalog = Catalog::from_definitions([definition("checkout", policy)
                .with_combined(ExperimentName::new("checkout-button").unwrap())])
            .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            let button = engine.trial("checkout-button", participant()).unwrap();

            assert_eq!(button.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(button.choose(&pro_request()).await.unwrap().name(), "a");

            assert_eq!(participants(&engine, "checkout-button:a").await, 1);
            assert_eq!(participants(&engine, "checkout:a").await, 1);
            assert_eq!(participants(&engine, "checkout:b").await, 0);
        }

        #[tokio::test]
        async fn test_no_conversion_before_start_without_calibration() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&ChooseRequest::new()).await.unwrap();
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
        }
    }

    mod convert_tests {
        use super::*;

        fn with_goals(policy: ExperimentPolicy) -> ExperimentDefinition {
            definition("checkout", policy)
                .with_goal(Goal::new(GoalName::new("signup").unwrap()))
                .with_goal(
                    Goal::new(GoalName::new("purchase").unwrap())
                        .with_allow_multiple_conversions(true),
                )
        }

        #[tokio::test]
        async fn test_conversion_requires_assignment() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
        }

        #[tokio::test]
        async fn test_duplicate_conversion_refused() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
            assert_eq!(converted(&engine, "banner:b", "converted").await, 1);
        }

        #[tokio::test]
        async fn test_multiple_conversions_allowed() {
            let policy = ExperimentPolicy {
                allow_multiple_conversions: true,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert_eq!(converted(&engine, "banner:b", "converted").await, 2);
        }

        #[tokio::test]
        async fn test_goal_resolution() {
            let engine = engine(vec![
                with_goals(ExperimentPolicy::default()),
                definition("banner", ExperimentPolicy::default()),
            ]);
            start(&engine, "checkout").await;
            start(&engine, "banner").await;
            let participant = participant();

            let checkout = engine.trial("checkout", participant.clone()).unwrap();
            checkout.choose(&pro_request()).await.unwrap();
            let missing = checkout.convert(None, Metadata::new()).await;
            assert!(matches!(missing, Err(DomainError::InvalidGoal { .. })));
            let unknown = checkout.convert(Some("refund"), Metadata::new()).await;
            assert!(matches!(unknown, Err(DomainError::InvalidGoal { .. })));

            let banner = engine.trial("banner", participant).unwrap();
            banner.choose(&pro_request()).await.unwrap();
            let undeclared = banner.convert(Some("signup"), Metadata::new()).await;
            assert!(matches!(undeclared, Err(DomainError::InvalidGoal { .. })));
        }

        #[tokio::test]
        async fn test_goal_policies() {
            let engine = engine(vec![with_goals(ExperimentPolicy::default())]);
            start(&engine, "checkout").await;
            let trial = engine.trial("checkout", participant()).unwrap();
            trial.choose(&pro_request()).await.unwrap();

            assert!(trial.convert(Some("signup"), Metadata::new()).await.unwrap());
            assert!(!trial.convert(Some("signup"), Metadata::new()).await.unwrap());
            // Another goal needs allow_multiple_goals
            assert!(!trial.convert(Some("purchase"), Metadata::new()).await.unwrap());

            assert_eq!(converted(&engine, "checkout:b", "converted:signup").await, 1);
            assert_eq!(converted(&engine, "checkout:b", "converted:purchase").await, 0);
        }

        #[tokio::test]
        async fn test_multiple_goals() {
            let policy = ExperimentPolicy {
                allow_multiple_goals: true,
                ..Default::default()
            };
            let engine = engine(vec![with_goals(policy)]);
            start(&engine, "checkout").await;
            let trial = engine.trial("checkout", participant()).unwrap();
            trial.choose(&pro_request()).await.unwrap();

            assert!(trial.convert(Some("signup"), Metadata::new()).await.unwrap());
            assert!(trial.convert(Some("purchase"), Metadata::new()).await.unwrap());
            assert!(trial.convert(Some("purchase"), Metadata::new()).await.unwrap());

            assert_eq!(converted(&engine, "checkout:b", "converted:purchase").await, 2);
        }

        #[tokio::test]
        async fn test_automatic_reset_exits() {
            let policy = ExperimentPolicy {
                reset_manually: false,
                ..Default::default()
            };
            let engine = engine(vec![definition("banner", policy)]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            assert!(trial.convert(None, Metadata::new()).await.unwrap());
            assert!(trial
                .participant()
                .binding(trial.experiment().name())
                .await
                .unwrap()
                .is_none());

            // Without a binding the participant is counted again
            trial.choose(&pro_request()).await.unwrap();
            assert_eq!(participants(&engine, "banner:b").await, 2);
        }

        #[tokio::test]
        async fn test_conversion_hooks() {
            let goal_events = Arc::new(AtomicUsize::new(0));
            let experiment_events = Arc::new(AtomicUsize::new(0));
            let (on_goal, on_experiment) = (goal_events.clone(), experiment_events.clone());
            let purchase = GoalName::new("purchase").unwrap();

            let mut catalog = Catalog::new();
            catalog
                .register(
                    with_goals(ExperimentPolicy {
                        allow_multiple_goals: true,
                        ..Default::default()
                    }),
                    ExperimentHooks::new()
                        .on(EventKind::Convert, move |_, _| {
                            on_experiment.fetch_add(1, Ordering::SeqCst);
                        })
                        .on_goal_convert(purchase.clone(), move |_, event| {
                            if let ExperimentEvent::Convert { goal, .. } = event {
                                assert_eq!(goal.unwrap(), "purchase");
                            }
                            on_goal.fetch_add(1, Ordering::SeqCst);
                        })
                        .allow_goal_conversion(purchase, |_, allowed, context| {
                            allowed && context.metadata.contains_key("paid")
                        }),
                )
                .unwrap();
            let engine = engine_with(EngineConfig::default(), catalog);
            start(&engine, "checkout").await;
            let trial = engine.trial("checkout", participant()).unwrap();
            trial.choose(&pro_request()).await.unwrap();

            assert!(!trial.convert(Some("purchase"), Metadata::new()).await.unwrap());
            assert!(trial
                .convert(Some("purchase"), metadata(json!({"paid": true})))
                .await
                .unwrap());
            assert!(trial.convert(Some("signup"), Metadata::new()).await.unwrap());

            assert_eq!(goal_events.load(Ordering::SeqCst), 1);
            assert_eq!(experiment_events.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_exit() {
            let engine = engine(vec![definition("banner", ExperimentPolicy::default())]);
            start(&engine, "banner").await;
            let trial = engine.trial("banner", participant()).unwrap();

            trial.choose(&pro_request()).await.unwrap();
            trial.exit().await.unwrap();
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());
        }

        #[tokio::test]
        async fn test_convert_all_over_group() {
            let engine = engine(vec![
                definition("banner", ExperimentPolicy::default()).with_group("homepage"),
                with_goals(ExperimentPolicy::default()).with_group("homepage"),
            ]);
            start(&engine, "banner").await;
            start(&engine, "checkout").await;
            let participant = participant();

            for name in ["banner", "checkout"] {
                let trial = engine.trial(name, participant.clone()).unwrap();
                trial.choose(&pro_request()).await.unwrap();
            }

            let results = engine
                .convert_all("homepage", &participant, Some("signup"), &Metadata::new())
                .await
                .unwrap();

            assert_eq!(results.len(), 2);
            assert_eq!(results[0].0, "banner");
            assert!(!results[0].1);
            assert_eq!(results[1].0, "checkout");
            assert!(results[1].1);

            let result = engine
                .convert_all("nothing", &participant, None, &Metadata::new())
                .await;
            assert!(matches!(result, Err(DomainError::NoExperiments { .. })));
        }
    }

    mod combined_tests {
        use super::*;

        fn catalog() -> Catalog {
            Catalog::from_definitions([definition("checkout", ExperimentPolicy::default())
                .with_combined(ExperimentName::new("checkout-button").unwrap())
                .with_combined(ExperimentName::new("checkout-copy").unwrap())])
            .unwrap()
        }

        #[tokio::test]
        async fn test_children_follow_parent_choice() {
            let engine = engine_with(EngineConfig::default(), catalog());
            start(&engine, "checkout").await;
            let participant = participant();

            let button = engine.trial("checkout-button", participant.clone()).unwrap();
            let copy = engine.trial("checkout-copy", participant.clone()).unwrap();

            assert_eq!(button.choose(&pro_request()).await.unwrap().name(), "b");
            // The parent binding is sticky, so the sibling follows it
            assert_eq!(copy.choose(&ChooseRequest::new()).await.unwrap().name(), "b");

            assert_eq!(participants(&engine, "checkout:b").await, 1);
            assert_eq!(participants(&engine, "checkout-button:b").await, 1);
            assert_eq!(participants(&engine, "checkout-copy:b").await, 1);
        }

        #[tokio::test]
        async fn test_children_unstarted_with_parent() {
            let engine = engine_with(EngineConfig::default(), catalog());
            let button = engine.trial("checkout-button", participant()).unwrap();

            assert_eq!(button.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "checkout:b").await, 0);
        }

        #[tokio::test]
        async fn test_parent_name_resolves_to_children() {
            let engine = engine_with(EngineConfig::default(), catalog());

            // The parent itself is still addressable by name
            assert!(engine.trial("checkout", participant()).is_ok());
            assert!(matches!(
                engine.catalog().find_one("checkout"),
                Err(DomainError::TooManyExperiments { .. })
            ));
        }
    }

    mod multiple_experiments_tests {
        use super::*;
        use crate::infrastructure::services::MultipleExperiments;

        fn engine_for(mode: MultipleExperiments) -> Engine {
            let config = EngineConfig {
                multiple_experiments: mode,
                ..Default::default()
            };
            engine_with(
                config,
                Catalog::from_definitions([
                    definition("banner", ExperimentPolicy::default()),
                    definition("pricing", ExperimentPolicy::default()),
                ])
                .unwrap(),
            )
        }

        #[tokio::test]
        async fn test_deny_keeps_participant_in_one_experiment() {
            let engine = engine_for(MultipleExperiments::Deny);
            start(&engine, "banner").await;
            start(&engine, "pricing").await;
            let participant = participant();

            let banner = engine.trial("banner", participant.clone()).unwrap();
            assert_eq!(banner.choose(&ChooseRequest::new()).await.unwrap().name(), "a");

            let pricing = engine.trial("pricing", participant).unwrap();
            assert_eq!(pricing.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "pricing:a").await, 0);
            assert_eq!(participants(&engine, "pricing:b").await, 0);
        }

        #[tokio::test]
        async fn test_control_only() {
            let engine = engine_for(MultipleExperiments::ControlOnly);
            start(&engine, "banner").await;
            start(&engine, "pricing").await;

            let in_control = participant();
            engine
                .trial("banner", in_control.clone())
                .unwrap()
                .choose(&ChooseRequest::new())
                .await
                .unwrap();
            let pricing = engine.trial("pricing", in_control).unwrap();
            assert_eq!(pricing.choose(&pro_request()).await.unwrap().name(), "b");

            let in_treatment = participant();
            engine
                .trial("banner", in_treatment.clone())
                .unwrap()
                .choose(&pro_request())
                .await
                .unwrap();
            let pricing = engine.trial("pricing", in_treatment).unwrap();
            assert_eq!(pricing.choose(&pro_request()).await.unwrap().name(), "a");
            assert_eq!(participants(&engine, "pricing:b").await, 1);
        }
    }

    mod failover_tests {
        use super::*;

        #[tokio::test]
        async fn test_store_failure_degrades() {
            let failovers = Arc::new(AtomicUsize::new(0));
            let counter = failovers.clone();
            let mut catalog = Catalog::new();
            catalog
                .register(
                    definition("banner", ExperimentPolicy::default()),
                    ExperimentHooks::new().on(EventKind::StoreFailover, move |_, event| {
                        assert!(matches!(event, ExperimentEvent::StoreFailover { .. }));
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();

            let mut store = MockExperimentStore::new();
            store
                .expect_get_all()
                .returning(|_| Err(DomainError::storage("connection refused")));
            let engine = ExperimentEngine::new(EngineConfig::default(), catalog, Arc::new(store));
            let participant = participant();
            participant
                .bind(
                    &ExperimentName::new("banner").unwrap(),
                    &ParticipantBinding::new(VariantName::new("b").unwrap(), Utc::now()),
                )
                .await
                .unwrap();
            let trial = engine.trial("banner", participant).unwrap();

            assert_eq!(trial.choose(&pro_request()).await.unwrap().name(), "a");
            let forced = ChooseRequest::new().with_override("b");
            assert_eq!(trial.choose(&forced).await.unwrap().name(), "b");
            assert!(!trial.convert(None, Metadata::new()).await.unwrap());

            assert_eq!(failovers.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn test_other_errors_propagate() {
            let mut store = MockExperimentStore::new();
            store
                .expect_get_all()
                .returning(|_| Err(DomainError::internal("corrupt")));
            let engine = ExperimentEngine::new(
                EngineConfig::default(),
                Catalog::from_definitions([definition("banner", ExperimentPolicy::default())])
                    .unwrap(),
                Arc::new(store),
            );
            let trial = engine.trial("banner", participant()).unwrap();

            let result = trial.choose(&ChooseRequest::new()).await;
            assert!(matches!(result, Err(DomainError::Internal { .. })));
        }
    }
}
