//! Callback hooks attached to an experiment
//!
//! Two shapes exist: fan-out event handlers, every one of which is invoked with
//! the experiment and the event, and reduce chains, which are folded
//! left-to-right from an explicit seed, each handler receiving the accumulated
//! result and returning the next one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::entity::{ExperimentDefinition, GoalName, Metadata, Variant, VariantName};
use crate::domain::DomainError;

/// Kinds of fan-out events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Choose,
    Use,
    Convert,
    Start,
    Schedule,
    Stop,
    Pause,
    Resume,
    Winner,
    Reset,
    Delete,
    StoreFailover,
}

/// Event payload handed to fan-out handlers
#[derive(Debug)]
pub enum ExperimentEvent<'a> {
    /// A new assignment was made by the bucketing algorithm
    Choose { variant: &'a Variant },
    /// A decision was returned to the caller
    Use { variant: &'a Variant },
    Convert {
        variant: &'a Variant,
        goal: Option<&'a GoalName>,
    },
    Start,
    Schedule {
        start_at: DateTime<Utc>,
        stop_at: Option<DateTime<Utc>>,
    },
    Stop,
    Pause,
    Resume,
    Winner { variant: &'a Variant },
    Reset,
    Delete,
    /// The store failed and the caller received a degraded answer
    StoreFailover { error: &'a DomainError },
}

impl ExperimentEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Choose { .. } => EventKind::Choose,
            Self::Use { .. } => EventKind::Use,
            Self::Convert { .. } => EventKind::Convert,
            Self::Start => EventKind::Start,
            Self::Schedule { .. } => EventKind::Schedule,
            Self::Stop => EventKind::Stop,
            Self::Pause => EventKind::Pause,
            Self::Resume => EventKind::Resume,
            Self::Winner { .. } => EventKind::Winner,
            Self::Reset => EventKind::Reset,
            Self::Delete => EventKind::Delete,
            Self::StoreFailover { .. } => EventKind::StoreFailover,
        }
    }
}

/// Fan-out event handler
pub type EventHandler = Arc<dyn Fn(&ExperimentDefinition, &ExperimentEvent<'_>) + Send + Sync>;

type Reducer<T, C> = Arc<dyn Fn(&ExperimentDefinition, T, &C) -> T + Send + Sync>;

/// Ordered list of reducers folded from a seed
pub struct ReduceChain<T, C: ?Sized> {
    reducers: Vec<Reducer<T, C>>,
}

impl<T, C: ?Sized> ReduceChain<T, C> {
    pub fn new() -> Self {
        Self {
            reducers: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, reducer: F)
    where
        F: Fn(&ExperimentDefinition, T, &C) -> T + Send + Sync + 'static,
    {
        self.reducers.push(Arc::new(reducer));
    }

    /// Fold every reducer over `seed`, in registration order
    pub fn fold(&self, experiment: &ExperimentDefinition, seed: T, context: &C) -> T {
        self.reducers
            .iter()
            .fold(seed, |acc, reducer| reducer(experiment, acc, context))
    }

    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<T, C: ?Sized> Default for ReduceChain<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: ?Sized> Clone for ReduceChain<T, C> {
    fn clone(&self) -> Self {
        Self {
            reducers: self.reducers.clone(),
        }
    }
}

impl<T, C: ?Sized> fmt::Debug for ReduceChain<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceChain")
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

/// What a conversion gate sees
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub variant: VariantName,
    pub goal: Option<GoalName>,
    pub metadata: Metadata,
}

/// Matcher used by the static algorithm: `(variant_metadata, request_metadata)`
pub type StaticMatcher = Arc<dyn Fn(&Metadata, &Metadata) -> bool + Send + Sync>;

/// All callbacks configured for one experiment
#[derive(Clone, Default)]
pub struct ExperimentHooks {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
    goal_convert_handlers: HashMap<GoalName, Vec<EventHandler>>,
    goal_allow_conversion: HashMap<GoalName, ReduceChain<bool, ConversionContext>>,
    allow_participation: ReduceChain<bool, Metadata>,
    allow_conversion: ReduceChain<bool, ConversionContext>,
    track_participation: ReduceChain<bool, Variant>,
    rollout_winner: ReduceChain<Variant, Metadata>,
    static_matcher: Option<StaticMatcher>,
}

impl ExperimentHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fan-out handler for `kind`
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&ExperimentDefinition, &ExperimentEvent<'_>) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Register a conversion handler scoped to one goal
    pub fn on_goal_convert<F>(mut self, goal: GoalName, handler: F) -> Self
    where
        F: Fn(&ExperimentDefinition, &ExperimentEvent<'_>) + Send + Sync + 'static,
    {
        self.goal_convert_handlers
            .entry(goal)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn allow_participation<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&ExperimentDefinition, bool, &Metadata) -> bool + Send + Sync + 'static,
    {
        self.allow_participation.push(reducer);
        self
    }

    pub fn allow_conversion<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&ExperimentDefinition, bool, &ConversionContext) -> bool + Send + Sync + 'static,
    {
        self.allow_conversion.push(reducer);
        self
    }

    /// Conversion gate used instead of the experiment's when `goal` is converted
    pub fn allow_goal_conversion<F>(mut self, goal: GoalName, reducer: F) -> Self
    where
        F: Fn(&ExperimentDefinition, bool, &ConversionContext) -> bool + Send + Sync + 'static,
    {
        self.goal_allow_conversion
            .entry(goal)
            .or_default()
            .push(reducer);
        self
    }

    pub fn track_participation<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&ExperimentDefinition, bool, &Variant) -> bool + Send + Sync + 'static,
    {
        self.track_participation.push(reducer);
        self
    }

    pub fn rollout_winner<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&ExperimentDefinition, Variant, &Metadata) -> Variant + Send + Sync + 'static,
    {
        self.rollout_winner.push(reducer);
        self
    }

    pub fn with_static_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Metadata, &Metadata) -> bool + Send + Sync + 'static,
    {
        self.static_matcher = Some(Arc::new(matcher));
        self
    }

    // Dispatch

    pub fn emit(&self, experiment: &ExperimentDefinition, event: &ExperimentEvent<'_>) {
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                handler(experiment, event);
            }
        }
    }

    /// Emit a conversion to the goal's handlers, or the experiment's without a goal
    pub fn emit_convert(
        &self,
        experiment: &ExperimentDefinition,
        goal: Option<&GoalName>,
        event: &ExperimentEvent<'_>,
    ) {
        match goal {
            Some(goal) => {
                if let Some(handlers) = self.goal_convert_handlers.get(goal) {
                    for handler in handlers {
                        handler(experiment, event);
                    }
                }
            }
            None => self.emit(experiment, event),
        }
    }

    pub fn participation_allowed(
        &self,
        experiment: &ExperimentDefinition,
        seed: bool,
        metadata: &Metadata,
    ) -> bool {
        self.allow_participation.fold(experiment, seed, metadata)
    }

    pub fn conversion_allowed(
        &self,
        experiment: &ExperimentDefinition,
        context: &ConversionContext,
    ) -> bool {
        let chain = context
            .goal
            .as_ref()
            .and_then(|goal| self.goal_allow_conversion.get(goal))
            .unwrap_or(&self.allow_conversion);

        chain.fold(experiment, true, context)
    }

    pub fn participation_tracked(&self, experiment: &ExperimentDefinition, variant: &Variant) -> bool {
        self.track_participation.fold(experiment, true, variant)
    }

    pub fn rolled_out_winner(
        &self,
        experiment: &ExperimentDefinition,
        winner: Variant,
        metadata: &Metadata,
    ) -> Variant {
        self.rollout_winner.fold(experiment, winner, metadata)
    }

    pub fn static_matcher(&self) -> Option<&StaticMatcher> {
        self.static_matcher.as_ref()
    }
}

impl fmt::Debug for ExperimentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentHooks")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .field("allow_participation", &self.allow_participation)
            .field("allow_conversion", &self.allow_conversion)
            .field("track_participation", &self.track_participation)
            .field("rollout_winner", &self.rollout_winner)
            .field("static_matcher", &self.static_matcher.is_some())
            .finish()
    }
}
