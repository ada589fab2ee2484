use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::types::Pose;
use crate::world::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Advance,
    TurnLeft,
    TurnRight,
    PathAhead,
    PathLeft,
    PathRight,
    NotDone,
    Collect,
    SenseMarker,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::Advance,
        ActionKind::TurnLeft,
        ActionKind::TurnRight,
        ActionKind::PathAhead,
        ActionKind::PathLeft,
        ActionKind::PathRight,
        ActionKind::NotDone,
        ActionKind::Collect,
        ActionKind::SenseMarker,
    ];

    pub fn is_sensor(self) -> bool {
        matches!(
            self,
            ActionKind::PathAhead
                | ActionKind::PathLeft
                | ActionKind::PathRight
                | ActionKind::NotDone
                | ActionKind::SenseMarker
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Advance,
    TurnLeft,
    TurnRight,
    PathAhead,
    PathLeft,
    PathRight,
    NotDone,
}

impl Primitive {
    pub fn kind(self) -> ActionKind {
        match self {
            Primitive::Advance => ActionKind::Advance,
            Primitive::TurnLeft => ActionKind::TurnLeft,
            Primitive::TurnRight => ActionKind::TurnRight,
            Primitive::PathAhead => ActionKind::PathAhead,
            Primitive::PathLeft => ActionKind::PathLeft,
            Primitive::PathRight => ActionKind::PathRight,
            Primitive::NotDone => ActionKind::NotDone,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Builtin(Primitive),
    CustomActuator(ActionKind),
    CustomSensor(ActionKind),
}

impl Binding {
    pub fn kind(self) -> ActionKind {
        match self {
            Binding::Builtin(primitive) => primitive.kind(),
            Binding::CustomActuator(kind) | Binding::CustomSensor(kind) => kind,
        }
    }

    pub fn changes_state(self) -> bool {
        match self {
            Binding::Builtin(primitive) => !primitive.kind().is_sensor(),
            Binding::CustomActuator(_) => true,
            Binding::CustomSensor(_) => false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionSet {
    bindings: BTreeMap<String, Binding>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, binding: Binding) -> Self {
        self.bindings.insert(name.to_string(), binding);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Binding> {
        self.bindings.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn names_for(&self, level: &Level) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, binding)| level.allows(binding.kind()))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub struct HookContext<'a> {
    pub level: &'a Level,
    pub pose: Pose,
}

pub trait VariantHooks: Send {
    fn reset(&mut self, level: &Level);

    fn actuate(&mut self, kind: ActionKind, ctx: &HookContext<'_>) -> Result<(), HookError>;

    fn sense(&self, kind: ActionKind, ctx: &HookContext<'_>) -> bool;

    /// Whether stepping onto a finish cell completes the level right now.
    fn finish_ready(&self, _ctx: &HookContext<'_>) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl VariantHooks for NoHooks {
    fn reset(&mut self, _level: &Level) {}

    fn actuate(&mut self, kind: ActionKind, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Err(HookError::Rejected(format!("{kind:?} is not supported by this game")))
    }

    fn sense(&self, _kind: ActionKind, _ctx: &HookContext<'_>) -> bool {
        false
    }
}
