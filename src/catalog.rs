use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::actions::{ActionKind, ActionSet, Binding, HookContext, NoHooks, Primitive, VariantHooks};
use crate::error::{HookError, LevelError};
use crate::types::Heading;
use crate::world::{Level, Marker};

pub const FLOWER: &str = "flower";

const MOVE_ONLY: &[ActionKind] = &[ActionKind::Advance, ActionKind::TurnLeft, ActionKind::TurnRight];
const MOVE_AND_REPEAT: &[ActionKind] = &[
    ActionKind::Advance,
    ActionKind::TurnLeft,
    ActionKind::TurnRight,
    ActionKind::NotDone,
];
const MAZE_FULL: &[ActionKind] = &[
    ActionKind::Advance,
    ActionKind::TurnLeft,
    ActionKind::TurnRight,
    ActionKind::PathAhead,
    ActionKind::PathLeft,
    ActionKind::PathRight,
    ActionKind::NotDone,
];

#[derive(Clone)]
pub struct GameVariant {
    pub id: &'static str,
    pub title: &'static str,
    pub bindings: ActionSet,
    levels: Vec<Arc<Level>>,
    hooks: fn() -> Box<dyn VariantHooks>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VariantInfo {
    pub id: String,
    pub title: String,
    #[serde(rename = "levelCount")]
    pub level_count: u32,
    pub actions: Vec<String>,
}

impl GameVariant {
    pub fn level(&self, index: u32) -> Option<Arc<Level>> {
        let slot = usize::try_from(index).ok()?.checked_sub(1)?;
        self.levels.get(slot).cloned()
    }

    pub fn levels(&self) -> &[Arc<Level>] {
        &self.levels
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn new_hooks(&self) -> Box<dyn VariantHooks> {
        (self.hooks)()
    }

    pub fn with_levels(mut self, levels: Vec<Level>) -> Self {
        self.levels = levels
            .into_iter()
            .enumerate()
            .map(|(slot, mut level)| {
                level.index = slot as u32 + 1;
                Arc::new(level)
            })
            .collect();
        self
    }

    pub fn info(&self) -> VariantInfo {
        VariantInfo {
            id: self.id.to_string(),
            title: self.title.to_string(),
            level_count: self.level_count(),
            actions: self.bindings.names().map(str::to_string).collect(),
        }
    }
}

fn level(
    index: u32,
    rows: &[&str],
    heading: Heading,
    budget: Option<u32>,
    allowed: &[ActionKind],
) -> Result<Level, LevelError> {
    let level = Level::new(index, rows, heading)?.with_allowed(allowed);
    Ok(match budget {
        Some(budget) => level.with_budget(budget),
        None => level,
    })
}

fn flower(x: i32, y: i32, amount: u32) -> Marker {
    Marker {
        x,
        y,
        kind: FLOWER.to_string(),
        amount,
    }
}

fn no_hooks() -> Box<dyn VariantHooks> {
    Box::new(NoHooks)
}

fn bee_hooks() -> Box<dyn VariantHooks> {
    Box::new(BeeHooks::default())
}

fn maze_bindings() -> ActionSet {
    ActionSet::new()
        .bind("moveForward", Binding::Builtin(Primitive::Advance))
        .bind("turnLeft", Binding::Builtin(Primitive::TurnLeft))
        .bind("turnRight", Binding::Builtin(Primitive::TurnRight))
        .bind("isPathForward", Binding::Builtin(Primitive::PathAhead))
        .bind("isPathLeft", Binding::Builtin(Primitive::PathLeft))
        .bind("isPathRight", Binding::Builtin(Primitive::PathRight))
        .bind("notDone", Binding::Builtin(Primitive::NotDone))
}

pub fn maze() -> Result<GameVariant, LevelError> {
    let levels = vec![
        level(1, &["#######", "##S.F##", "#######"], Heading::East, None, MOVE_ONLY)?,
        level(
            2,
            &["#######", "#####F#", "#####.#", "##S...#", "#######"],
            Heading::East,
            None,
            MOVE_ONLY,
        )?,
        level(
            3,
            &["#########", "#S.....F#", "#########"],
            Heading::East,
            Some(2),
            MOVE_AND_REPEAT,
        )?,
        level(
            4,
            &[
                "########", "######F#", "#####..#", "####..##", "###..###", "##S.####", "########",
            ],
            Heading::East,
            Some(5),
            MOVE_AND_REPEAT,
        )?,
        level(
            5,
            &["########", "#F.....#", "######.#", "#S.....#", "########"],
            Heading::East,
            Some(5),
            MAZE_FULL,
        )?,
        level(
            6,
            &["#########", "#S......#", "#######.#", "#F......#", "#########"],
            Heading::East,
            Some(5),
            MAZE_FULL,
        )?,
        level(
            7,
            &["#########", "#S.#....#", "##.#.##.#", "##...##F#", "#########"],
            Heading::East,
            Some(10),
            MAZE_FULL,
        )?,
        level(
            8,
            &["#########", "#...#...#", "#.#.#.#.#", "#S#...#F#", "#########"],
            Heading::North,
            Some(10),
            MAZE_FULL,
        )?,
        level(
            9,
            &[
                "##########", "#S.....#.#", "#.###.##.#", "#.#...#..#", "#...#...F#", "##########",
            ],
            Heading::South,
            Some(7),
            MAZE_FULL,
        )?,
        level(
            10,
            &[
                "##########", "#S#....F.#", "#.#.##.#.#", "#...#..#.#", "###.#.##.#", "##########",
            ],
            Heading::South,
            Some(10),
            MAZE_FULL,
        )?,
    ];
    Ok(GameVariant {
        id: "maze",
        title: "Maze",
        bindings: maze_bindings(),
        levels: levels.into_iter().map(Arc::new).collect(),
        hooks: no_hooks,
    })
}

pub fn automaton() -> Result<GameVariant, LevelError> {
    let bindings = ActionSet::new()
        .bind("stepForward", Binding::Builtin(Primitive::Advance))
        .bind("rotateLeft", Binding::Builtin(Primitive::TurnLeft))
        .bind("rotateRight", Binding::Builtin(Primitive::TurnRight))
        .bind("sensorFront", Binding::Builtin(Primitive::PathAhead))
        .bind("sensorLeft", Binding::Builtin(Primitive::PathLeft))
        .bind("sensorRight", Binding::Builtin(Primitive::PathRight))
        .bind("running", Binding::Builtin(Primitive::NotDone));
    let levels = vec![
        level(1, &["#######", "#S...F#", "#######"], Heading::East, None, MOVE_ONLY)?,
        level(
            2,
            &["######", "#S..##", "###.##", "###F##", "######"],
            Heading::East,
            None,
            MOVE_ONLY,
        )?,
        level(
            3,
            &["#########", "#S..#...#", "###.#.#.#", "###...#F#", "#########"],
            Heading::East,
            Some(8),
            MAZE_FULL,
        )?,
        level(
            4,
            &["#######", "#F..#.#", "##.##.#", "#S....#", "#######"],
            Heading::East,
            Some(10),
            MAZE_FULL,
        )?,
    ];
    Ok(GameVariant {
        id: "automaton",
        title: "Automaton",
        bindings,
        levels: levels.into_iter().map(Arc::new).collect(),
        hooks: no_hooks,
    })
}

pub fn bee() -> Result<GameVariant, LevelError> {
    let bindings = maze_bindings()
        .bind("getNectar", Binding::CustomActuator(ActionKind::Collect))
        .bind("nectarHere", Binding::CustomSensor(ActionKind::SenseMarker));
    let levels = vec![
        Level::new(1, &["#######", "#S...F#", "#######"], Heading::East)?
            .with_markers(vec![flower(3, 1, 1)])?,
        Level::new(
            2,
            &["######", "#S..##", "###.##", "###F##", "######"],
            Heading::East,
        )?
        .with_markers(vec![flower(3, 1, 2)])?,
        Level::new(3, &["#########", "#S.....F#", "#########"], Heading::East)?
            .with_budget(6)
            .with_markers(vec![flower(2, 1, 1), flower(4, 1, 1), flower(6, 1, 1)])?,
        Level::new(
            4,
            &["#######", "#S...##", "#.#.###", "#...F##", "#######"],
            Heading::East,
        )?
        .with_markers(vec![flower(3, 1, 1), flower(1, 3, 1)])?,
    ];
    Ok(GameVariant {
        id: "bee",
        title: "Bee",
        bindings,
        levels: levels.into_iter().map(Arc::new).collect(),
        hooks: bee_hooks,
    })
}

pub fn all_variants() -> Result<Vec<GameVariant>, LevelError> {
    Ok(vec![maze()?, automaton()?, bee()?])
}

pub fn find(id: &str) -> Result<Option<GameVariant>, LevelError> {
    Ok(all_variants()?.into_iter().find(|variant| variant.id == id))
}

/// Nectar left on each flower; the hive only counts once all of it is collected.
#[derive(Clone, Debug, Default)]
pub struct BeeHooks {
    nectar: HashMap<(i32, i32), u32>,
    collected: u32,
}

impl BeeHooks {
    pub fn remaining(&self) -> u32 {
        self.nectar.values().sum()
    }

    pub fn collected(&self) -> u32 {
        self.collected
    }
}

impl VariantHooks for BeeHooks {
    fn reset(&mut self, level: &Level) {
        self.collected = 0;
        self.nectar = level
            .markers_of(FLOWER)
            .map(|marker| ((marker.x, marker.y), marker.amount))
            .collect();
    }

    fn actuate(&mut self, kind: ActionKind, ctx: &HookContext<'_>) -> Result<(), HookError> {
        if kind != ActionKind::Collect {
            return Err(HookError::Rejected(format!("{kind:?} is not a bee action")));
        }
        let cell = (ctx.pose.x, ctx.pose.y);
        match self.nectar.get_mut(&cell) {
            Some(amount) if *amount > 0 => {
                *amount -= 1;
                self.collected += 1;
                Ok(())
            }
            _ => Err(HookError::Rejected(format!(
                "no nectar at ({}, {})",
                cell.0, cell.1
            ))),
        }
    }

    fn sense(&self, kind: ActionKind, ctx: &HookContext<'_>) -> bool {
        kind == ActionKind::SenseMarker
            && self
                .nectar
                .get(&(ctx.pose.x, ctx.pose.y))
                .is_some_and(|amount| *amount > 0)
    }

    fn finish_ready(&self, _ctx: &HookContext<'_>) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pose;

    #[test]
    fn builtin_variants_load() {
        let variants = all_variants().expect("levels are valid");
        let ids: Vec<&str> = variants.iter().map(|variant| variant.id).collect();
        assert_eq!(ids, vec!["maze", "automaton", "bee"]);
        for variant in &variants {
            assert!(variant.level_count() > 0);
            for (slot, level) in variant.levels().iter().enumerate() {
                assert_eq!(level.index, slot as u32 + 1);
            }
        }
    }

    #[test]
    fn level_lookup_is_one_based() {
        let maze = maze().expect("maze");
        assert_eq!(maze.level(1).map(|level| level.index), Some(1));
        assert!(maze.level(0).is_none());
        assert!(maze.level(maze.level_count() + 1).is_none());
    }

    #[test]
    fn early_maze_levels_hide_sensors() {
        let maze = maze().expect("maze");
        let first = maze.level(1).expect("level 1");
        assert_eq!(
            maze.bindings.names_for(&first),
            vec!["moveForward", "turnLeft", "turnRight"]
        );
        assert_eq!(first.block_budget, None);
        assert_eq!(maze.level(3).and_then(|level| level.block_budget), Some(2));
    }

    #[test]
    fn bee_collects_until_flowers_are_dry() {
        let bee = bee().expect("bee");
        let level = bee.level(2).expect("level 2");
        let mut hooks = BeeHooks::default();
        hooks.reset(&level);
        let on_flower = HookContext {
            level: &level,
            pose: Pose::new(3, 1, Heading::East),
        };
        assert!(hooks.sense(ActionKind::SenseMarker, &on_flower));
        assert!(!hooks.finish_ready(&on_flower));
        hooks.actuate(ActionKind::Collect, &on_flower).expect("first sip");
        hooks.actuate(ActionKind::Collect, &on_flower).expect("second sip");
        assert!(!hooks.sense(ActionKind::SenseMarker, &on_flower));
        assert!(hooks.actuate(ActionKind::Collect, &on_flower).is_err());
        assert_eq!(hooks.collected(), 2);
        assert!(hooks.finish_ready(&on_flower));

        hooks.reset(&level);
        assert_eq!(hooks.remaining(), 2);
    }

    #[test]
    fn replacement_levels_are_renumbered() {
        let custom = Level::new(7, &["S.F"], Heading::East).expect("level");
        let maze = maze().expect("maze").with_levels(vec![custom]);
        assert_eq!(maze.level_count(), 1);
        assert_eq!(maze.level(1).map(|level| level.index), Some(1));
    }
}
