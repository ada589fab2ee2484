use serde::{Deserialize, Serialize};

use crate::actions::ActionKind;
use crate::constants::HEADING_SUB_STEPS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    pub const ALL: [Heading; 4] = [Heading::North, Heading::East, Heading::South, Heading::West];

    pub fn index(self) -> u8 {
        match self {
            Heading::North => 0,
            Heading::East => 1,
            Heading::South => 2,
            Heading::West => 3,
        }
    }

    pub fn from_index(index: u8) -> Self {
        Self::ALL[(index % 4) as usize]
    }

    pub fn turned(self, direction: TurnDirection) -> Self {
        match direction {
            TurnDirection::Left => Self::from_index(self.index() + 3),
            TurnDirection::Right => Self::from_index(self.index() + 1),
        }
    }

    /// Grid offset of one step; y grows downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Heading::North => (0, -1),
            Heading::East => (1, 0),
            Heading::South => (0, 1),
            Heading::West => (-1, 0),
        }
    }

    pub fn sub_step(self) -> u8 {
        self.index() * (HEADING_SUB_STEPS / 4)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "north" | "n" | "up" => Some(Self::North),
            "east" | "e" | "right" => Some(Self::East),
            "south" | "s" | "down" => Some(Self::South),
            "west" | "w" | "left" => Some(Self::West),
            _ => None,
        }
    }
}

pub fn turn_frames(from: Heading, direction: TurnDirection) -> Vec<u8> {
    let quarter = HEADING_SUB_STEPS / 4;
    let start = from.sub_step();
    (1..=quarter)
        .map(|step| match direction {
            TurnDirection::Right => (start + step) % HEADING_SUB_STEPS,
            TurnDirection::Left => (start + HEADING_SUB_STEPS - step) % HEADING_SUB_STEPS,
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pose {
    pub x: i32,
    pub y: i32,
    pub heading: Heading,
}

impl Pose {
    pub fn new(x: i32, y: i32, heading: Heading) -> Self {
        Self { x, y, heading }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Wall,
    Open,
    Start,
    Finish,
}

impl CellKind {
    /// Accepts the ASCII tiles (`# . S F`) and the numeric map codes (`0 1 2 3`).
    pub fn from_tile(tile: char) -> Option<Self> {
        match tile {
            '#' | '0' => Some(Self::Wall),
            '.' | '1' => Some(Self::Open),
            'S' | '2' => Some(Self::Start),
            'F' | '3' => Some(Self::Finish),
            _ => None,
        }
    }

    pub fn as_tile(self) -> char {
        match self {
            CellKind::Wall => '#',
            CellKind::Open => '.',
            CellKind::Start => 'S',
            CellKind::Finish => 'F',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failure)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Blocked,
    Runaway,
    Stuck,
    Exception,
    Unfinished,
    Cancelled,
    OverBudget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Moved,
    Turned,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        pose: Pose,
    },
    PoseChanged {
        from: Pose,
        to: Pose,
        kind: MoveKind,
        #[serde(rename = "blockId", skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        frames: Vec<u8>,
    },
    Bumped {
        pose: Pose,
        #[serde(rename = "blockId", skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    Action {
        action: ActionKind,
        pose: Pose,
        #[serde(rename = "blockId", skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    Finished {
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<FailureReason>,
    },
    Reset {
        pose: Pose,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub steps: u64,
    #[serde(rename = "finalPose")]
    pub final_pose: Pose,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
