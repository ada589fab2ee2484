use crate::movement::{compute_forward_target, resolve_turn};
use crate::types::{Pose, TurnDirection};
use crate::world::Grid;

fn path_toward(grid: &Grid, pose: &Pose, turn: Option<TurnDirection>) -> bool {
    let probe = match turn {
        Some(direction) => resolve_turn(pose, direction),
        None => *pose,
    };
    let target = compute_forward_target(&probe);
    grid.is_traversable(target.x, target.y)
}

pub fn path_ahead(grid: &Grid, pose: &Pose) -> bool {
    path_toward(grid, pose, None)
}

pub fn path_left(grid: &Grid, pose: &Pose) -> bool {
    path_toward(grid, pose, Some(TurnDirection::Left))
}

pub fn path_right(grid: &Grid, pose: &Pose) -> bool {
    path_toward(grid, pose, Some(TurnDirection::Right))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub pose: Pose,
    pub ahead: bool,
    pub left: bool,
    pub right: bool,
}

impl Fingerprint {
    pub fn capture(grid: &Grid, pose: &Pose) -> Self {
        Self {
            pose: *pose,
            ahead: path_ahead(grid, pose),
            left: path_left(grid, pose),
            right: path_right(grid, pose),
        }
    }
}
