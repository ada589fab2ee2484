use crate::types::{Pose, TurnDirection};
use crate::world::Grid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Moved(Pose),
    Reached(Pose),
    Blocked(Pose),
}

impl AdvanceOutcome {
    pub fn pose(self) -> Pose {
        match self {
            AdvanceOutcome::Moved(pose)
            | AdvanceOutcome::Reached(pose)
            | AdvanceOutcome::Blocked(pose) => pose,
        }
    }

    pub fn moved(self) -> bool {
        !matches!(self, AdvanceOutcome::Blocked(_))
    }
}

pub fn compute_forward_target(pose: &Pose) -> Pose {
    let (dx, dy) = pose.heading.delta();
    Pose::new(pose.x + dx, pose.y + dy, pose.heading)
}

pub fn resolve_advance(grid: &Grid, pose: &Pose) -> AdvanceOutcome {
    let target = compute_forward_target(pose);
    if !grid.is_traversable(target.x, target.y) {
        return AdvanceOutcome::Blocked(*pose);
    }
    if grid.is_finish(target.x, target.y) {
        AdvanceOutcome::Reached(target)
    } else {
        AdvanceOutcome::Moved(target)
    }
}

pub fn resolve_turn(pose: &Pose, direction: TurnDirection) -> Pose {
    Pose::new(pose.x, pose.y, pose.heading.turned(direction))
}
