use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::actions::ActionKind;
use crate::error::LevelError;
use crate::types::{CellKind, Heading, Pose};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<CellKind>,
    start: (i32, i32),
}

impl Grid {
    /// Parses rows of tiles. `level` only labels errors.
    pub fn parse<S: AsRef<str>>(level: u32, rows: &[S]) -> Result<Self, LevelError> {
        let Some(first) = rows.first() else {
            return Err(LevelError::EmptyGrid { level });
        };
        let width = first.as_ref().chars().count();
        if width == 0 {
            return Err(LevelError::EmptyGrid { level });
        }

        let mut cells = Vec::with_capacity(width * rows.len());
        let mut start = None;
        let mut finish_count = 0usize;
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let found = row.chars().count();
            if found != width {
                return Err(LevelError::RaggedRow {
                    level,
                    row: y,
                    expected: width,
                    found,
                });
            }
            for (x, tile) in row.chars().enumerate() {
                let Some(kind) = CellKind::from_tile(tile) else {
                    return Err(LevelError::UnknownTile {
                        level,
                        x: x as i32,
                        y: y as i32,
                        tile,
                    });
                };
                match kind {
                    CellKind::Start if start.is_some() => {
                        return Err(LevelError::MultipleStarts { level })
                    }
                    CellKind::Start => start = Some((x as i32, y as i32)),
                    CellKind::Finish => finish_count += 1,
                    _ => {}
                }
                cells.push(kind);
            }
        }

        let Some(start) = start else {
            return Err(LevelError::MissingStart { level });
        };
        if finish_count == 0 {
            return Err(LevelError::MissingFinish { level });
        }

        Ok(Self {
            width: width as i32,
            height: rows.len() as i32,
            cells,
            start,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn start(&self) -> (i32, i32) {
        self.start
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<CellKind> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize).copied()
    }

    pub fn is_traversable(&self, x: i32, y: i32) -> bool {
        self.cell(x, y).map(|kind| kind != CellKind::Wall).unwrap_or(false)
    }

    pub fn is_finish(&self, x: i32, y: i32) -> bool {
        self.cell(x, y) == Some(CellKind::Finish)
    }

    pub fn tiles(&self) -> Vec<String> {
        self.cells
            .chunks(self.width as usize)
            .map(|row| row.iter().map(|kind| kind.as_tile()).collect())
            .collect()
    }
}

pub fn is_traversable(grid: &Grid, x: i32, y: i32) -> bool {
    grid.is_traversable(x, y)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub x: i32,
    pub y: i32,
    pub kind: String,
    #[serde(default)]
    pub amount: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelSpec {
    pub index: u32,
    pub tiles: Vec<String>,
    pub heading: Heading,
    #[serde(rename = "blockBudget", default)]
    pub block_budget: Option<u32>,
    #[serde(rename = "allowedActions", default = "all_actions")]
    pub allowed_actions: Vec<ActionKind>,
    #[serde(default)]
    pub markers: Vec<Marker>,
}

fn all_actions() -> Vec<ActionKind> {
    ActionKind::ALL.to_vec()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    pub index: u32,
    pub grid: Grid,
    pub start_pose: Pose,
    pub block_budget: Option<u32>,
    pub allowed_actions: BTreeSet<ActionKind>,
    pub markers: Vec<Marker>,
}

impl Level {
    pub fn new<S: AsRef<str>>(index: u32, rows: &[S], heading: Heading) -> Result<Self, LevelError> {
        if index == 0 {
            return Err(LevelError::ZeroIndex);
        }
        let grid = Grid::parse(index, rows)?;
        let (x, y) = grid.start();
        Ok(Self {
            index,
            grid,
            start_pose: Pose::new(x, y, heading),
            block_budget: None,
            allowed_actions: ActionKind::ALL.into_iter().collect(),
            markers: Vec::new(),
        })
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.block_budget = Some(budget);
        self
    }

    pub fn with_allowed(mut self, actions: &[ActionKind]) -> Self {
        self.allowed_actions = actions.iter().copied().collect();
        self
    }

    pub fn with_markers(mut self, markers: Vec<Marker>) -> Result<Self, LevelError> {
        for marker in &markers {
            if !self.grid.is_traversable(marker.x, marker.y) {
                return Err(LevelError::MarkerOffGrid {
                    level: self.index,
                    x: marker.x,
                    y: marker.y,
                });
            }
        }
        self.markers = markers;
        Ok(self)
    }

    pub fn from_spec(spec: LevelSpec) -> Result<Self, LevelError> {
        let mut level = Self::new(spec.index, &spec.tiles, spec.heading)?
            .with_allowed(&spec.allowed_actions)
            .with_markers(spec.markers)?;
        level.block_budget = spec.block_budget;
        Ok(level)
    }

    pub fn to_spec(&self) -> LevelSpec {
        LevelSpec {
            index: self.index,
            tiles: self.grid.tiles(),
            heading: self.start_pose.heading,
            block_budget: self.block_budget,
            allowed_actions: self.allowed_actions.iter().copied().collect(),
            markers: self.markers.clone(),
        }
    }

    pub fn allows(&self, kind: ActionKind) -> bool {
        self.allowed_actions.contains(&kind)
    }

    pub fn markers_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Marker> + 'a {
        self.markers.iter().filter(move |marker| marker.kind == kind)
    }
}
