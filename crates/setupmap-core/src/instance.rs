//! Instance descriptors - replication of a placement inside its parent model
//!
//! A placement is either a single replica or a regular grid of replicas laid
//! out along independent axes. Each replica is reached by a flat item index
//! which decomposes into a coordinate tuple ([`Slot`]), axis 0 varying fastest.
//!
//! Descriptors are written in model definitions as short text rules:
//!
//! ```text
//! single
//! grid=[2]              two replicas at coordinates 0 and 1
//! grid=[8@1]            eight replicas at coordinates 1..=8
//! grid=[4@0+2;3@10]     4x3 replicas, axis 0 = 0,2,4,6 and axis 1 = 10,11,12
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    #[error("Invalid instance rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
    #[error("Invalid grid axis {axis}: {reason}")]
    InvalidAxis { axis: usize, reason: String },
    #[error("Replica index {index} out of range (instance has {count} items)")]
    OutOfRange { index: usize, count: usize },
}

/// Coordinate tuple of one replica
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    coordinates: Vec<u32>,
}

impl Slot {
    pub fn new(coordinates: Vec<u32>) -> Self {
        Self { coordinates }
    }

    /// The slot of a non-replicated placement
    pub fn dimensionless() -> Self {
        Self::default()
    }

    pub fn dimension(&self) -> usize {
        self.coordinates.len()
    }

    pub fn coordinates(&self) -> &[u32] {
        &self.coordinates
    }

    pub fn is_dimensionless(&self) -> bool {
        self.coordinates.is_empty()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coordinates.is_empty() {
            return write!(f, "(0)");
        }
        let coordinates: Vec<String> = self.coordinates.iter().map(|c| c.to_string()).collect();
        write!(f, "({}:{})", self.coordinates.len(), coordinates.join(","))
    }
}

/// One axis of a regular grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridAxis {
    /// Number of replicas along this axis
    pub count: u32,
    /// Coordinate of the first replica
    pub start: u32,
    /// Coordinate increment between consecutive replicas
    pub step: i64,
}

impl GridAxis {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            start: 0,
            step: 1,
        }
    }

    pub fn starting_at(mut self, start: u32) -> Self {
        self.start = start;
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    fn validate(&self, axis: usize) -> Result<(), InstanceError> {
        let invalid = |reason: &str| InstanceError::InvalidAxis {
            axis,
            reason: reason.to_string(),
        };
        if self.count == 0 {
            return Err(invalid("count must be at least 1"));
        }
        if self.step == 0 && self.count > 1 {
            return Err(invalid("step must not be 0 for more than one replica"));
        }
        let last = i64::from(self.start) + i64::from(self.count - 1) * self.step;
        if last < 0 {
            return Err(invalid("coordinates must not be negative"));
        }
        // u32::MAX is reserved as the unset address value
        if last >= i64::from(u32::MAX) || self.start == u32::MAX {
            return Err(invalid("coordinates overflow"));
        }
        Ok(())
    }

    fn coordinate(&self, index: u32) -> u32 {
        (i64::from(self.start) + i64::from(index) * self.step) as u32
    }
}

/// Regular grid of replicas; axes are independent and validated at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularGrid {
    axes: Vec<GridAxis>,
    items: usize,
}

impl RegularGrid {
    pub fn new(axes: Vec<GridAxis>) -> Result<Self, InstanceError> {
        if axes.is_empty() {
            return Err(InstanceError::InvalidAxis {
                axis: 0,
                reason: "a grid needs at least one axis".to_string(),
            });
        }
        let mut items: usize = 1;
        for (index, axis) in axes.iter().enumerate() {
            axis.validate(index)?;
            items = items
                .checked_mul(axis.count as usize)
                .ok_or_else(|| InstanceError::InvalidAxis {
                    axis: index,
                    reason: "too many replicas".to_string(),
                })?;
        }
        Ok(Self { axes, items })
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    pub fn number_of_items(&self) -> usize {
        self.items
    }

    fn slot_for(&self, index: usize) -> Slot {
        let mut rest = index;
        let coordinates = self
            .axes
            .iter()
            .map(|axis| {
                let count = axis.count as usize;
                let along = rest % count;
                rest /= count;
                axis.coordinate(along as u32)
            })
            .collect();
        Slot::new(coordinates)
    }
}

/// Replication descriptor of a placement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Instance {
    /// One replica with a dimensionless slot
    #[default]
    Single,
    /// N-dimensional regular grid
    RegularGrid(RegularGrid),
}

impl Instance {
    pub fn single() -> Self {
        Instance::Single
    }

    pub fn grid(axes: Vec<GridAxis>) -> Result<Self, InstanceError> {
        Ok(Instance::RegularGrid(RegularGrid::new(axes)?))
    }

    /// One-dimensional grid of `count` replicas at coordinates `0..count`
    pub fn linear(count: u32) -> Result<Self, InstanceError> {
        Self::grid(vec![GridAxis::new(count)])
    }

    pub fn number_of_items(&self) -> usize {
        match self {
            Instance::Single => 1,
            Instance::RegularGrid(grid) => grid.number_of_items(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Instance::Single => 0,
            Instance::RegularGrid(grid) => grid.dimension(),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Instance::Single)
    }

    /// Slot of replica `index`, `0 <= index < number_of_items()`
    pub fn slot_for(&self, index: usize) -> Result<Slot, InstanceError> {
        let count = self.number_of_items();
        if index >= count {
            return Err(InstanceError::OutOfRange { index, count });
        }
        Ok(match self {
            Instance::Single => Slot::dimensionless(),
            Instance::RegularGrid(grid) => grid.slot_for(index),
        })
    }

    /// All slots in item order
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.number_of_items()).map(move |index| match self {
            Instance::Single => Slot::dimensionless(),
            Instance::RegularGrid(grid) => grid.slot_for(index),
        })
    }
}

impl FromStr for Instance {
    type Err = InstanceError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| InstanceError::InvalidRule {
            rule: rule.to_string(),
            reason,
        };
        let text = rule.trim();
        if text.eq_ignore_ascii_case("single") {
            return Ok(Instance::Single);
        }
        let body = text
            .strip_prefix("grid")
            .map(str::trim_start)
            .and_then(|t| t.strip_prefix('='))
            .map(str::trim)
            .and_then(|t| t.strip_prefix('['))
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| invalid("expected 'single' or 'grid=[...]'".to_string()))?;

        let axes = body
            .split(';')
            .map(|axis| parse_axis(axis.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        Instance::grid(axes).map_err(|e| invalid(e.to_string()))
    }
}

fn parse_axis(text: &str) -> Result<GridAxis, String> {
    let split = text
        .find(|c: char| c == '@' || c == '+' || c == '-')
        .unwrap_or(text.len());
    let (count, mut rest) = text.split_at(split);
    let count: u32 = count
        .trim()
        .parse()
        .map_err(|_| format!("bad replica count '{}'", count.trim()))?;
    let mut axis = GridAxis::new(count);

    if let Some(after) = rest.strip_prefix('@') {
        let end = after
            .find(|c: char| c == '+' || c == '-')
            .unwrap_or(after.len());
        axis.start = after[..end]
            .trim()
            .parse()
            .map_err(|_| format!("bad start offset '{}'", after[..end].trim()))?;
        rest = &after[end..];
    }

    let rest = rest.trim();
    if !rest.is_empty() {
        let (sign, digits) = rest.split_at(1);
        let step: i64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("bad step '{}'", rest))?;
        axis.step = if sign == "-" { -step } else { step };
    }
    Ok(axis)
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instance::Single => write!(f, "single"),
            Instance::RegularGrid(grid) => {
                let axes: Vec<String> = grid
                    .axes()
                    .iter()
                    .map(|axis| {
                        let mut text = axis.count.to_string();
                        if axis.start != 0 {
                            text.push_str(&format!("@{}", axis.start));
                        }
                        if axis.step != 1 {
                            text.push_str(&format!("{:+}", axis.step));
                        }
                        text
                    })
                    .collect();
                write!(f, "grid=[{}]", axes.join(";"))
            }
        }
    }
}
