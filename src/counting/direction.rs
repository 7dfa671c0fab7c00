use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PostprocessError;
use crate::geometry::{Point, Segment, segment_intersect};

/// Counting policy of a line, written as a compact direction code.
///
/// Two-signed codes (`l-r+`, `l+r-`, `u+d-`, `u-d+`) count movement one way
/// as an increase and the other way as a decrease. Single codes (`r+`, `l+`,
/// `u+`, `d+`) only count movement towards the named side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LineDirection {
    /// `l-r+`: rightward increases, leftward decreases.
    LeftMinusRightPlus,
    /// `l+r-`: leftward increases, rightward decreases.
    LeftPlusRightMinus,
    /// `u+d-`: upward increases, downward decreases.
    UpPlusDownMinus,
    /// `u-d+`: downward increases, upward decreases.
    UpMinusDownPlus,
    RightPlus,
    LeftPlus,
    UpPlus,
    DownPlus,
}

impl LineDirection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LeftMinusRightPlus => "l-r+",
            Self::LeftPlusRightMinus => "l+r-",
            Self::UpPlusDownMinus => "u+d-",
            Self::UpMinusDownPlus => "u-d+",
            Self::RightPlus => "r+",
            Self::LeftPlus => "l+",
            Self::UpPlus => "u+",
            Self::DownPlus => "d+",
        }
    }

    /// Whether this policy only accumulates a plain count.
    pub fn is_count_only(&self) -> bool {
        matches!(
            self,
            Self::RightPlus | Self::LeftPlus | Self::UpPlus | Self::DownPlus
        )
    }

    /// Classify movement from `from` to `to`; image y grows downwards.
    fn classify(&self, from: Point, to: Point) -> Option<Crossing> {
        let signed = |forward: bool, backward: bool| {
            if forward {
                Some(Crossing::Increase)
            } else if backward {
                Some(Crossing::Decrease)
            } else {
                None
            }
        };
        let (right, left) = (to.x > from.x, to.x < from.x);
        let (down, up) = (to.y > from.y, to.y < from.y);

        match self {
            Self::LeftMinusRightPlus => signed(right, left),
            Self::LeftPlusRightMinus => signed(left, right),
            Self::UpPlusDownMinus => signed(up, down),
            Self::UpMinusDownPlus => signed(down, up),
            Self::RightPlus => right.then_some(Crossing::Count),
            Self::LeftPlus => left.then_some(Crossing::Count),
            Self::UpPlus => up.then_some(Crossing::Count),
            Self::DownPlus => down.then_some(Crossing::Count),
        }
    }
}

impl FromStr for LineDirection {
    type Err = PostprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "l-r+" => Self::LeftMinusRightPlus,
            "l+r-" => Self::LeftPlusRightMinus,
            "u+d-" => Self::UpPlusDownMinus,
            "u-d+" => Self::UpMinusDownPlus,
            "r+" => Self::RightPlus,
            "l+" => Self::LeftPlus,
            "u+" => Self::UpPlus,
            "d+" => Self::DownPlus,
            other => {
                return Err(PostprocessError::InvalidGeometry(format!(
                    "unknown line direction {other:?}"
                )));
            }
        })
    }
}

impl TryFrom<String> for LineDirection {
    type Error = PostprocessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LineDirection> for String {
    fn from(d: LineDirection) -> Self {
        d.code().to_string()
    }
}

impl fmt::Display for LineDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one target crossing one line in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    Increase,
    Decrease,
    Count,
}

/// Classify the anchor path `from -> to` against `line`.
///
/// Returns `None` unless the path touches the line and moves in a
/// direction the policy counts.
pub fn classify_crossing(
    from: Point,
    to: Point,
    line: &Segment,
    direction: LineDirection,
) -> Option<Crossing> {
    if !segment_intersect(&Segment::new(from, to), line) {
        return None;
    }
    direction.classify(from, to)
}
