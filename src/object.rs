use serde::{Deserialize, Serialize};

/*------------------------------------------------------------------------------
Frame input/output value types
------------------------------------------------------------------------------*/

/// One detector output for a single frame: box in [x1, y1, x2, y2] format
/// plus a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub score: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            bbox: [x1, y1, x2, y2],
            score,
        }
    }

    /// Flatten to the [x1, y1, x2, y2, score] row used by snapshots.
    pub fn to_row(&self) -> [f32; 5] {
        [
            self.bbox[0],
            self.bbox[1],
            self.bbox[2],
            self.bbox[3],
            self.score,
        ]
    }
}

/// Annotated ground-truth box, used only for the diagnostic match stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub bbox: [f32; 4],
    pub class_id: f32,
}

impl GroundTruth {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: f32) -> Self {
        Self {
            bbox: [x1, y1, x2, y2],
            class_id,
        }
    }
}

/// One tracked box emitted per frame. `id` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedBox {
    pub bbox: [f32; 4],
    pub id: u64,
}
