pub mod assoc;
pub mod cost;
pub mod error;
pub mod object;
pub mod occ_sort;
pub mod track;

mod kalman_filter;
mod lapjv;

pub use assoc::AssociationResult;
pub use error::TrackError;
pub use object::{Detection, GroundTruth, TrackedBox};
pub use occ_sort::{FrameOutput, OccSort, TrackSnapshot, TrackerSnapshot};
pub use track::Track;
