pub mod planner;
pub mod segment;

pub use planner::{clamp_period, StartupAction, TimeWindow, WindowPlanner};
pub use segment::{segment_window, Segment};
