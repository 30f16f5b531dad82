/*!
# Pollmesh DevKit - test doubles for the polling pipeline

Run the real producer, bus and worker code without a broker or devices:
- `ScriptedWalker`: per-target canned walks (pairs, failures, delays)
- builders for inventory rows, jobs and ifXEntry pairs
- `TestHarness`: in-memory bus + running worker pool + telemetry assertions
*/

pub mod builders;
pub mod test_utils;
pub mod walker_stub;

pub use builders::{DeviceBuilder, PollmeshMessageBuilder};
pub use test_utils::TestHarness;
pub use walker_stub::{ScriptedWalker, WalkScript};
