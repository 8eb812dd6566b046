pub mod delta;
pub mod overlay;
pub mod pipeline;
pub mod traits;
