//! Multi-segment recipe sequencing
//!
//! The state graph is explicit, finite, and deterministic: every
//! transition goes through [`RecipeState::transition`]. [`RecipeMachine`]
//! drives that graph from `tick`, issuing motion and heater commands for
//! each segment.

pub mod events;
pub mod machine;
pub mod recipe;

pub use events::RecipeEvent;
pub use machine::{RecipeError, RecipeState};
pub use recipe::{Recipe, RecipeConfig, RecipeMachine, Segment, MAX_SEGMENTS};
