//! Traits which, typically, may be imported without concern: `use appeal::prelude::*`.

pub use crate::convert::{MultiSpec, MultiState};
pub use crate::interface::UserInterface;
