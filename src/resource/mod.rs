pub mod resource;

pub use resource::{Resource, Validity};
