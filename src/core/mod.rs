pub mod codec;
pub mod form;
pub mod gateway;
mod model;
pub mod project;
pub mod store;

pub use model::Color;
