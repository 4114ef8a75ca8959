pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod layout;
pub mod lockscreen;
pub mod math;
pub mod render;
pub mod resources;
pub mod texture;
pub mod timer;
pub mod widgets;

pub use error::Error;
