pub mod config;
pub mod distribution;
pub mod errors;
pub mod stage;
pub mod trial;

pub use config::*;
pub use distribution::*;
pub use errors::*;
pub use stage::*;
pub use trial::*;
