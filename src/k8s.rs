pub mod annotations;
pub mod client;
pub mod error;
pub mod labels;
pub mod utils;
