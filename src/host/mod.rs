pub mod logging;
pub mod script;
