//! PS/2 keyboard to SPI bridge.
//!
//! [`firmware`] is the bridge itself and only talks to hardware through
//! [`firmware::hal::BusLines`]. [`machine`] is a simulated board that the
//! firmware runs against in tests and from the command line.

pub mod firmware;
pub mod host;
pub mod machine;
