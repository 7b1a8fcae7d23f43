//! Generated property checks for the frame codec.

mod round_trip;
pub(crate) mod shared;
