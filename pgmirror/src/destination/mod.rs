mod base;

pub use base::Destination;
