mod base;

pub use base::Source;
