pub mod cancel;
pub mod shutdown;
