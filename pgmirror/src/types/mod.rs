mod outcome;
mod table_name;
mod table_row;

pub use outcome::*;
pub use table_name::*;
pub use table_row::*;
