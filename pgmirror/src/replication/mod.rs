pub mod retry;
pub mod run;
pub mod table_copy;
