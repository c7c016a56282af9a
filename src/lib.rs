pub mod ranking;
pub mod sqlite_pragma;
