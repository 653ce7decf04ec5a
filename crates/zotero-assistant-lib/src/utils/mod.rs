// Utility modules

pub mod database;
pub mod schema;
pub mod store;
