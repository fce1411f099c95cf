pub mod transaction;
pub mod wizard;
