pub mod coalesce;
pub mod resolver;
