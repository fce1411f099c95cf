pub mod effects;
pub mod policy;
pub mod transitions;
