pub mod cache;
pub mod net;
pub mod normalize;
pub mod reconcile;
pub mod types;
pub mod typing;
