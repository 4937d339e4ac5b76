pub mod activity;
pub mod aggregate;
pub mod derive;
pub mod health;
pub mod join;
pub mod normalize;
pub mod popularity;
pub mod resolve;
