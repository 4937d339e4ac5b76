pub mod db;
pub mod pipeline;
pub mod settings;
pub mod sources;
