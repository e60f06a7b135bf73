pub mod ab_testing;
pub mod content_signals;
pub mod db;
pub mod learning_engine;
pub mod prediction_engine;
pub mod profile;
pub mod providers;
pub mod recommendation_engine;
pub mod types;
pub mod viral_score;
