pub mod agent;
pub mod calendar;
pub mod config;
pub mod db;
pub mod detections;
pub mod executor;
pub mod llm;
pub mod query_tool;
pub mod tools;
pub mod translator;
pub mod types;
