pub mod config;
pub mod fetch;
pub mod panel;
pub mod pipeline;
pub mod survey;
pub mod table;
