pub mod app;
mod chart;
