pub mod models;
pub mod onboard;
pub mod run;
