pub mod currencies;
pub mod health;
pub mod jobs;
