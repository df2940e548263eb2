pub mod model;
pub mod params_cache;
pub mod repository;
pub mod repository_sqlx;
