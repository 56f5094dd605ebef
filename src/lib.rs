pub mod context;
pub mod electrode;
pub mod field_query;
pub mod field_solver;
pub mod material;
pub mod medium;
pub mod params;
pub mod points;
pub mod process_group;
pub mod stepping;
pub mod stimulus;

mod types;
mod util;
