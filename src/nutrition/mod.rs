pub mod aggregate;
pub mod fallback;
pub mod profile;
pub mod resolver;
pub mod throttle;
pub mod units;
pub mod usda;

pub use profile::NutrientProfile;
pub use resolver::{DataSource, NutrientResolver, Resolution};
