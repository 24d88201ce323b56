pub mod list_regions;
pub mod measure;

pub use list_regions::list_regions;
pub use measure::measure;
