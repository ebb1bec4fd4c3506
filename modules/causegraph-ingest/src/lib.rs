pub mod loader;
pub mod report;

pub use loader::TableReader;
pub use report::render_summary;
