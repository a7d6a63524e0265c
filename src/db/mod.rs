mod archive;
mod repository;
mod schema;

pub use archive::DateWindow;
pub use repository::Repository;
