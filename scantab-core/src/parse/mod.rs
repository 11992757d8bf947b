pub mod document;
pub mod native;
pub mod page;
