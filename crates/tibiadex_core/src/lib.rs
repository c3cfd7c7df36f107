pub mod catalog;
pub mod character;
pub mod config;
pub mod extract;
pub mod http;
pub mod image;
pub mod infer;
pub mod normalize;
pub mod query;
pub mod runtime;
pub mod scrape;
pub mod store;
pub mod value;
