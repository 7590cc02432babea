pub mod args;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod store;

#[cfg(test)]
mod tests;
