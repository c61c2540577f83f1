pub mod classifier;
pub mod example_store;
pub mod feature;
pub mod landmark;
pub mod model_writer;
pub mod persistence;
pub mod session;

#[cfg(test)]
pub(crate) mod fixtures;
