#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod gbdt;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod service;
pub mod shap;
pub mod split;
pub mod train;

#[cfg(test)]
pub(crate) mod test_fixtures;
