//! Model architecture
//!
//! [`MrClassifier`] is a small residual CNN built with Burn. Its
//! hyper-parameters come from [`MrClassifierConfig`].

pub mod resnet;

pub use resnet::{MrClassifier, MrClassifierConfig, ResidualBlock};
