//! reglas: rule similarity and clustering analysis.
//!
//! Loads a dataset of named rules with nested JSON bodies, flattens
//! each body to canonical text, embeds the texts with a pretrained
//! sentence-embeddings model, and derives a pairwise similarity
//! report, density-based clusters with token labels, and a 2-D
//! projection for display.

pub mod config;
pub mod display;
pub mod rules;
