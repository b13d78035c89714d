//! Default value functions for serde deserialization.

pub fn samples_per_dimension() -> usize {
    5
}

pub fn default_lambda() -> f64 {
    0.1
}

pub fn config_path() -> &'static str {
    "configs/setu.yaml"
}
