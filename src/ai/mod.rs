pub mod localization;
pub mod presets;
pub mod resampling;
