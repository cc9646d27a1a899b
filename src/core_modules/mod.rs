pub mod accumulator;
pub mod bin_count;
pub mod dynamics;
pub mod histogram;
pub mod histogram_accumulator;
pub mod min_max;
pub mod region;
pub mod sample;
pub mod statistics;
pub mod tile;
