//! Format drivers: per-family layout knowledge and scan loops.

pub mod demgrid;
pub mod nldn;
pub mod on29;
pub mod uspln;
