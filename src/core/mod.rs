// Core utilities shared by every engine module

pub mod math;
