#![allow(clippy::many_single_char_names)]
#![warn(clippy::cargo)]
extern crate byteorder;
extern crate rand;

#[macro_use]
extern crate lazy_static;

pub mod data;
pub mod distributions;
pub mod engine;
pub mod find;
pub mod strategies;

pub use crate::engine::Settings;
pub use crate::find::{find, find_with, NoSuchExample};
