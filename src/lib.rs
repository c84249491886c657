pub mod analyze;
pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod freehand;
pub mod layers;
pub mod mnist_sprite;
pub mod model;
pub mod optim;
pub mod sketchpad;
pub mod stroke;
pub mod surface;
pub mod train;
