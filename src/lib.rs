pub mod app;
pub mod config;
pub mod error;
pub mod nav;
pub mod position;
pub mod db {
    pub mod change_stream;
    pub mod memory;
    pub mod models;
    pub mod repository;
}
pub mod search {
    pub mod index;
    pub mod normalize;
}
pub mod api {
    pub mod errors;
    pub mod pages;
    pub mod search;
}
