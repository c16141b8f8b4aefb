pub mod backend;
pub mod counter;
pub mod error;
pub mod feed;
pub mod read_state;
pub mod refresh;
pub mod state;
pub mod types;
pub mod view;
