#[macro_use]
extern crate tracing;

pub mod error;
pub mod router;
mod status;
mod viewer;

pub use router::{
    create_router,
    serve,
    AppState,
};
