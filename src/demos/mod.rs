//! Runnable example graphs exercising the engine end-to-end (component
//! N): reimplementations of `examples/original_source/application/*.py`
//! as `TaskAction` impls and `GraphBuilder` call sequences, rather than
//! Python classes with database relationships.

pub mod build_library;
pub mod multi_price;
pub mod night_batch;
