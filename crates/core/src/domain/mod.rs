pub mod fact;
pub mod queue;
pub mod universe;
