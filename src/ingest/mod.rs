mod coordinator;

pub use coordinator::Coordinator;
