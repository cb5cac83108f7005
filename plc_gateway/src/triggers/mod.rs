pub mod dispatcher;
pub mod evaluator;
pub mod processor;
