pub mod api;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod operation;

pub use errors::OperatorError;
pub use ids::{ConnectionId, OperationName};
pub use operation::{Operation, OperationResult, OperationResultError};
