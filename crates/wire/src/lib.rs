pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod inprocess;
pub mod registry;
pub mod report;
pub mod reqrep;
pub mod task;
pub mod traits;

pub use endpoint::Endpoint;
pub use envelope::{Envelope, Outcome, Reply};
pub use error::{TaskError, WireError};
pub use inprocess::InProcessTransport;
pub use registry::FunctionRegistry;
pub use report::InvocationReport;
pub use reqrep::{FunctionHost, ZmqTransport};
pub use task::{panic_message, RemoteTask};
pub use traits::{FunctionTransport, InvokeResponse};
