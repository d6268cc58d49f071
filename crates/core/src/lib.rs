pub mod builtin;
pub mod error;
pub mod executor;
pub mod message;
pub mod registry;

pub use error::ErrorRecord;
pub use executor::{serve_stdio, Executor};
pub use message::{decode_line, encode_line, Dispatch, Response, ResponseBody, Transferable};
pub use registry::{HandlerFn, Invocation, Job, Registry};
