pub mod http;

pub use http::{HttpActionController, RemoteRegistry};
