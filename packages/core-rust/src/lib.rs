//! `fxproxy` Core — invocation context model, header codec, and error taxonomy.

pub mod context;
pub mod error;
pub mod headers;

pub use context::{FunctionContext, InvocationType, SalesforceContext, UserContext};
pub use error::{DecodeError, ProxyError};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
