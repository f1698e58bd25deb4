//! Library half of the Tessera shell: the array-directory store used
//! by the binary, integration tests, and benches.

pub mod store;
