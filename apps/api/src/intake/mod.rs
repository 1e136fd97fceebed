// Request intake: everything that runs before a provider is contacted.
// Sanitizer and quota failures are reported immediately and never retried.

pub mod admission;
pub mod caller;
pub mod sanitize;
