pub(crate) mod tracing_common;
