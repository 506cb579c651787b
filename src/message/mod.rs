// Message layer: CAN primitives, payload generation, per-message configuration.
// Descriptors are validated here once, at registration time; tasks never
// re-check them at runtime.

pub mod descriptor;
pub mod frame;
pub mod payload;
