// End-to-end tests driving the adapter over an in-memory DAP stream against
// the in-process mock backend.
mod support;

mod breakpoints;
mod execution;
mod launch;
mod lifecycle;
