//! Fuchsia FIDL Bindings for Blinc
//!
//! Protocol bindings in the shape the FIDL code generator emits: static
//! coding tables for every payload, method ordinals, typed proxies, a server
//! trait with per-method responders, and a [`Dispatch`] adapter that routes
//! incoming messages to the trait by ordinal.
//!
//! [`Dispatch`]: blinc_fidl::Dispatch

pub mod test_echo;

#[cfg(test)]
mod tests;
