// scope-test-utils: Shared test utilities for the scope proxy suite.
//
// Provides a scripted scope host for integration testing of the proxy's
// framing, negotiation, and rendezvous behavior.

pub mod fake_host;

pub use fake_host::FakeHost;
