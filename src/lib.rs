// scope-proxy workspace root: integration suites live in tests/integration.
