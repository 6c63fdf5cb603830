//! Integration tests: HTTP API and WebSocket transport over the host provider

mod http_api_tests;
mod socket_tests;
