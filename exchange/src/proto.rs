//! Generated protobuf messages and gRPC stubs for the `Exchange` service.
//!
//! The wire contract lives in `proto/exchange.proto`; `build.rs` regenerates
//! this module through `tonic-build` on every build.

tonic::include_proto!("exchange");
