// Generated protobuf bindings for `proto/Mumble.proto`, compiled at build
// time by `build.rs` via `protobuf-codegen-pure`. Re-exported so callers can
// `use mumble_proto::mumble::{Version, UserState, ...}` the way the teacher's
// `crate::proto::mumble` module does.
include!(concat!(env!("OUT_DIR"), "/Mumble.rs"));
